//! Persistence seam for the slip pipeline.
//!
//! The service talks to storage only through these two traits. `postgres` is
//! the production adapter; `memory` keeps everything in process for tests and
//! local runs. Pool-level methods auto-commit one statement each; everything
//! that must land together goes through a [`SlipTransaction`].

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::aggregates::{
    AddressRecord, Cart, DailySales, NewOrder, NewSlip, OrderLine, OrderLineDetail, PaymentSlip, PaymentSlipItem,
    SlipStatus, SlipTotals, SnapshotItem, StockChange,
};
use crate::domain::value_objects::{CartId, Money, OrderId, ProductId, Quantity, SlipId, UserId};

pub mod memory;
pub mod postgres;
pub mod retry;

pub use memory::{FailPoint, MemoryRepository};
pub use postgres::PgSlipRepository;
pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("injected failure at {0:?}")]
    Injected(FailPoint),
}

pub type RepoResult<T> = std::result::Result<T, RepoError>;

/// Listing filter. Soft-deleted slips are never listed.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlipFilter {
    pub status: Option<SlipStatus>,
    pub user_id: Option<UserId>,
}

#[async_trait]
pub trait SlipRepository: Send + Sync + 'static {
    type Tx: SlipTransaction;

    async fn begin(&self) -> RepoResult<Self::Tx>;

    /// Includes soft-deleted rows; callers decide what a tombstone means.
    async fn find_slip(&self, id: SlipId) -> RepoResult<Option<PaymentSlip>>;

    /// Newest first, `shipping_address` falling back to the cart address.
    async fn list_slips(&self, filter: SlipFilter) -> RepoResult<Vec<PaymentSlip>>;

    /// Flips `stock_deducted` false -> true in one conditional update.
    /// Returns `true` only for the single caller that flipped it.
    async fn atomic_claim_deduction_flag(&self, id: SlipId) -> RepoResult<bool>;

    async fn set_status(&self, id: SlipId, status: SlipStatus) -> RepoResult<bool>;

    /// Clamped decrement in one atomic statement. `None` when the product row
    /// does not exist.
    async fn deduct_product_stock(&self, product_id: ProductId, qty: Quantity) -> RepoResult<Option<StockChange>>;

    async fn cart(&self, cart_id: CartId) -> RepoResult<Cart>;

    /// Newest mirror order of `user_id` for `cart_id` whose total is within
    /// epsilon of `amount`.
    async fn find_order_by_cart(&self, user_id: UserId, cart_id: CartId, amount: Money) -> RepoResult<Option<OrderId>>;

    async fn find_order_by_amount(&self, user_id: UserId, amount: Money) -> RepoResult<Option<OrderId>>;

    async fn order_lines(&self, order_id: OrderId) -> RepoResult<Vec<OrderLineDetail>>;

    async fn list_snapshot_items(&self, slip_id: SlipId) -> RepoResult<Vec<PaymentSlipItem>>;

    async fn delete_slip(&self, id: SlipId) -> RepoResult<bool>;

    async fn soft_delete_slip(&self, id: SlipId) -> RepoResult<bool>;

    /// Upserts the cart address and copies it onto the user's PENDING slips
    /// for that cart. Returns how many slips were updated.
    async fn save_cart_address(&self, user_id: UserId, cart_id: CartId, address: &str) -> RepoResult<u64>;

    /// Counts over live slips.
    async fn slip_totals(&self) -> RepoResult<SlipTotals>;

    /// Live APPROVED slips created on or after `since`, one row per UTC day.
    async fn approved_sales_since(&self, since: NaiveDate) -> RepoResult<Vec<DailySales>>;

    /// Addresses on the user's live slips, plus the saved address of every
    /// cart the user has a slip or a mirror order for.
    async fn address_records(&self, user_id: UserId) -> RepoResult<Vec<AddressRecord>>;
}

#[async_trait]
pub trait SlipTransaction: Send {
    async fn cart_address(&mut self, cart_id: CartId) -> RepoResult<Option<String>>;

    async fn insert_slip(&mut self, slip: &NewSlip) -> RepoResult<SlipId>;

    async fn cart(&mut self, cart_id: CartId) -> RepoResult<Cart>;

    async fn insert_snapshot_items(&mut self, slip_id: SlipId, items: &[SnapshotItem]) -> RepoResult<()>;

    async fn savepoint(&mut self, name: &'static str) -> RepoResult<()>;

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> RepoResult<()>;

    async fn release_savepoint(&mut self, name: &'static str) -> RepoResult<()>;

    async fn find_order_by_cart(&mut self, user_id: UserId, cart_id: CartId, amount: Money) -> RepoResult<Option<OrderId>>;

    /// Most recent order of `user_id` with no cart link whose total is within
    /// epsilon of `amount`.
    async fn find_order_by_amount(&mut self, user_id: UserId, amount: Money) -> RepoResult<Option<OrderId>>;

    async fn link_order_to_cart(&mut self, order_id: OrderId, cart_id: CartId) -> RepoResult<()>;

    async fn create_order(&mut self, order: &NewOrder) -> RepoResult<OrderId>;

    /// Delete-then-insert of the order's lines.
    async fn replace_order_lines(&mut self, order_id: OrderId, lines: &[OrderLine]) -> RepoResult<()>;

    async fn commit(self) -> RepoResult<()>;

    async fn rollback(self) -> RepoResult<()>;
}
