//! In-process repository.
//!
//! Transactions hold the store lock from `begin` to `commit`/`rollback`, so
//! they are serialized the way row locks would serialize them. Dropping an
//! unfinished transaction rolls it back. Fail points let tests make a given
//! statement fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{RepoError, RepoResult, SlipFilter, SlipRepository, SlipTransaction};
use crate::domain::aggregates::order::{matches_unlinked, most_recent};
use crate::domain::aggregates::{
    AddressRecord, AddressSource, Cart, CartLine, DailySales, NewOrder, NewSlip, OrderLine, OrderLineDetail,
    OrderRecord, PaymentSlip, PaymentSlipItem, Product, SlipStatus, SlipTotals, SnapshotItem, StockChange,
};
use crate::domain::value_objects::{CartId, Money, OrderId, ProductId, Quantity, SlipId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertSlip,
    /// Fails after the first row has been written
    InsertSnapshot,
    CreateOrder,
    ReplaceOrderLines,
    Commit,
    ClaimFlag,
    SetStatus,
    DeductProduct(ProductId),
    DeleteSlip,
}

#[derive(Clone, Debug)]
struct StoredCartItem { cart_id: CartId, product_id: Option<ProductId>, count: Quantity, price: Option<Money> }

#[derive(Clone, Debug)]
struct StoredAddress { address: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

#[derive(Clone, Debug, Default)]
struct MemoryState {
    next_id: i64,
    products: BTreeMap<ProductId, Product>,
    cart_items: Vec<StoredCartItem>,
    cart_addresses: HashMap<CartId, StoredAddress>,
    orders: BTreeMap<OrderId, OrderRecord>,
    order_items: Vec<(OrderId, OrderLine)>,
    slips: BTreeMap<SlipId, PaymentSlip>,
    slip_items: Vec<PaymentSlipItem>,
}

#[derive(Debug, Default)]
struct Shared {
    state: MemoryState,
    fail: HashSet<FailPoint>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<Shared>>,
}

impl Shared {
    fn check(&self, point: FailPoint) -> RepoResult<()> {
        if self.fail.contains(&point) { Err(RepoError::Injected(point)) } else { Ok(()) }
    }
}

impl MemoryState {
    fn next_id(&mut self) -> i64 { self.next_id += 1; self.next_id }

    fn cart(&self, cart_id: CartId) -> Cart {
        let lines = self.cart_items.iter().filter(|i| i.cart_id == cart_id).map(|i| {
            let product = i.product_id.and_then(|id| self.products.get(&id));
            CartLine {
                product_id: i.product_id,
                title: product.map(|p| p.title.clone()),
                cart_price: i.price,
                product_price: product.map(|p| p.price),
                quantity: i.count,
            }
        }).collect();
        Cart::new(cart_id, lines)
    }

    fn find_order_by_cart(&self, user_id: UserId, cart_id: CartId, amount: Money) -> Option<OrderId> {
        most_recent(self.orders.values().filter(|o| o.ordered_by == user_id && o.cart_id == Some(cart_id) && o.total.matches(&amount)))
            .map(|o| o.id)
    }

    fn find_order_by_amount(&self, user_id: UserId, amount: Money) -> Option<OrderId> {
        most_recent(self.orders.values().filter(|o| matches_unlinked(o, user_id, &amount))).map(|o| o.id)
    }
}

impl MemoryRepository {
    pub fn new() -> Self { Self::default() }

    pub async fn fail_on(&self, point: FailPoint) { self.inner.lock().await.fail.insert(point); }
    pub async fn clear_failures(&self) { self.inner.lock().await.fail.clear(); }

    pub async fn add_product(&self, title: &str, price: Money, quantity: u32) -> ProductId {
        let mut shared = self.inner.lock().await;
        let id = ProductId(shared.state.next_id());
        shared.state.products.insert(id, Product { id, title: title.to_string(), price, quantity: Quantity::new(quantity), sold: 0 });
        id
    }

    pub async fn product(&self, id: ProductId) -> Option<Product> { self.inner.lock().await.state.products.get(&id).cloned() }

    /// Deletes the product; cart rows keep a dangling null reference.
    pub async fn remove_product(&self, id: ProductId) {
        let mut shared = self.inner.lock().await;
        shared.state.products.remove(&id);
        for item in shared.state.cart_items.iter_mut().filter(|i| i.product_id == Some(id)) { item.product_id = None; }
    }

    pub async fn add_cart_item(&self, cart_id: CartId, product_id: ProductId, count: u32, price: Option<Money>) {
        let mut shared = self.inner.lock().await;
        shared.state.cart_items.push(StoredCartItem { cart_id, product_id: Some(product_id), count: Quantity::new(count), price });
    }

    pub async fn clear_cart(&self, cart_id: CartId) {
        self.inner.lock().await.state.cart_items.retain(|i| i.cart_id != cart_id);
    }

    pub async fn cart_address(&self, cart_id: CartId) -> Option<String> {
        self.inner.lock().await.state.cart_addresses.get(&cart_id).map(|a| a.address.clone())
    }

    /// Moves a slip's creation time, for day-bucketed metrics.
    pub async fn backdate_slip(&self, id: SlipId, created_at: DateTime<Utc>) {
        if let Some(slip) = self.inner.lock().await.state.slips.get_mut(&id) { slip.created_at = created_at; }
    }

    /// Seeds an order written before orders carried a cart id.
    pub async fn add_unlinked_order(&self, user_id: UserId, total: Money, lines: &[OrderLine]) -> OrderId {
        let mut shared = self.inner.lock().await;
        let id = OrderId(shared.state.next_id());
        shared.state.orders.insert(id, OrderRecord {
            id, ordered_by: user_id, cart_id: None, total, status: "processing".into(),
            provenance_id: format!("legacy-{id}"), created_at: Utc::now(),
        });
        shared.state.order_items.extend(lines.iter().map(|l| (id, *l)));
        id
    }

    pub async fn delete_order(&self, id: OrderId) {
        let mut shared = self.inner.lock().await;
        shared.state.orders.remove(&id);
        shared.state.order_items.retain(|(o, _)| *o != id);
    }

    pub async fn orders_of(&self, user_id: UserId) -> Vec<OrderRecord> {
        self.inner.lock().await.state.orders.values().filter(|o| o.ordered_by == user_id).cloned().collect()
    }

    pub async fn stored_order_lines(&self, order_id: OrderId) -> Vec<OrderLine> {
        self.inner.lock().await.state.order_items.iter().filter(|(o, _)| *o == order_id).map(|(_, l)| *l).collect()
    }

    pub async fn slip_count(&self) -> usize { self.inner.lock().await.state.slips.len() }
}

#[async_trait]
impl SlipRepository for MemoryRepository {
    type Tx = MemoryTx;

    async fn begin(&self) -> RepoResult<MemoryTx> {
        let guard = self.inner.clone().lock_owned().await;
        let begin = guard.state.clone();
        Ok(MemoryTx { guard, begin, savepoints: Vec::new(), done: false })
    }

    async fn find_slip(&self, id: SlipId) -> RepoResult<Option<PaymentSlip>> {
        Ok(self.inner.lock().await.state.slips.get(&id).cloned())
    }

    async fn list_slips(&self, filter: SlipFilter) -> RepoResult<Vec<PaymentSlip>> {
        let shared = self.inner.lock().await;
        let state = &shared.state;
        let mut slips: Vec<PaymentSlip> = state.slips.values()
            .filter(|s| !s.is_deleted())
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .filter(|s| filter.user_id.map_or(true, |u| s.user_id == u))
            .cloned()
            .map(|mut s| {
                if s.shipping_address.is_none() {
                    s.shipping_address = s.cart_id.and_then(|c| state.cart_addresses.get(&c)).map(|a| a.address.clone());
                }
                s
            })
            .collect();
        slips.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(slips)
    }

    async fn atomic_claim_deduction_flag(&self, id: SlipId) -> RepoResult<bool> {
        let mut shared = self.inner.lock().await;
        shared.check(FailPoint::ClaimFlag)?;
        match shared.state.slips.get_mut(&id) {
            Some(slip) if !slip.stock_deducted => {
                slip.stock_deducted = true;
                slip.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_status(&self, id: SlipId, status: SlipStatus) -> RepoResult<bool> {
        let mut shared = self.inner.lock().await;
        shared.check(FailPoint::SetStatus)?;
        Ok(shared.state.slips.get_mut(&id).map(|s| { s.status = status; s.updated_at = Utc::now(); }).is_some())
    }

    async fn deduct_product_stock(&self, product_id: ProductId, qty: Quantity) -> RepoResult<Option<StockChange>> {
        let mut shared = self.inner.lock().await;
        shared.check(FailPoint::DeductProduct(product_id))?;
        Ok(shared.state.products.get_mut(&product_id).map(|p| p.deduct(qty)))
    }

    async fn cart(&self, cart_id: CartId) -> RepoResult<Cart> { Ok(self.inner.lock().await.state.cart(cart_id)) }

    async fn find_order_by_cart(&self, user_id: UserId, cart_id: CartId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(self.inner.lock().await.state.find_order_by_cart(user_id, cart_id, amount))
    }

    async fn find_order_by_amount(&self, user_id: UserId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(self.inner.lock().await.state.find_order_by_amount(user_id, amount))
    }

    async fn order_lines(&self, order_id: OrderId) -> RepoResult<Vec<OrderLineDetail>> {
        let shared = self.inner.lock().await;
        let state = &shared.state;
        Ok(state.order_items.iter().filter(|(o, _)| *o == order_id).map(|(_, line)| OrderLineDetail {
            line: *line,
            title: state.products.get(&line.product_id).map(|p| p.title.clone()),
        }).collect())
    }

    async fn list_snapshot_items(&self, slip_id: SlipId) -> RepoResult<Vec<PaymentSlipItem>> {
        Ok(self.inner.lock().await.state.slip_items.iter().filter(|i| i.slip_id == slip_id).cloned().collect())
    }

    async fn delete_slip(&self, id: SlipId) -> RepoResult<bool> {
        let mut shared = self.inner.lock().await;
        shared.check(FailPoint::DeleteSlip)?;
        let removed = shared.state.slips.remove(&id).is_some();
        shared.state.slip_items.retain(|i| i.slip_id != id);
        Ok(removed)
    }

    async fn soft_delete_slip(&self, id: SlipId) -> RepoResult<bool> {
        let mut shared = self.inner.lock().await;
        shared.check(FailPoint::DeleteSlip)?;
        let now = Utc::now();
        Ok(shared.state.slips.get_mut(&id).map(|s| { s.deleted_at = Some(now); s.updated_at = now; }).is_some())
    }

    async fn save_cart_address(&self, user_id: UserId, cart_id: CartId, address: &str) -> RepoResult<u64> {
        let mut shared = self.inner.lock().await;
        let now = Utc::now();
        let created_at = shared.state.cart_addresses.get(&cart_id).map_or(now, |a| a.created_at);
        shared.state.cart_addresses.insert(cart_id, StoredAddress { address: address.to_string(), created_at, updated_at: now });
        let mut updated = 0;
        for slip in shared.state.slips.values_mut()
            .filter(|s| s.cart_id == Some(cart_id) && s.user_id == user_id && s.status == SlipStatus::Pending)
        {
            slip.shipping_address = Some(address.to_string());
            slip.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn slip_totals(&self) -> RepoResult<SlipTotals> {
        let shared = self.inner.lock().await;
        Ok(shared.state.slips.values().filter(|s| !s.is_deleted()).fold(SlipTotals::default(), |mut t, s| {
            t.slips += 1;
            match s.status {
                SlipStatus::Pending => t.pending += 1,
                SlipStatus::Approved => t.approved_revenue = t.approved_revenue + s.amount,
                SlipStatus::Rejected => {}
            }
            t
        }))
    }

    async fn approved_sales_since(&self, since: NaiveDate) -> RepoResult<Vec<DailySales>> {
        let shared = self.inner.lock().await;
        let mut days: BTreeMap<NaiveDate, DailySales> = BTreeMap::new();
        for slip in shared.state.slips.values().filter(|s| !s.is_deleted() && s.status == SlipStatus::Approved) {
            let date = slip.created_at.date_naive();
            if date < since { continue; }
            let day = days.entry(date).or_insert(DailySales { date, revenue: Money::zero(), approved: 0 });
            day.revenue = day.revenue + slip.amount;
            day.approved += 1;
        }
        Ok(days.into_values().collect())
    }

    async fn address_records(&self, user_id: UserId) -> RepoResult<Vec<AddressRecord>> {
        let shared = self.inner.lock().await;
        let state = &shared.state;
        let mine = state.slips.values().filter(|s| s.user_id == user_id && !s.is_deleted());

        let mut records: Vec<AddressRecord> = mine.clone().filter_map(|s| {
            let address = s.shipping_address.clone().filter(|a| !a.trim().is_empty())?;
            Some(AddressRecord {
                cart_id: s.cart_id?, amount: Some(s.amount), address, source: AddressSource::Slip,
                created_at: s.created_at, updated_at: s.updated_at,
            })
        }).collect();

        let carts: HashSet<CartId> = mine.filter_map(|s| s.cart_id)
            .chain(state.orders.values().filter(|o| o.ordered_by == user_id).filter_map(|o| o.cart_id))
            .collect();
        records.extend(carts.into_iter().filter_map(|cart_id| {
            let a = state.cart_addresses.get(&cart_id)?;
            Some(AddressRecord {
                cart_id, amount: None, address: a.address.clone(), source: AddressSource::Cart,
                created_at: a.created_at, updated_at: a.updated_at,
            })
        }));
        Ok(records)
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Shared>,
    begin: MemoryState,
    savepoints: Vec<(&'static str, MemoryState)>,
    done: bool,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.done { self.guard.state = std::mem::take(&mut self.begin); }
    }
}

#[async_trait]
impl SlipTransaction for MemoryTx {
    async fn cart_address(&mut self, cart_id: CartId) -> RepoResult<Option<String>> {
        Ok(self.guard.state.cart_addresses.get(&cart_id).map(|a| a.address.clone()))
    }

    async fn insert_slip(&mut self, slip: &NewSlip) -> RepoResult<SlipId> {
        self.guard.check(FailPoint::InsertSlip)?;
        let state = &mut self.guard.state;
        let id = SlipId(state.next_id());
        let now = Utc::now();
        state.slips.insert(id, PaymentSlip {
            id, cart_id: Some(slip.cart_id), user_id: slip.user_id, amount: slip.amount, slip_path: slip.slip_path.clone(),
            status: SlipStatus::Pending, stock_deducted: false, shipping_address: slip.shipping_address.clone(),
            created_at: now, updated_at: now, deleted_at: None,
        });
        Ok(id)
    }

    async fn cart(&mut self, cart_id: CartId) -> RepoResult<Cart> { Ok(self.guard.state.cart(cart_id)) }

    async fn insert_snapshot_items(&mut self, slip_id: SlipId, items: &[SnapshotItem]) -> RepoResult<()> {
        let failing = self.guard.check(FailPoint::InsertSnapshot);
        let state = &mut self.guard.state;
        for item in items {
            let id = state.next_id();
            state.slip_items.push(PaymentSlipItem { id, slip_id, item: item.clone() });
            failing.as_ref().map_err(|_| RepoError::Injected(FailPoint::InsertSnapshot))?;
        }
        failing
    }

    async fn savepoint(&mut self, name: &'static str) -> RepoResult<()> {
        let copy = self.guard.state.clone();
        self.savepoints.push((name, copy));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> RepoResult<()> {
        let pos = self.savepoints.iter().rposition(|(n, _)| *n == name)
            .ok_or_else(|| RepoError::Corrupt(format!("no savepoint {name}")))?;
        self.guard.state = self.savepoints[pos].1.clone();
        self.savepoints.truncate(pos + 1);
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &'static str) -> RepoResult<()> {
        let pos = self.savepoints.iter().rposition(|(n, _)| *n == name)
            .ok_or_else(|| RepoError::Corrupt(format!("no savepoint {name}")))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    async fn find_order_by_cart(&mut self, user_id: UserId, cart_id: CartId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(self.guard.state.find_order_by_cart(user_id, cart_id, amount))
    }

    async fn find_order_by_amount(&mut self, user_id: UserId, amount: Money) -> RepoResult<Option<OrderId>> {
        Ok(self.guard.state.find_order_by_amount(user_id, amount))
    }

    async fn link_order_to_cart(&mut self, order_id: OrderId, cart_id: CartId) -> RepoResult<()> {
        if let Some(order) = self.guard.state.orders.get_mut(&order_id) { order.cart_id = Some(cart_id); }
        Ok(())
    }

    async fn create_order(&mut self, order: &NewOrder) -> RepoResult<OrderId> {
        self.guard.check(FailPoint::CreateOrder)?;
        let state = &mut self.guard.state;
        let id = OrderId(state.next_id());
        state.orders.insert(id, OrderRecord {
            id, ordered_by: order.ordered_by, cart_id: Some(order.cart_id), total: order.total,
            status: order.status.to_string(), provenance_id: order.provenance_id.clone(), created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn replace_order_lines(&mut self, order_id: OrderId, lines: &[OrderLine]) -> RepoResult<()> {
        self.guard.check(FailPoint::ReplaceOrderLines)?;
        let state = &mut self.guard.state;
        state.order_items.retain(|(o, _)| *o != order_id);
        state.order_items.extend(lines.iter().map(|l| (order_id, *l)));
        Ok(())
    }

    async fn commit(mut self) -> RepoResult<()> {
        self.guard.check(FailPoint::Commit)?;
        self.done = true;
        Ok(())
    }

    async fn rollback(mut self) -> RepoResult<()> {
        self.guard.state = std::mem::take(&mut self.begin);
        self.done = true;
        Ok(())
    }
}
