//! Order Mirror Aggregate
//!
//! Durable projection of a submitted cart, kept for order history. New mirrors
//! carry their cart id; rows written before that column existed can only be
//! paired with a slip through the (owner, total) heuristic.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::cart::Cart;
use crate::domain::value_objects::{CartId, Money, OrderId, ProductId, Quantity, UserId};

pub const MIRROR_STATUS: &str = "processing";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub ordered_by: UserId,
    pub cart_id: Option<CartId>,
    pub total: Money,
    pub status: String,
    pub provenance_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub ordered_by: UserId,
    pub cart_id: CartId,
    pub total: Money,
    pub status: &'static str,
    pub provenance_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_price: Money,
}

/// A stored line joined with the product title, for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderLineDetail {
    #[serde(flatten)]
    pub line: OrderLine,
    pub title: Option<String>,
}

impl NewOrder {
    pub fn mirror(ordered_by: UserId, cart_id: CartId, total: Money) -> Self {
        Self { ordered_by, cart_id, total, status: MIRROR_STATUS, provenance_id: format!("manual-{}", Uuid::now_v7()) }
    }
}

impl OrderLine {
    /// Mirrored lines for a cart; rows without a product or quantity are dropped.
    pub fn project(cart: &Cart) -> Vec<OrderLine> {
        cart.totals_by_product().into_iter()
            .filter(|t| !t.quantity.is_zero())
            .map(|t| OrderLine { product_id: t.product_id, quantity: t.quantity, unit_price: t.unit_price })
            .collect()
    }
}

/// Order a mirror lookup resolves to, newest first.
pub fn most_recent<'a>(candidates: impl IntoIterator<Item = &'a OrderRecord>) -> Option<&'a OrderRecord> {
    candidates.into_iter().max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

/// (owner, total) heuristic for mirrors with no cart link.
pub fn matches_unlinked(order: &OrderRecord, user: UserId, amount: &Money) -> bool {
    order.cart_id.is_none() && order.ordered_by == user && order.total.matches(amount)
}
