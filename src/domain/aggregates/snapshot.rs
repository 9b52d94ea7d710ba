//! Slip snapshot
//!
//! A frozen copy of what was in the cart when the slip was submitted. Rows are
//! written once next to the slip and never updated.

use serde::{Deserialize, Serialize};

use super::cart::Cart;
use crate::domain::value_objects::{Money, ProductId, Quantity, SlipId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub product_id: Option<ProductId>,
    pub title: String,
    pub unit_price: Money,
    pub quantity: Quantity,
}

/// A persisted snapshot row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentSlipItem {
    pub id: i64,
    pub slip_id: SlipId,
    #[serde(flatten)]
    pub item: SnapshotItem,
}

impl SnapshotItem {
    /// One item per distinct product; rows whose product is gone are kept
    /// one-to-one so the record still shows them.
    pub fn capture(cart: &Cart) -> Vec<SnapshotItem> {
        let mut items: Vec<SnapshotItem> = cart.totals_by_product().into_iter().map(|t| SnapshotItem {
            product_id: Some(t.product_id),
            title: t.title.unwrap_or_default(),
            unit_price: t.unit_price,
            quantity: t.quantity,
        }).collect();
        items.extend(cart.orphan_lines().map(|l| SnapshotItem {
            product_id: None,
            title: l.title.clone().unwrap_or_default(),
            unit_price: l.unit_price(),
            quantity: l.quantity,
        }));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::CartLine;
    use crate::domain::value_objects::CartId;
    use rust_decimal::Decimal;

    #[test]
    fn test_capture_one_row_per_product() {
        let a = CartLine { product_id: Some(ProductId(1)), title: Some("A".into()), cart_price: Some(Money::new(Decimal::new(200, 0))), product_price: None, quantity: Quantity::new(1) };
        let b = CartLine { product_id: Some(ProductId(2)), title: Some("B".into()), cart_price: None, product_price: Some(Money::new(Decimal::new(100, 0))), quantity: Quantity::new(1) };
        let cart = Cart::new(CartId(10), vec![a.clone(), a, b]);
        let items = SnapshotItem::capture(&cart);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "A");
        assert_eq!(items[0].quantity.value(), 2);
        assert_eq!(items[1].unit_price.amount(), Decimal::new(100, 0));
    }

    #[test]
    fn test_capture_empty_cart() {
        assert!(SnapshotItem::capture(&Cart::new(CartId(3), vec![])).is_empty());
    }

    #[test]
    fn test_capture_keeps_orphan_rows() {
        let orphan = CartLine { product_id: None, title: None, cart_price: Some(Money::new(Decimal::new(5, 0))), product_price: None, quantity: Quantity::new(2) };
        let items = SnapshotItem::capture(&Cart::new(CartId(3), vec![orphan]));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, None);
        assert_eq!(items[0].quantity.value(), 2);
    }
}
