//! Product stock
//!
//! Only the inventory columns the deduction engine touches. Catalog fields are
//! managed elsewhere.

use serde::Serialize;

use crate::domain::value_objects::{Money, ProductId, Quantity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub price: Money,
    pub quantity: Quantity,
    pub sold: u64,
}

/// Result of one clamped decrement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StockChange {
    pub product_id: ProductId,
    pub requested: u32,
    /// Units actually removed: `min(requested, quantity_before)`
    pub deducted: u32,
    pub quantity_after: u32,
}

impl Product {
    /// `quantity = max(quantity - qty, 0)`, `sold += min(qty, quantity_before)`.
    pub fn deduct(&mut self, qty: Quantity) -> StockChange {
        let before = self.quantity.value();
        let deducted = qty.value().min(before);
        self.quantity = Quantity::new(before - deducted);
        self.sold = self.sold.saturating_add(u64::from(deducted));
        StockChange { product_id: self.id, requested: qty.value(), deducted, quantity_after: self.quantity.value() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(quantity: u32, sold: u64) -> Product {
        Product { id: ProductId(1), title: "A".into(), price: Money::zero(), quantity: Quantity::new(quantity), sold }
    }

    #[test]
    fn test_deduct_within_stock() {
        let mut p = product(10, 3);
        let change = p.deduct(Quantity::new(2));
        assert_eq!((change.deducted, change.quantity_after), (2, 8));
        assert_eq!(p.sold, 5);
    }

    #[test]
    fn test_deduct_clamps_at_zero() {
        let mut p = product(1, 0);
        let change = p.deduct(Quantity::new(5));
        assert_eq!(change.deducted, 1);
        assert_eq!(p.quantity.value(), 0);
        assert_eq!(p.sold, 1);
        let again = p.deduct(Quantity::new(5));
        assert_eq!(again.deducted, 0);
        assert_eq!(p.sold, 1);
    }
}
