//! Cart Aggregate
//!
//! Read-only view of a live cart as the reconciliation pipeline sees it. Carts
//! are owned by the storefront; this side never mutates them.

use std::collections::BTreeMap;

use crate::domain::value_objects::{CartId, Money, ProductId, Quantity};

#[derive(Clone, Debug)]
pub struct Cart {
    id: CartId,
    items: Vec<CartLine>,
}

/// One `cart_items` row joined with its product.
#[derive(Clone, Debug, Default)]
pub struct CartLine {
    pub product_id: Option<ProductId>,
    pub title: Option<String>,
    /// Price captured on the cart row, if any
    pub cart_price: Option<Money>,
    /// Current catalog price, absent when the product row is gone
    pub product_price: Option<Money>,
    pub quantity: Quantity,
}

impl CartLine {
    pub fn unit_price(&self) -> Money { self.cart_price.or(self.product_price).unwrap_or_default() }
}

/// All rows of one product folded together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductTotal {
    pub product_id: ProductId,
    pub title: Option<String>,
    pub unit_price: Money,
    pub quantity: Quantity,
}

impl Cart {
    pub fn new(id: CartId, items: Vec<CartLine>) -> Self { Self { id, items } }

    pub fn id(&self) -> CartId { self.id }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Rows that lost their product reference.
    pub fn orphan_lines(&self) -> impl Iterator<Item = &CartLine> { self.items.iter().filter(|l| l.product_id.is_none()) }

    /// Folds rows by product: quantities summed, lowest captured price kept
    /// (falling back to the lowest catalog price, then zero). Ordered by product id.
    pub fn totals_by_product(&self) -> Vec<ProductTotal> {
        #[derive(Default)]
        struct Acc { title: Option<String>, cart_price: Option<Money>, product_price: Option<Money>, quantity: Quantity }

        let mut grouped: BTreeMap<ProductId, Acc> = BTreeMap::new();
        for line in &self.items {
            let Some(product_id) = line.product_id else { continue };
            let acc = grouped.entry(product_id).or_default();
            acc.quantity = acc.quantity.add(line.quantity.value());
            if acc.title.is_none() { acc.title = line.title.clone(); }
            acc.cart_price = min_price(acc.cart_price, line.cart_price);
            acc.product_price = min_price(acc.product_price, line.product_price);
        }

        grouped.into_iter().map(|(product_id, acc)| ProductTotal {
            product_id,
            title: acc.title,
            unit_price: acc.cart_price.or(acc.product_price).unwrap_or_default(),
            quantity: acc.quantity,
        }).collect()
    }
}

fn min_price(a: Option<Money>, b: Option<Money>) -> Option<Money> {
    match (a, b) { (Some(a), Some(b)) => Some(a.min(b)), (a, b) => a.or(b) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn line(pid: Option<i64>, qty: u32, cart_price: Option<i64>, product_price: Option<i64>) -> CartLine {
        CartLine {
            product_id: pid.map(ProductId),
            title: pid.map(|p| format!("P{p}")),
            cart_price: cart_price.map(|p| Money::new(Decimal::new(p, 0))),
            product_price: product_price.map(|p| Money::new(Decimal::new(p, 0))),
            quantity: Quantity::new(qty),
        }
    }

    #[test]
    fn test_totals_merge_rows_of_same_product() {
        let cart = Cart::new(CartId(10), vec![line(Some(2), 1, Some(120), Some(100)), line(Some(1), 1, Some(200), None), line(Some(1), 1, Some(190), None)]);
        let totals = cart.totals_by_product();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].product_id, ProductId(1));
        assert_eq!(totals[0].quantity.value(), 2);
        assert_eq!(totals[0].unit_price.amount(), Decimal::new(190, 0));
        assert_eq!(totals[1].unit_price.amount(), Decimal::new(120, 0));
    }

    #[test]
    fn test_price_falls_back_to_catalog_then_zero() {
        let cart = Cart::new(CartId(1), vec![line(Some(1), 1, None, Some(80)), line(Some(2), 1, None, None)]);
        let totals = cart.totals_by_product();
        assert_eq!(totals[0].unit_price.amount(), Decimal::new(80, 0));
        assert_eq!(totals[1].unit_price, Money::zero());
    }

    #[test]
    fn test_orphan_rows_are_not_grouped() {
        let cart = Cart::new(CartId(1), vec![line(None, 3, Some(10), None), line(Some(4), 1, Some(10), None)]);
        assert_eq!(cart.totals_by_product().len(), 1);
        assert_eq!(cart.orphan_lines().count(), 1);
    }
}
