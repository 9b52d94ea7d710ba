//! Shipping addresses known for a user's carts.
//!
//! Addresses live in two places: on slips (captured at upload or copied from
//! the cart later) and in the per-cart address table. Lookups prefer slips.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::value_objects::{CartId, Money};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSource { Slip, Cart }

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AddressRecord {
    pub cart_id: CartId,
    /// Slip amount; cart addresses have none
    pub amount: Option<Money>,
    pub address: String,
    pub source: AddressSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newest record per cart, newest cart first. Blank addresses are ignored.
pub fn latest_per_cart(records: Vec<AddressRecord>) -> Vec<AddressRecord> {
    let mut latest: BTreeMap<CartId, AddressRecord> = BTreeMap::new();
    for record in records.into_iter().filter(|r| !r.address.trim().is_empty()) {
        let newer = latest.get(&record.cart_id).map_or(true, |prev| record.updated_at > prev.updated_at);
        if newer {
            latest.insert(record.cart_id, record);
        }
    }
    let mut out: Vec<AddressRecord> = latest.into_values().collect();
    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.cart_id.cmp(&a.cart_id)));
    out
}

/// Slip address for the cart, then the cart's own address, then the slip
/// with a matching amount created closest to `when`.
pub fn resolve(records: &[AddressRecord], cart_id: Option<CartId>, amount: Option<Money>, when: DateTime<Utc>) -> Option<String> {
    let usable = || records.iter().filter(|r| !r.address.trim().is_empty());
    let newest = |source: AddressSource, cart_id: CartId| {
        usable()
            .filter(|r| r.source == source && r.cart_id == cart_id)
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.created_at.cmp(&b.created_at)))
    };

    let by_cart = cart_id.and_then(|c| newest(AddressSource::Slip, c).or_else(|| newest(AddressSource::Cart, c)));
    let found = by_cart.or_else(|| {
        let amount = amount?;
        usable()
            .filter(|r| r.source == AddressSource::Slip && r.amount.is_some_and(|a| a.matches(&amount)))
            .min_by_key(|r| (r.created_at - when).num_milliseconds().unsigned_abs())
    });
    found.map(|r| r.address.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
    }

    fn slip(cart: i64, amount: &str, address: &str, minutes: i64) -> AddressRecord {
        AddressRecord {
            cart_id: CartId(cart), amount: Some(Money::parse_positive(amount).unwrap()), address: address.into(),
            source: AddressSource::Slip, created_at: at(minutes), updated_at: at(minutes),
        }
    }

    fn cart(cart: i64, address: &str, minutes: i64) -> AddressRecord {
        AddressRecord {
            cart_id: CartId(cart), amount: None, address: address.into(), source: AddressSource::Cart,
            created_at: at(minutes), updated_at: at(minutes),
        }
    }

    #[test]
    fn test_latest_per_cart() {
        let merged = latest_per_cart(vec![
            slip(1, "10", "old", 0), cart(1, "new", 5), slip(2, "20", "two", 3), slip(3, "30", "  ", 9),
        ]);
        let view: Vec<(i64, &str)> = merged.iter().map(|r| (r.cart_id.0, r.address.as_str())).collect();
        assert_eq!(view, vec![(1, "new"), (2, "two")]);
    }

    #[test]
    fn test_resolve_prefers_slip_then_cart_then_amount() {
        let records = [slip(1, "500", "slip addr", 0), cart(1, "cart addr", 10), cart(2, "cart two", 1),
            slip(3, "75", "far", -600), slip(4, "75.004", "near", 30)];
        assert_eq!(resolve(&records, Some(CartId(1)), None, at(0)).as_deref(), Some("slip addr"));
        assert_eq!(resolve(&records, Some(CartId(2)), None, at(0)).as_deref(), Some("cart two"));

        let amount = Money::parse_positive("75").ok();
        assert_eq!(resolve(&records, Some(CartId(9)), amount, at(20)).as_deref(), Some("near"));
        assert_eq!(resolve(&records, None, amount, at(-500)).as_deref(), Some("far"));
        assert_eq!(resolve(&records, Some(CartId(9)), Money::parse_positive("76").ok(), at(0)), None);
        assert_eq!(resolve(&records, None, None, at(0)), None);
    }
}
