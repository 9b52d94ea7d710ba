//! Value Objects for slip reconciliation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn value(self) -> i64 { self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    };
}

id_type!(/// Payment slip identifier
    SlipId);
id_type!(/// Cart identifier
    CartId);
id_type!(UserId);
id_type!(ProductId);
id_type!(OrderId);

impl CartId {
    /// Parses a form value into a positive cart id.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let value: i64 = raw.trim().parse().map_err(|_| IdError::NotAnInteger)?;
        if value <= 0 { return Err(IdError::NotPositive); }
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum IdError { NotAnInteger, NotPositive }
impl std::error::Error for IdError {}
impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::NotAnInteger => write!(f, "not an integer"), Self::NotPositive => write!(f, "must be positive") }
    }
}

/// Two totals closer than this are considered the same amount.
pub const AMOUNT_EPSILON: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Money value object (currency is implied by the shop)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_positive(&self) -> bool { self.0 > Decimal::ZERO }

    /// Parses a form value; only strictly positive amounts are accepted.
    pub fn parse_positive(raw: &str) -> Result<Self, MoneyError> {
        let amount = Decimal::from_str(raw.trim()).map_err(|_| MoneyError::NotANumber)?;
        let money = Self(amount);
        if !money.is_positive() { return Err(MoneyError::NotPositive); }
        Ok(money)
    }

    /// Epsilon comparison used to pair a slip with an order total.
    pub fn matches(&self, other: &Money) -> bool { (self.0 - other.0).abs() < AMOUNT_EPSILON }
}

impl Default for Money { fn default() -> Self { Self::zero() } }

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money(self.0 + rhs.0) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { NotANumber, NotPositive }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::NotANumber => write!(f, "not a number"), Self::NotPositive => write!(f, "must be greater than zero") }
    }
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
    pub fn is_zero(&self) -> bool { self.0 == 0 }

    /// Converts a raw column value, treating negatives as empty.
    pub fn from_db(raw: i64) -> Self { Self(u32::try_from(raw.max(0)).unwrap_or(u32::MAX)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_cart_id_parse() {
        assert_eq!(CartId::parse(" 10 ").unwrap(), CartId(10));
        assert_eq!(CartId::parse("0"), Err(IdError::NotPositive));
        assert_eq!(CartId::parse("abc"), Err(IdError::NotAnInteger));
        assert_eq!(CartId::parse("1.5"), Err(IdError::NotAnInteger));
    }
    #[test]
    fn test_money_parse() {
        assert_eq!(Money::parse_positive("500.00").unwrap().amount(), Decimal::new(500, 0));
        assert_eq!(Money::parse_positive("0"), Err(MoneyError::NotPositive));
        assert_eq!(Money::parse_positive("-3"), Err(MoneyError::NotPositive));
        assert_eq!(Money::parse_positive(""), Err(MoneyError::NotANumber));
    }
    #[test]
    fn test_money_matches_within_epsilon() {
        let a = Money::new(Decimal::new(50000, 2));
        assert!(a.matches(&Money::new(Decimal::new(500004, 3))));
        assert!(!a.matches(&Money::new(Decimal::new(500005, 3))));
        assert!(!a.matches(&Money::new(Decimal::new(50001, 2))));
    }
    #[test]
    fn test_quantity_from_db() {
        assert_eq!(Quantity::from_db(-2).value(), 0);
        assert_eq!(Quantity::from_db(7).value(), 7);
        assert_eq!(Quantity::new(3).add(2).value(), 5);
    }
}
