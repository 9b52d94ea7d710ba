//! Payment Slip Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::value_objects::{CartId, Money, SlipId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentSlip {
    pub id: SlipId,
    pub cart_id: Option<CartId>,
    pub user_id: UserId,
    pub amount: Money,
    pub slip_path: String,
    pub status: SlipStatus,
    /// One-way gate: set once, by whichever approval claims it first
    pub stock_deducted: bool,
    pub shipping_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct NewSlip {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub amount: Money,
    pub slip_path: String,
    pub shipping_address: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlipStatus { #[default] Pending, Approved, Rejected }

/// Admin shorthand accepted by the PATCH endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlipAction { Approve, Reject }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode { Hard, Soft }

/// A status change and whether it must run the deduction gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: SlipStatus,
    pub to: SlipStatus,
}

impl SlipStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Approved => "APPROVED", Self::Rejected => "REJECTED" }
    }

    /// Every pair is legal; none of the states is terminal.
    pub fn transition(self, to: SlipStatus) -> Transition { Transition { from: self, to } }
}

impl Transition {
    /// Entering APPROVED always goes through the gate. The gate, not the
    /// previous status, decides whether stock moves, so re-approving and
    /// REJECTED -> APPROVED are safe.
    pub fn runs_deduction(&self) -> bool { self.to == SlipStatus::Approved }

    /// APPROVED -> REJECTED leaves stock as it is.
    pub fn leaves_deducted_stock(&self) -> bool { self.from == SlipStatus::Approved && self.to != SlipStatus::Approved }
}

impl From<SlipAction> for SlipStatus {
    fn from(action: SlipAction) -> Self {
        match action { SlipAction::Approve => Self::Approved, SlipAction::Reject => Self::Rejected }
    }
}

impl FromStr for SlipStatus {
    type Err = StatusError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(StatusError(s.to_string())),
        }
    }
}

impl fmt::Display for SlipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for DeleteMode {
    type Err = DeleteModeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hard" => Ok(Self::Hard),
            "soft" => Ok(Self::Soft),
            _ => Err(DeleteModeError(s.to_string())),
        }
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Hard => "hard", Self::Soft => "soft" })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub struct StatusError(pub String);
impl std::error::Error for StatusError {}
impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown slip status '{}'", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub struct DeleteModeError(pub String);
impl std::error::Error for DeleteModeError {}
impl fmt::Display for DeleteModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown delete mode '{}', expected hard or soft", self.0) }
}

impl PaymentSlip {
    pub fn is_deleted(&self) -> bool { self.deleted_at.is_some() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(" approved ".parse::<SlipStatus>(), Ok(SlipStatus::Approved));
        assert_eq!("PENDING".parse::<SlipStatus>(), Ok(SlipStatus::Pending));
        assert!("SHIPPED".parse::<SlipStatus>().is_err());
        assert!("".parse::<SlipStatus>().is_err());
    }

    #[test]
    fn test_transitions() {
        use SlipStatus::*;
        assert!(Pending.transition(Approved).runs_deduction());
        assert!(Rejected.transition(Approved).runs_deduction());
        assert!(Approved.transition(Approved).runs_deduction());
        assert!(!Pending.transition(Rejected).runs_deduction());
        assert!(Approved.transition(Rejected).leaves_deducted_stock());
        assert!(!Pending.transition(Rejected).leaves_deducted_stock());
    }

    #[test]
    fn test_action_and_mode() {
        assert_eq!(SlipStatus::from(SlipAction::Reject), SlipStatus::Rejected);
        assert_eq!("Soft".parse::<DeleteMode>(), Ok(DeleteMode::Soft));
        assert_eq!("purge".parse::<DeleteMode>(), Err(DeleteModeError("purge".into())));
        assert_eq!(DeleteModeError("purge".into()).to_string(), "unknown delete mode 'purge', expected hard or soft");
        assert_eq!(serde_json::to_string(&SlipStatus::Approved).unwrap(), "\"APPROVED\"");
    }
}
