//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::{DeleteMode, SlipStatus};
use crate::domain::value_objects::{CartId, OrderId, SlipId, UserId};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event")]
pub enum DomainEvent {
    Slip(SlipEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlipEvent {
    Submitted { slip_id: SlipId, user_id: UserId, cart_id: CartId, order_id: OrderId, amount: Decimal },
    StatusChanged { slip_id: SlipId, from: SlipStatus, to: SlipStatus },
    StockDeducted { slip_id: SlipId, source: LineSource, units: u64, failed_products: usize },
    /// Approval found nothing to deduct; needs a person to look at it.
    DeductionUnresolved { slip_id: SlipId },
    Deleted { slip_id: SlipId, mode: DeleteMode },
}

/// Where a slip's line items were recovered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineSource { Cart, Order, Snapshot }

impl DomainEvent {
    /// NATS subject, e.g. `slips.status_changed`.
    pub fn subject(&self) -> String {
        match self {
            Self::Slip(e) => format!("slips.{}", match e {
                SlipEvent::Submitted { .. } => "submitted",
                SlipEvent::StatusChanged { .. } => "status_changed",
                SlipEvent::StockDeducted { .. } => "stock_deducted",
                SlipEvent::DeductionUnresolved { .. } => "deduction_unresolved",
                SlipEvent::Deleted { .. } => "deleted",
            }),
        }
    }
}

impl From<SlipEvent> for DomainEvent {
    fn from(e: SlipEvent) -> Self { Self::Slip(e) }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_subject_and_payload() {
        let e = DomainEvent::from(SlipEvent::DeductionUnresolved { slip_id: SlipId(7) });
        assert_eq!(e.subject(), "slips.deduction_unresolved");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event"]["slip_id"], 7);
        assert_eq!(json["event"]["type"], "deduction_unresolved");
    }
}
