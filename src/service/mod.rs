//! Slip service
//!
//! The one place slip submission, order mirroring, stock deduction and the
//! status state machine live. HTTP handlers call into it and do nothing else.

use serde::Serialize;

use crate::domain::aggregates::{DeleteMode, PaymentSlip, SlipStatus, SnapshotItem, StockChange};
use crate::domain::events::LineSource;
use crate::domain::value_objects::{CartId, OrderId, ProductId, SlipId};
use crate::events::EventPublisher;
use crate::repository::SlipRepository;
use crate::storage::{SlipStorage, SlipUpload, DEFAULT_MAX_BYTES};

mod admin;
mod deduction;
mod lookup;
mod submit;

/// Upload request as received; parsing happens in [`SlipService::submit_slip`].
#[derive(Clone, Debug, Default)]
pub struct SubmitSlip {
    pub cart_id: String,
    pub amount: String,
    pub shipping_address: Option<String>,
    pub upload: Option<SlipUpload>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlipReceipt {
    pub slip_id: SlipId,
    pub order_id: OrderId,
    pub shipping_address: Option<String>,
    pub slip_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeductionOutcome {
    /// The gate was already flipped; nothing moved.
    AlreadyClaimed,
    Applied(DeductionReport),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeductionReport {
    /// `None` when no source produced any line
    pub source: Option<LineSource>,
    pub changes: Vec<StockChange>,
    pub failed: Vec<ProductId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub slip_id: SlipId,
    pub status: SlipStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduction: Option<DeductionOutcome>,
}

/// Listing row: the slip plus whatever line items could be recovered for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlipView {
    #[serde(flatten)]
    pub slip: PaymentSlip,
    pub line_source: Option<LineSource>,
    pub lines: Vec<SnapshotItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AddressSaved {
    pub cart_id: CartId,
    pub address: String,
    pub updated_slips: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlipDeleted {
    pub slip_id: SlipId,
    pub mode: DeleteMode,
}

pub struct SlipService<R, S> {
    repo: R,
    storage: S,
    events: EventPublisher,
    max_bytes: usize,
    delete_mode: DeleteMode,
}

impl<R: SlipRepository, S: SlipStorage> SlipService<R, S> {
    pub fn new(repo: R, storage: S, events: EventPublisher) -> Self {
        Self { repo, storage, events, max_bytes: DEFAULT_MAX_BYTES, delete_mode: DeleteMode::Hard }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self { self.max_bytes = max_bytes; self }
    pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self { self.delete_mode = mode; self }

    pub fn max_bytes(&self) -> usize { self.max_bytes }
    pub fn events(&self) -> &EventPublisher { &self.events }
}
