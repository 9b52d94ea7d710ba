//! Status changes, listings, deletion and cart addresses.

use super::submit::normalize_address;
use super::{AddressSaved, SlipDeleted, SlipService, SlipView, StatusChange};
use crate::domain::aggregates::{DeleteMode, SlipAction, SlipStatus};
use crate::domain::events::SlipEvent;
use crate::domain::value_objects::{CartId, SlipId, UserId};
use crate::repository::{SlipFilter, SlipRepository};
use crate::storage::SlipStorage;
use crate::{Result, SlipError};

impl<R: SlipRepository, S: SlipStorage> SlipService<R, S> {
    /// Parses `status` and applies it. Unknown values are rejected before
    /// the slip is looked up.
    pub async fn set_slip_status(&self, slip_id: SlipId, status: &str) -> Result<StatusChange> {
        let to: SlipStatus = status.parse()?;
        self.transition(slip_id, to).await
    }

    pub async fn apply_action(&self, slip_id: SlipId, action: SlipAction) -> Result<StatusChange> {
        self.transition(slip_id, action.into()).await
    }

    /// Writes the new status, then runs the deduction gate when entering
    /// APPROVED. A deduction failure leaves the status in place; the
    /// deduct endpoint can re-drive it.
    pub async fn transition(&self, slip_id: SlipId, to: SlipStatus) -> Result<StatusChange> {
        let slip = self.live_slip(slip_id).await?;
        let transition = slip.status.transition(to);
        if !self.repo.set_status(slip_id, to).await? {
            return Err(SlipError::NotFound(format!("slip {slip_id}")));
        }
        if transition.leaves_deducted_stock() && slip.stock_deducted {
            tracing::warn!(slip_id = %slip_id, to = %to, "slip left APPROVED; deducted stock is not restored");
        }
        tracing::info!(slip_id = %slip_id, from = %transition.from, to = %to, "slip status changed");
        self.events.publish(SlipEvent::StatusChanged { slip_id, from: transition.from, to }).await;

        let deduction = if transition.runs_deduction() { Some(self.deduct_on_approval(slip_id).await?) } else { None };
        Ok(StatusChange { slip_id, status: to, deduction })
    }

    /// Newest first, each slip with its recovered line items.
    pub async fn list_slips(&self, filter: SlipFilter) -> Result<Vec<SlipView>> {
        let slips = self.repo.list_slips(filter).await?;
        let mut views = Vec::with_capacity(slips.len());
        for slip in slips {
            let (line_source, lines) = match self.resolve_lines(&slip).await? {
                Some((source, lines)) => (Some(source), lines),
                None => (None, Vec::new()),
            };
            views.push(SlipView { slip, line_source, lines });
        }
        Ok(views)
    }

    pub async fn user_history(&self, user_id: UserId) -> Result<Vec<SlipView>> {
        self.list_slips(SlipFilter { status: None, user_id: Some(user_id) }).await
    }

    /// Hard mode removes the row, its snapshot and the stored file; soft mode
    /// only sets the tombstone. Neither restores deducted stock.
    pub async fn delete_slip(&self, slip_id: SlipId, mode: Option<DeleteMode>) -> Result<SlipDeleted> {
        let mode = mode.unwrap_or(self.delete_mode);
        let not_found = || SlipError::NotFound(format!("slip {slip_id}"));
        let slip = self.repo.find_slip(slip_id).await?.ok_or_else(not_found)?;

        match mode {
            DeleteMode::Hard => {
                if !self.repo.delete_slip(slip_id).await? {
                    return Err(not_found());
                }
                if let Err(e) = self.storage.delete(&slip.slip_path).await {
                    tracing::warn!(slip_id = %slip_id, slip_path = %slip.slip_path, error = %e, "slip file not removed");
                }
            }
            DeleteMode::Soft => {
                if slip.is_deleted() || !self.repo.soft_delete_slip(slip_id).await? {
                    return Err(not_found());
                }
            }
        }

        tracing::info!(slip_id = %slip_id, %mode, "slip deleted");
        self.events.publish(SlipEvent::Deleted { slip_id, mode }).await;
        Ok(SlipDeleted { slip_id, mode })
    }

    pub async fn save_cart_address(&self, user_id: UserId, cart_id: CartId, address: &str) -> Result<AddressSaved> {
        let address = normalize_address(Some(address))?
            .ok_or_else(|| SlipError::Validation("address must be 1-500 characters".into()))?;
        let updated_slips = self.repo.save_cart_address(user_id, cart_id, &address).await?;
        tracing::debug!(cart_id = %cart_id, updated_slips, "cart address saved");
        Ok(AddressSaved { cart_id, address, updated_slips })
    }
}
