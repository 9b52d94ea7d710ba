//! Slip submission: store the file, then slip + snapshot + order mirror in one
//! transaction. A failed transaction deletes the stored file.

use validator::Validate;

use super::{SlipReceipt, SlipService, SubmitSlip};
use crate::domain::aggregates::{NewOrder, NewSlip, OrderLine, SnapshotItem};
use crate::domain::events::SlipEvent;
use crate::domain::value_objects::{CartId, Money, OrderId, SlipId, UserId};
use crate::repository::{RepoResult, SlipRepository, SlipTransaction};
use crate::storage::SlipStorage;
use crate::{Result, SlipError};

const SNAPSHOT_SAVEPOINT: &str = "snapshot_capture";

#[derive(Debug, Validate)]
pub(crate) struct ShippingAddress {
    #[validate(length(min = 1, max = 500))]
    pub address: String,
}

/// Trimmed address, `None` when blank, rejected past 500 characters.
pub(crate) fn normalize_address(raw: Option<&str>) -> Result<Option<String>> {
    let Some(address) = raw.map(str::trim).filter(|a| !a.is_empty()) else { return Ok(None) };
    let address = ShippingAddress { address: address.to_string() };
    address.validate().map_err(|_| SlipError::Validation("address must be 1-500 characters".into()))?;
    Ok(Some(address.address))
}

impl<R: SlipRepository, S: SlipStorage> SlipService<R, S> {
    pub async fn submit_slip(&self, user_id: UserId, req: SubmitSlip) -> Result<SlipReceipt> {
        let upload = req.upload.ok_or_else(|| SlipError::Validation("slip file is required".into()))?;
        let cart_id = CartId::parse(&req.cart_id).map_err(|e| SlipError::Validation(format!("cart_id: {e}")))?;
        let amount = Money::parse_positive(&req.amount).map_err(|e| SlipError::Validation(format!("amount: {e}")))?;
        let explicit_address = normalize_address(req.shipping_address.as_deref())?;
        upload.check(self.max_bytes)?;

        let slip_path = self.storage.store(&upload).await?;
        let receipt = match self.record_slip(user_id, cart_id, amount, explicit_address, &slip_path).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(user_id = %user_id, cart_id = %cart_id, error = %e, "slip submission failed");
                if let Err(cleanup) = self.storage.delete(&slip_path).await {
                    tracing::error!(%slip_path, error = %cleanup, "orphaned slip file left behind");
                }
                return Err(e);
            }
        };

        tracing::info!(slip_id = %receipt.slip_id, order_id = %receipt.order_id, cart_id = %cart_id, "slip submitted");
        self.events.publish(SlipEvent::Submitted {
            slip_id: receipt.slip_id, user_id, cart_id, order_id: receipt.order_id, amount: amount.amount(),
        }).await;
        Ok(receipt)
    }

    async fn record_slip(
        &self, user_id: UserId, cart_id: CartId, amount: Money, explicit_address: Option<String>, slip_path: &str,
    ) -> Result<SlipReceipt> {
        let mut tx = self.repo.begin().await?;
        match self.write_slip(&mut tx, user_id, cart_id, amount, explicit_address, slip_path).await {
            Ok(receipt) => {
                tx.commit().await?;
                Ok(receipt)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e.into())
            }
        }
    }

    async fn write_slip(
        &self, tx: &mut R::Tx, user_id: UserId, cart_id: CartId, amount: Money, explicit_address: Option<String>,
        slip_path: &str,
    ) -> RepoResult<SlipReceipt> {
        let shipping_address = match explicit_address {
            Some(address) => Some(address),
            None => tx.cart_address(cart_id).await?,
        };
        let slip_id = tx.insert_slip(&NewSlip {
            cart_id, user_id, amount, slip_path: slip_path.to_string(), shipping_address: shipping_address.clone(),
        }).await?;
        self.capture_snapshot(tx, slip_id, cart_id).await;
        let order_id = self.reconcile_order(tx, user_id, cart_id, amount).await?;
        Ok(SlipReceipt { slip_id, order_id, shipping_address, slip_path: slip_path.to_string() })
    }

    /// Freezes the cart's lines under `slip_id`. Runs inside a savepoint and
    /// never fails: on error the partial rows are undone, the failure is
    /// logged and 0 is returned.
    pub async fn capture_snapshot(&self, tx: &mut R::Tx, slip_id: SlipId, cart_id: CartId) -> usize {
        if let Err(e) = tx.savepoint(SNAPSHOT_SAVEPOINT).await {
            tracing::warn!(slip_id = %slip_id, error = %e, "snapshot savepoint failed");
            return 0;
        }
        match write_snapshot(tx, slip_id, cart_id).await {
            Ok(rows) => {
                if let Err(e) = tx.release_savepoint(SNAPSHOT_SAVEPOINT).await {
                    tracing::warn!(slip_id = %slip_id, error = %e, "snapshot savepoint release failed");
                }
                tracing::debug!(slip_id = %slip_id, cart_id = %cart_id, rows, "snapshot captured");
                rows
            }
            Err(e) => {
                tracing::warn!(slip_id = %slip_id, cart_id = %cart_id, error = %e, "snapshot capture failed, approval will use live lines");
                if let Err(rb) = tx.rollback_to_savepoint(SNAPSHOT_SAVEPOINT).await {
                    tracing::error!(slip_id = %slip_id, error = %rb, "snapshot savepoint rollback failed");
                }
                0
            }
        }
    }

    /// Finds or creates the mirror order for `(user, cart, amount)` and
    /// replaces its lines with the cart's current contents. A new amount for
    /// the same cart gets its own order, so an order's total always matches
    /// its lines. Running it again with the same inputs yields the same order
    /// and the same lines.
    pub async fn reconcile_order(&self, tx: &mut R::Tx, user_id: UserId, cart_id: CartId, amount: Money) -> RepoResult<OrderId> {
        let order_id = match tx.find_order_by_cart(user_id, cart_id, amount).await? {
            Some(id) => id,
            None => match tx.find_order_by_amount(user_id, amount).await? {
                Some(id) => {
                    tracing::debug!(order_id = %id, cart_id = %cart_id, "linking unlinked order by amount");
                    tx.link_order_to_cart(id, cart_id).await?;
                    id
                }
                None => tx.create_order(&NewOrder::mirror(user_id, cart_id, amount)).await?,
            },
        };
        let cart = tx.cart(cart_id).await?;
        let lines = OrderLine::project(&cart);
        tx.replace_order_lines(order_id, &lines).await?;
        tracing::debug!(order_id = %order_id, cart_id = %cart.id(), lines = lines.len(), "mirror order lines replaced");
        Ok(order_id)
    }
}

async fn write_snapshot<T: SlipTransaction>(tx: &mut T, slip_id: SlipId, cart_id: CartId) -> RepoResult<usize> {
    let cart = tx.cart(cart_id).await?;
    let items = SnapshotItem::capture(&cart);
    if !items.is_empty() {
        tx.insert_snapshot_items(slip_id, &items).await?;
    }
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(None).unwrap(), None);
        assert_eq!(normalize_address(Some("   ")).unwrap(), None);
        assert_eq!(normalize_address(Some(" 12 Main St ")).unwrap().as_deref(), Some("12 Main St"));
        assert!(normalize_address(Some(&"x".repeat(500))).is_ok());
        assert!(matches!(normalize_address(Some(&"x".repeat(501))), Err(SlipError::Validation(_))));
    }
}
