//! Exactly-once stock deduction.
//!
//! The conditional flag flip is the only guard against double deduction. It
//! is never undone: a failure after the claim is logged and left for manual
//! correction rather than risking a second deduction.

use std::collections::BTreeMap;

use super::{DeductionOutcome, DeductionReport, SlipService};
use crate::domain::aggregates::{PaymentSlip, SlipStatus, SnapshotItem};
use crate::domain::events::{LineSource, SlipEvent};
use crate::domain::value_objects::{OrderId, ProductId, Quantity, SlipId};
use crate::repository::{RepoResult, SlipRepository};
use crate::storage::SlipStorage;
use crate::{Result, SlipError};

/// Sums quantities per product. Lines without a product or with zero
/// quantity have nothing to deduct.
pub(crate) fn deductible(lines: &[SnapshotItem]) -> Vec<(ProductId, Quantity)> {
    let mut totals: BTreeMap<ProductId, Quantity> = BTreeMap::new();
    for line in lines.iter().filter(|l| !l.quantity.is_zero()) {
        let Some(product_id) = line.product_id else { continue };
        let total = totals.entry(product_id).or_default();
        *total = total.add(line.quantity.value());
    }
    totals.into_iter().collect()
}

impl<R: SlipRepository, S: SlipStorage> SlipService<R, S> {
    /// Claims the slip's deduction gate and, for the single winner, deducts
    /// every resolved line. Losers get [`DeductionOutcome::AlreadyClaimed`].
    pub async fn deduct_on_approval(&self, slip_id: SlipId) -> Result<DeductionOutcome> {
        let slip = self.live_slip(slip_id).await?;
        if !self.repo.atomic_claim_deduction_flag(slip_id).await? {
            tracing::debug!(slip_id = %slip_id, "deduction already claimed");
            return Ok(DeductionOutcome::AlreadyClaimed);
        }

        let resolved = match self.resolve_lines(&slip).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(target: "slip_alert", slip_id = %slip_id, error = %e, "line resolution failed after claiming deduction");
                self.events.publish(SlipEvent::DeductionUnresolved { slip_id }).await;
                return Err(e.into());
            }
        };
        let (source, lines) = match resolved {
            Some((source, lines)) => (Some(source), deductible(&lines)),
            None => (None, Vec::new()),
        };
        if lines.is_empty() {
            tracing::error!(target: "slip_alert", slip_id = %slip_id, cart_id = ?slip.cart_id, "approved slip has no recoverable line items");
            self.events.publish(SlipEvent::DeductionUnresolved { slip_id }).await;
            return Ok(DeductionOutcome::Applied(DeductionReport { source, ..Default::default() }));
        }

        let mut report = DeductionReport { source, ..Default::default() };
        for (product_id, qty) in lines {
            match self.repo.deduct_product_stock(product_id, qty).await {
                Ok(Some(change)) => {
                    if change.deducted < change.requested {
                        tracing::warn!(slip_id = %slip_id, product_id = %product_id, requested = change.requested, deducted = change.deducted, "stock ran out, deduction clamped");
                    }
                    report.changes.push(change);
                }
                Ok(None) => {
                    tracing::warn!(slip_id = %slip_id, product_id = %product_id, "product gone, nothing to deduct");
                    report.failed.push(product_id);
                }
                Err(e) => {
                    tracing::error!(slip_id = %slip_id, product_id = %product_id, error = %e, "stock deduction failed");
                    report.failed.push(product_id);
                }
            }
        }

        let units: u64 = report.changes.iter().map(|c| u64::from(c.deducted)).sum();
        tracing::info!(slip_id = %slip_id, source = ?source, units, failed = report.failed.len(), "stock deducted");
        if let Some(source) = source {
            self.events.publish(SlipEvent::StockDeducted { slip_id, source, units, failed_products: report.failed.len() }).await;
        }
        Ok(DeductionOutcome::Applied(report))
    }

    /// Manual re-drive of the deduction for a slip that is already APPROVED.
    pub async fn redrive_deduction(&self, slip_id: SlipId) -> Result<DeductionOutcome> {
        let slip = self.live_slip(slip_id).await?;
        if slip.status != SlipStatus::Approved {
            return Err(SlipError::InvalidTransition(format!("slip {slip_id} is {}, not APPROVED", slip.status)));
        }
        self.deduct_on_approval(slip_id).await
    }

    /// Slip that exists and is not soft-deleted.
    pub(crate) async fn live_slip(&self, slip_id: SlipId) -> Result<PaymentSlip> {
        self.repo.find_slip(slip_id).await?
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| SlipError::NotFound(format!("slip {slip_id}")))
    }

    /// First source that still has lines: live cart, then the mirror order
    /// (by cart link and amount, else an unlinked order by owner and amount),
    /// then the frozen snapshot.
    pub(crate) async fn resolve_lines(&self, slip: &PaymentSlip) -> RepoResult<Option<(LineSource, Vec<SnapshotItem>)>> {
        if let Some(cart_id) = slip.cart_id {
            let cart = self.repo.cart(cart_id).await?;
            if !cart.is_empty() {
                return Ok(Some((LineSource::Cart, SnapshotItem::capture(&cart))));
            }
        }

        if let Some(order_id) = self.order_for(slip).await? {
            let lines: Vec<SnapshotItem> = self.repo.order_lines(order_id).await?.into_iter().map(|d| SnapshotItem {
                product_id: Some(d.line.product_id),
                title: d.title.unwrap_or_default(),
                unit_price: d.line.unit_price,
                quantity: d.line.quantity,
            }).collect();
            if !lines.is_empty() {
                return Ok(Some((LineSource::Order, lines)));
            }
        }

        let snapshot: Vec<SnapshotItem> = self.repo.list_snapshot_items(slip.id).await?.into_iter().map(|i| i.item).collect();
        Ok((!snapshot.is_empty()).then_some((LineSource::Snapshot, snapshot)))
    }

    async fn order_for(&self, slip: &PaymentSlip) -> RepoResult<Option<OrderId>> {
        if let Some(cart_id) = slip.cart_id {
            if let Some(id) = self.repo.find_order_by_cart(slip.user_id, cart_id, slip.amount).await? {
                return Ok(Some(id));
            }
        }
        self.repo.find_order_by_amount(slip.user_id, slip.amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;

    fn item(product: Option<i64>, qty: u32) -> SnapshotItem {
        SnapshotItem { product_id: product.map(ProductId), title: String::new(), unit_price: Money::zero(), quantity: Quantity::new(qty) }
    }

    #[test]
    fn test_deductible_groups_and_skips() {
        let lines = [item(Some(2), 1), item(Some(1), 2), item(None, 5), item(Some(2), 3), item(Some(3), 0)];
        assert_eq!(deductible(&lines), vec![(ProductId(1), Quantity::new(2)), (ProductId(2), Quantity::new(4))]);
        assert!(deductible(&[]).is_empty());
    }
}
