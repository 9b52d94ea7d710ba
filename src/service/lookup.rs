//! Read-only views: dashboard metrics and address lookups.

use chrono::{DateTime, NaiveDate, Utc};

use super::SlipService;
use crate::domain::aggregates::address::{latest_per_cart, resolve};
use crate::domain::aggregates::metrics::{fill_window, window_start};
use crate::domain::aggregates::{AddressRecord, SlipMetrics};
use crate::domain::value_objects::{CartId, Money, UserId};
use crate::repository::SlipRepository;
use crate::storage::SlipStorage;
use crate::Result;

impl<R: SlipRepository, S: SlipStorage> SlipService<R, S> {
    pub async fn slip_metrics(&self) -> Result<SlipMetrics> {
        self.slip_metrics_on(Utc::now().date_naive()).await
    }

    /// Metrics with the sales window ending on `today` (UTC).
    pub async fn slip_metrics_on(&self, today: NaiveDate) -> Result<SlipMetrics> {
        let totals = self.repo.slip_totals().await?;
        let rows = self.repo.approved_sales_since(window_start(today)).await?;
        Ok(SlipMetrics { totals, sales_by_day: fill_window(today, &rows) })
    }

    /// Most recent address per cart the user has used, newest first.
    pub async fn my_addresses(&self, user_id: UserId) -> Result<Vec<AddressRecord>> {
        let records = self.repo.address_records(user_id).await?;
        Ok(latest_per_cart(records))
    }

    /// Best address for a checkout: by cart first, then by a slip with the
    /// same amount created closest to `when` (default now).
    pub async fn resolve_address(
        &self, user_id: UserId, cart_id: Option<CartId>, amount: Option<Money>, when: Option<DateTime<Utc>>,
    ) -> Result<Option<String>> {
        let records = self.repo.address_records(user_id).await?;
        let address = resolve(&records, cart_id, amount, when.unwrap_or_else(Utc::now));
        tracing::debug!(user_id = %user_id, cart_id = ?cart_id, found = address.is_some(), "address resolved");
        Ok(address)
    }
}
