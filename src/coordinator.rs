use crate::error::UpdateError;
use crate::model::UsageData;
use crate::source::UsageSource;
use crate::statistics::StatisticsImporter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Schedules refreshes of one meter.
///
/// A refresh fetches the usage data through the configured source chain and hands any
/// readings to the statistics importer. The first cycle runs as soon as the task is
/// spawned, later cycles follow every `update_interval`.
pub struct UpdateCoordinator {
    mprn: String,
    source: Arc<dyn UsageSource>,
    importer: Arc<StatisticsImporter>,
    update_interval: Duration,
    timeout_seconds: u64,
}

impl UpdateCoordinator {
    pub fn new(
        mprn: impl Into<String>,
        source: Arc<dyn UsageSource>,
        importer: Arc<StatisticsImporter>,
        update_interval: Duration,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            mprn: mprn.into(),
            source,
            importer,
            update_interval,
            timeout_seconds,
        }
    }

    pub fn mprn(&self) -> &str {
        &self.mprn
    }

    /// Fetches fresh usage data and imports it.
    ///
    /// Only fetch failures fail the refresh; a failed import is logged and the
    /// fetched data is still returned.
    pub async fn refresh(&self) -> Result<UsageData, UpdateError> {
        tracing::info!(mprn = %self.mprn, "Refreshing usage data");
        let data = self.source.fetch_usage().await?;

        if !data.has_readings() {
            tracing::warn!(mprn = %self.mprn, "No readings returned, nothing to import");
            return Ok(data);
        }

        match self.importer.import(&self.mprn, &data).await {
            Ok(summary) => tracing::info!(
                mprn = %self.mprn,
                imported = summary.imported,
                skipped = summary.skipped,
                parse_errors = summary.parse_errors,
                "Refresh complete"
            ),
            Err(err) => tracing::error!(
                mprn = %self.mprn,
                error = %err,
                "Failed to import statistics"
            ),
        }
        Ok(data)
    }

    pub async fn refresh_with_timeout(&self) -> Result<UsageData, UpdateError> {
        match timeout(Duration::from_secs(self.timeout_seconds), self.refresh()).await {
            Ok(result) => result,
            Err(_) => Err(UpdateError::Timeout {
                mprn: self.mprn.clone(),
                timeout: self.timeout_seconds,
            }),
        }
    }

    /// Runs one refresh, then waits out the update interval.
    pub async fn run_cycle(&self) {
        match self.refresh_with_timeout().await {
            Ok(data) => tracing::debug!(
                mprn = %self.mprn,
                readings = data.readings.len(),
                total_usage = data.total_usage,
                "Update succeeded"
            ),
            Err(err) => tracing::error!(mprn = %self.mprn, error = %err, "Update failed"),
        }
        sleep(self.update_interval).await;
    }
}
