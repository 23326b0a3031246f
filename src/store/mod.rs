//! Long-term statistics stores the importer can hand records to.

mod home_assistant;
mod influxdb;

use crate::error::StorageError;
use crate::model::{LastStatistic, StatisticMetadata, StatisticRecord};
use async_trait::async_trait;

pub use home_assistant::HomeAssistantStore;
pub use influxdb::InfluxStore;

/// The host platform's external statistics store.
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Most recent statistic stored under `statistic_id`, if any.
    async fn last_statistic(
        &self,
        statistic_id: &str,
    ) -> Result<Option<LastStatistic>, StorageError>;

    /// Adds (or overwrites) hourly records of an external statistic.
    async fn add_external_statistics(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), StorageError>;
}
