use crate::config::InfluxConfig;
use crate::error::StorageError;
use crate::model::{
    DataPointBuilder, LastStatistic, StatisticMetadata, StatisticRecord, STATISTICS_MEASUREMENT,
};
use crate::store::StatisticsStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::prelude::stream;
use serde_derive::Deserialize;

/// Keeps hourly statistics in an InfluxDB 2 bucket.
///
/// Points are tagged with `statistic_id` and `source` and carry `state` and `sum`
/// fields, timestamped at the start of the hour. Writing a point again for the same
/// hour replaces it.
pub struct InfluxStore {
    client: influxdb2::Client,
    http: reqwest::Client,
    config: InfluxConfig,
}

#[derive(Debug, Deserialize)]
struct SumRow {
    #[serde(rename = "_time")]
    time: String,
    #[serde(rename = "_value")]
    value: f64,
}

impl InfluxStore {
    pub fn new(config: InfluxConfig) -> Self {
        let client = influxdb2::Client::new(
            config.url.clone(),
            config.org.clone(),
            config.token.clone(),
        );
        Self {
            client,
            http: reqwest::Client::new(),
            config,
        }
    }

    fn last_sum_query(&self, statistic_id: &str) -> String {
        format!(
            r#"from(bucket: "{bucket}")
  |> range(start: -{days}d)
  |> filter(fn: (r) => r._measurement == "{measurement}" and r.statistic_id == "{id}" and r._field == "sum")
  |> last()"#,
            bucket = self.config.bucket,
            days = self.config.lookback_days,
            measurement = STATISTICS_MEASUREMENT,
            id = statistic_id,
        )
    }

    async fn query_csv(&self, query: String) -> Result<String, StorageError> {
        let url = format!("{}/api/v2/query", self.config.url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        match status.as_u16() {
            200..=299 => Ok(body),
            401 | 403 => Err(StorageError::AuthFailed(body)),
            code => Err(StorageError::QueryFailed(format!("status {}: {}", code, body))),
        }
    }
}

fn parse_last_sum(body: &str) -> Result<Option<LastStatistic>, StorageError> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut last = None;
    for row in reader.deserialize::<SumRow>() {
        let row = row.map_err(|e| StorageError::QueryFailed(format!("invalid CSV: {}", e)))?;
        let start = DateTime::parse_from_rfc3339(&row.time)
            .map_err(|e| StorageError::QueryFailed(format!("invalid _time '{}': {}", row.time, e)))?
            .with_timezone(&Utc);
        last = Some(LastStatistic {
            start,
            sum: row.value,
        });
    }
    Ok(last)
}

#[async_trait]
impl StatisticsStore for InfluxStore {
    async fn last_statistic(
        &self,
        statistic_id: &str,
    ) -> Result<Option<LastStatistic>, StorageError> {
        let body = self.query_csv(self.last_sum_query(statistic_id)).await?;
        parse_last_sum(&body)
    }

    async fn add_external_statistics(
        &self,
        metadata: &StatisticMetadata,
        records: &[StatisticRecord],
    ) -> Result<(), StorageError> {
        let points = records
            .iter()
            .map(|record| record.to_point(metadata))
            .collect::<Result<Vec<_>, _>>()?;

        self.client
            .write(self.config.bucket.as_str(), stream::iter(points))
            .await
            .map_err(|err| StorageError::write_failed(records.len(), err))?;

        tracing::info!(
            statistic_id = %metadata.statistic_id,
            bucket = %self.config.bucket,
            count = records.len(),
            "Wrote statistics to InfluxDB"
        );
        Ok(())
    }
}
