use crate::error::StorageError;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use influxdb2::models::DataPoint;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Statistic source name shared by every meter.
pub const STATISTIC_SOURCE: &str = "esb";

/// InfluxDB measurement the hourly statistics are written to.
pub const STATISTICS_MEASUREMENT: &str = "energy_statistics";

/// Trait for types that can be converted to InfluxDB data points.
pub trait DataPointBuilder: Send + Sync {
    /// Converts the value into an InfluxDB DataPoint.
    fn to_point(&self, metadata: &StatisticMetadata) -> Result<DataPoint, StorageError>;
}

/// One interval reading from the ESB usage CSV.
///
/// `date` is kept as the portal's "Read Date and End Time" text (`DD-MM-YYYY HH:MM`,
/// local wall clock); the importer parses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub date: String,
    pub usage: f64,
    #[serde(rename = "type")]
    pub read_type: String,
}

/// Result of one portal scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageData {
    pub total_usage: f64,
    pub readings: Vec<Reading>,
    pub last_updated: DateTime<Local>,
}

impl UsageData {
    pub fn from_readings(readings: Vec<Reading>) -> Self {
        let total_usage = readings.iter().map(|r| r.usage).sum();
        Self {
            total_usage,
            readings,
            last_updated: Local::now(),
        }
    }

    pub fn has_readings(&self) -> bool {
        !self.readings.is_empty()
    }
}

/// Units the statistics are recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    KilowattHour,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unit::KilowattHour => write!(f, "kWh"),
        }
    }
}

/// Describes the external statistic series of one meter.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticMetadata {
    pub statistic_id: String,
    pub source: String,
    pub name: String,
    pub unit_of_measurement: Unit,
    pub has_sum: bool,
    pub has_mean: bool,
}

impl StatisticMetadata {
    pub fn for_meter(mprn: &str) -> Self {
        Self {
            statistic_id: statistic_id(mprn),
            source: STATISTIC_SOURCE.to_string(),
            name: format!("ESB Energy {}", mprn),
            unit_of_measurement: Unit::KilowattHour,
            has_sum: true,
            has_mean: false,
        }
    }
}

/// Stable identifier of a meter's consumption statistic, e.g. `esb:esb_100..._consumption`.
pub fn statistic_id(mprn: &str) -> String {
    format!("{}:esb_{}_consumption", STATISTIC_SOURCE, mprn)
}

/// One hourly statistic row.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticRecord {
    /// Top of the hour, in the meter's local time zone
    pub start: DateTime<Tz>,
    /// Energy used during the hour (kWh)
    pub state: f64,
    /// Running total including this hour (kWh)
    pub sum: f64,
}

impl DataPointBuilder for StatisticRecord {
    fn to_point(&self, metadata: &StatisticMetadata) -> Result<DataPoint, StorageError> {
        let timestamp = self
            .start
            .timestamp_nanos_opt()
            .ok_or_else(|| StorageError::protocol("Timestamp overflow"))?;
        match DataPoint::builder(STATISTICS_MEASUREMENT)
            .tag("statistic_id", metadata.statistic_id.clone())
            .tag("source", metadata.source.clone())
            .field("state", self.state)
            .field("sum", self.sum)
            .timestamp(timestamp)
            .build()
        {
            Ok(point) => Ok(point),
            Err(e) => Err(StorageError::protocol(format!(
                "Failed to build DataPoint: {}",
                e
            ))),
        }
    }
}

/// The most recent statistic already held by the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastStatistic {
    pub start: DateTime<Utc>,
    pub sum: f64,
}
