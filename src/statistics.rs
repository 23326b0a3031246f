//! Conversion of interval readings into hourly external statistics.
//!
//! Readings are summed per local hour, then turned into records whose `sum` carries on
//! from the last statistic the store already holds, so repeated imports of an
//! overlapping download never count an hour twice.

use crate::error::{ParseError, StorageError};
use crate::model::{LastStatistic, Reading, StatisticMetadata, StatisticRecord, UsageData};
use crate::store::StatisticsStore;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Format of the CSV's "Read Date and End Time" column.
pub const READING_DATE_FORMAT: &str = "%d-%m-%Y %H:%M";

const LOGGED_PARSE_ERRORS: usize = 5;

/// Usage per local hour, plus how many readings could not be placed.
#[derive(Debug, Default)]
pub struct HourlyUsage {
    pub buckets: BTreeMap<DateTime<Tz>, f64>,
    pub parse_errors: usize,
}

/// Parses a reading time and floors it to the top of its local hour.
///
/// Wall-clock times that occur twice when clocks go back resolve to the earlier
/// instant. An hour skipped when clocks go forward maps to the hour after the jump.
pub fn reading_hour(date: &str, tz: Tz) -> Result<DateTime<Tz>, ParseError> {
    let naive = NaiveDateTime::parse_from_str(date, READING_DATE_FORMAT)
        .map_err(|e| ParseError::datetime_parse(date, e))?;
    let hour = naive
        .date()
        .and_hms_opt(naive.hour(), 0, 0)
        .ok_or_else(|| ParseError::datetime_parse(date, "hour out of range"))?;
    tz.from_local_datetime(&hour)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(hour + Duration::hours(1))).earliest())
        .ok_or_else(|| {
            ParseError::datetime_parse(date, format!("local time does not exist in {}", tz.name()))
        })
}

pub fn bucket_hourly(readings: &[Reading], tz: Tz) -> HourlyUsage {
    let mut hourly = HourlyUsage::default();

    for reading in readings {
        if reading.date.is_empty() {
            hourly.parse_errors += 1;
            continue;
        }
        match reading_hour(&reading.date, tz) {
            Ok(hour) => *hourly.buckets.entry(hour).or_insert(0.0) += reading.usage,
            Err(err) => {
                if hourly.parse_errors < LOGGED_PARSE_ERRORS {
                    tracing::warn!(error = %err, "Could not parse reading date");
                }
                hourly.parse_errors += 1;
            }
        }
    }

    hourly
}

/// Decides where the running sum resumes.
///
/// A stored statistic whose sum is zero carries no real data, so it is ignored.
pub fn continuation_point(last: Option<LastStatistic>) -> Option<LastStatistic> {
    match last {
        Some(last) if last.sum == 0.0 => {
            tracing::info!("Last statistic has sum=0, treating as no previous data");
            None
        }
        Some(last) => {
            tracing::info!(start = %last.start, sum = last.sum, "Last imported statistic");
            Some(last)
        }
        None => {
            tracing::info!("No previous statistics found, importing all data");
            None
        }
    }
}

/// Builds the records for every hour after `resume_from`, returning them with the
/// number of hours skipped as already stored.
pub fn build_statistics(
    hourly: &BTreeMap<DateTime<Tz>, f64>,
    resume_from: Option<LastStatistic>,
) -> (Vec<StatisticRecord>, usize) {
    let last_start: Option<DateTime<Utc>> = resume_from.map(|l| l.start);
    let mut cumulative = resume_from.map(|l| l.sum).unwrap_or(0.0);
    let mut records = Vec::with_capacity(hourly.len());
    let mut skipped = 0;

    for (start, usage) in hourly {
        if let Some(last_start) = last_start {
            if start.with_timezone(&Utc) <= last_start {
                skipped += 1;
                continue;
            }
        }
        cumulative += usage;
        records.push(StatisticRecord {
            start: *start,
            state: *usage,
            sum: cumulative,
        });
    }

    (records, skipped)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub parse_errors: usize,
}

/// Imports a meter's readings into the statistics store.
pub struct StatisticsImporter {
    store: Arc<dyn StatisticsStore>,
    tz: Tz,
}

impl StatisticsImporter {
    pub fn new(store: Arc<dyn StatisticsStore>, tz: Tz) -> Self {
        Self { store, tz }
    }

    pub async fn import(&self, mprn: &str, usage: &UsageData) -> Result<ImportSummary, StorageError> {
        let metadata = StatisticMetadata::for_meter(mprn);
        tracing::info!(
            statistic_id = %metadata.statistic_id,
            readings = usage.readings.len(),
            "Starting statistics import"
        );

        let last = self.store.last_statistic(&metadata.statistic_id).await?;
        let resume_from = continuation_point(last);

        let hourly = bucket_hourly(&usage.readings, self.tz);
        let (records, skipped) = build_statistics(&hourly.buckets, resume_from);
        let summary = ImportSummary {
            imported: records.len(),
            skipped,
            parse_errors: hourly.parse_errors,
        };
        tracing::info!(
            new = summary.imported,
            skipped = summary.skipped,
            errors = summary.parse_errors,
            "Statistics summary"
        );

        match (records.first(), records.last()) {
            (Some(first), Some(last)) => {
                tracing::info!(
                    mprn,
                    count = records.len(),
                    from = %first.start,
                    to = %last.start,
                    "Importing statistics"
                );
                self.store
                    .add_external_statistics(&metadata, &records)
                    .await?;
            }
            _ => tracing::warn!(mprn, "No statistics to import"),
        }

        Ok(summary)
    }
}
