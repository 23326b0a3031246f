//! Parsing of the HDF interval CSV the portal hands out.

use crate::error::{EsbError, ParseError};
use crate::model::Reading;
use serde_derive::Deserialize;

/// Every valid download starts with the MPRN column header.
pub const CSV_PREFIX: &str = "MPRN";

const READ_VALUE_COLUMN: &str = "Read Value";

#[derive(Deserialize)]
struct UsageRow {
    #[serde(rename = "Read Value", default)]
    read_value: Option<String>,
    #[serde(rename = "Read Type", default)]
    read_type: String,
    #[serde(rename = "Read Date and End Time", default)]
    date: String,
}

/// Parses the CSV body into readings, skipping rows whose value is not a number.
///
/// A download without a `Read Value` column yields zero usage for every row. When the
/// column exists, an empty cell is treated like any other unparsable value.
pub fn parse_usage_csv(body: &str) -> Result<Vec<Reading>, EsbError> {
    if !body.starts_with(CSV_PREFIX) {
        let head: String = body.chars().take(40).collect();
        return Err(EsbError::invalid_csv(format!(
            "expected '{}' header, got '{}'",
            CSV_PREFIX, head
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let has_value_column = reader
        .headers()
        .map_err(ParseError::csv)?
        .iter()
        .any(|column| column == READ_VALUE_COLUMN);

    let mut readings = Vec::new();
    for (index, row) in reader.deserialize::<UsageRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(
                    row = index + 1,
                    error = %ParseError::csv(err),
                    "Error parsing row"
                );
                continue;
            }
        };
        let usage = match row.read_value.as_deref() {
            None | Some("") if !has_value_column => 0.0,
            None | Some("") => {
                tracing::warn!(
                    row = index + 1,
                    error = %ParseError::number_parse("", "empty value"),
                    "Error parsing row"
                );
                continue;
            }
            Some(text) => match text.parse::<f64>() {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        row = index + 1,
                        error = %ParseError::number_parse(text, err),
                        "Error parsing row"
                    );
                    continue;
                }
            },
        };
        readings.push(Reading {
            date: row.date,
            usage,
            read_type: row.read_type,
        });
    }

    Ok(readings)
}
