//! Translation from upstream result rows to `RawObservation`.
//!
//! Column order differs between deployments, so it is fixed by a
//! `ColumnLayout` chosen in config. The HogQL builder emits its columns in
//! the same order, so one setting governs both ends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::timeline::models::RawObservation;

/// Both layouts carry four mapped columns; anything after is ignored.
const MIN_COLUMNS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnLayout {
    /// `(bucket, user, lat, lng, ...)`
    #[default]
    TimeUserLatLng,
    /// `(bucket, lat, lng, user, ...)`
    TimeLatLngUser,
}

/// Positions of each field within a result row.
struct ColumnIndices {
    bucket: usize,
    user: usize,
    latitude: usize,
    longitude: usize,
}

impl ColumnLayout {
    fn indices(self) -> ColumnIndices {
        match self {
            ColumnLayout::TimeUserLatLng => ColumnIndices {
                bucket: 0,
                user: 1,
                latitude: 2,
                longitude: 3,
            },
            ColumnLayout::TimeLatLngUser => ColumnIndices {
                bucket: 0,
                latitude: 1,
                longitude: 2,
                user: 3,
            },
        }
    }
}

impl FromStr for ColumnLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "time_user_lat_lng" => Ok(ColumnLayout::TimeUserLatLng),
            "time_lat_lng_user" => Ok(ColumnLayout::TimeLatLngUser),
            other => Err(format!(
                "unknown column layout '{other}' (expected time_user_lat_lng or time_lat_lng_user)"
            )),
        }
    }
}

impl fmt::Display for ColumnLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnLayout::TimeUserLatLng => write!(f, "time_user_lat_lng"),
            ColumnLayout::TimeLatLngUser => write!(f, "time_lat_lng_user"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("row has {found} columns, expected at least {expected}")]
    TooShort { found: usize, expected: usize },

    #[error("bucket timestamp is not a string")]
    BadTimestamp,

    #[error("user id is missing")]
    MissingUser,

    #[error("{field} is not numeric")]
    NonNumeric { field: &'static str },
}

/// Maps one result row. Coordinates may be JSON numbers or numeric
/// strings; user ids may be strings or numbers.
pub fn map_row(row: &[Value], layout: ColumnLayout) -> Result<RawObservation, RowError> {
    if row.len() < MIN_COLUMNS {
        return Err(RowError::TooShort {
            found: row.len(),
            expected: MIN_COLUMNS,
        });
    }
    let idx = layout.indices();

    let bucket_timestamp = row[idx.bucket]
        .as_str()
        .ok_or(RowError::BadTimestamp)?
        .to_string();

    let user_id = match &row[idx.user] {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(RowError::MissingUser),
    };

    let latitude = numeric(&row[idx.latitude], "latitude")?;
    let longitude = numeric(&row[idx.longitude], "longitude")?;

    Ok(RawObservation::new(bucket_timestamp, user_id, latitude, longitude))
}

/// Maps every row, skipping and logging the ones that cannot be mapped.
pub fn map_rows(rows: &[Vec<Value>], layout: ColumnLayout) -> Vec<RawObservation> {
    let mut skipped = 0usize;
    let observations = rows
        .iter()
        .filter_map(|row| match map_row(row, layout) {
            Ok(obs) => Some(obs),
            Err(e) => {
                if skipped == 0 {
                    warn!("Skipping malformed timeline row ({e}): {row:?}");
                }
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        warn!("Skipped {skipped} of {} timeline rows", rows.len());
    }
    observations
}

fn numeric(value: &Value, field: &'static str) -> Result<f64, RowError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(RowError::NonNumeric { field }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RowError::NonNumeric { field }),
        _ => Err(RowError::NonNumeric { field }),
    }
}
