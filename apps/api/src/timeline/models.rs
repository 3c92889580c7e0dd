use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// One location event as returned by the analytics store.
///
/// `bucket_timestamp` is already truncated to the start of its interval
/// upstream and is treated as an opaque, lexically sortable key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub bucket_timestamp: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl RawObservation {
    pub fn new(
        bucket_timestamp: impl Into<String>,
        user_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            bucket_timestamp: bucket_timestamp.into(),
            user_id: user_id.into(),
            latitude,
            longitude,
        }
    }

    /// Rows failing this check are dropped by the aggregator and never
    /// counted as users.
    pub fn is_valid(&self) -> bool {
        !self.user_id.is_empty()
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && (MIN_LATITUDE..=MAX_LATITUDE).contains(&self.latitude)
            && (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&self.longitude)
    }

    pub fn position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// A fixed-width time slice holding every position observed in it.
///
/// `positions` is never empty and keeps input order. `user_count` counts
/// distinct users, so it never exceeds `positions.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub bucket_timestamp: String,
    pub positions: Vec<Position>,
    pub user_count: usize,
    pub centroid: Position,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub total_unique_users: usize,
    pub total_intervals: usize,
    pub peak_user_count: usize,
    pub peak_bucket_timestamp: Option<String>,
    pub observed_range_start: Option<String>,
    pub observed_range_end: Option<String>,
}

/// Interval list and summary produced together by one aggregation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub intervals: Vec<Interval>,
    pub summary: TimelineSummary,
}

/// How rows from the same user inside one bucket weigh on the centroid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentroidWeighting {
    /// Every raw row pulls the centroid equally.
    #[default]
    PerRow,
    /// Each user's rows are averaged first; users then weigh equally.
    PerUser,
}

impl FromStr for CentroidWeighting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_row" => Ok(CentroidWeighting::PerRow),
            "per_user" => Ok(CentroidWeighting::PerUser),
            other => Err(format!(
                "unknown centroid weighting '{other}' (expected per_row or per_user)"
            )),
        }
    }
}

impl fmt::Display for CentroidWeighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentroidWeighting::PerRow => write!(f, "per_row"),
            CentroidWeighting::PerUser => write!(f, "per_user"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_observation() {
        assert!(RawObservation::new("T1", "u1", -33.9, 18.4).is_valid());
        assert!(RawObservation::new("T1", "u1", 90.0, -180.0).is_valid());
    }

    #[test]
    fn test_out_of_range_coordinates_invalid() {
        assert!(!RawObservation::new("T1", "u1", 90.5, 0.0).is_valid());
        assert!(!RawObservation::new("T1", "u1", 0.0, 181.0).is_valid());
        assert!(!RawObservation::new("T1", "u1", f64::NAN, 0.0).is_valid());
        assert!(!RawObservation::new("T1", "u1", 0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_missing_user_invalid() {
        assert!(!RawObservation::new("T1", "", 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_centroid_weighting_parse() {
        assert_eq!(
            "per_row".parse::<CentroidWeighting>().unwrap(),
            CentroidWeighting::PerRow
        );
        assert_eq!(
            " PER_USER ".parse::<CentroidWeighting>().unwrap(),
            CentroidWeighting::PerUser
        );
        assert!("mean".parse::<CentroidWeighting>().is_err());
    }

    #[test]
    fn test_summary_serializes_missing_peak_as_null() {
        let json = serde_json::to_value(TimelineSummary::default()).unwrap();
        assert_eq!(json["peak_user_count"], 0);
        assert!(json["peak_bucket_timestamp"].is_null());
        assert!(json["observed_range_start"].is_null());
    }
}
