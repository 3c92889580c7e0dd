use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const UPSTREAM_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where the event sits on the wall clock and how far around it to look.
#[derive(Debug, Clone)]
pub struct WindowSettings {
    /// Local start time of the event.
    pub start_time: NaiveTime,
    /// Offset of the event's local time from UTC.
    pub utc_offset_minutes: i32,
    pub margin_before_minutes: i64,
    pub duration_after_minutes: i64,
}

/// UTC bounds of the upstream query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    /// Formats the bounds the way HogQL's `toDateTime` expects them.
    pub fn upstream_bounds(&self) -> (String, String) {
        (
            self.start.format(UPSTREAM_TIME_FORMAT).to_string(),
            self.end.format(UPSTREAM_TIME_FORMAT).to_string(),
        )
    }
}

/// Accepts exactly `YYYY-MM-DD` naming a real calendar date.
pub fn parse_event_date(raw: &str) -> Result<NaiveDate, AppError> {
    let invalid = || AppError::Validation("Invalid date format. Use YYYY-MM-DD.".to_string());

    let bytes = raw.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return Err(invalid());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())
}

/// Parses an `HH:MM` wall-clock time.
pub fn parse_start_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| format!("'{raw}' is not a valid HH:MM time: {e}"))
}

/// Longest margin accepted on either side of the event start (one week).
pub const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;
const MAX_UTC_OFFSET_MINUTES: u32 = 24 * 60;

impl WindowSettings {
    /// Rejects settings that would overflow or produce an inverted window.
    pub fn validate(&self) -> Result<(), String> {
        if self.utc_offset_minutes.unsigned_abs() >= MAX_UTC_OFFSET_MINUTES {
            return Err(format!(
                "UTC offset of {} minutes must be within ±24h",
                self.utc_offset_minutes
            ));
        }
        for (name, minutes) in [
            ("margin before", self.margin_before_minutes),
            ("duration after", self.duration_after_minutes),
        ] {
            if !(0..=MAX_WINDOW_MINUTES).contains(&minutes) {
                return Err(format!(
                    "window {name} of {minutes} minutes must be between 0 and {MAX_WINDOW_MINUTES}"
                ));
            }
        }
        Ok(())
    }
}

/// Converts the event's local start on `date` to UTC and widens it by the
/// configured margins.
pub fn query_window(date: NaiveDate, settings: &WindowSettings) -> Result<QueryWindow, AppError> {
    settings
        .validate()
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let offset = settings
        .utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "UTC offset of {} minutes is out of range",
                settings.utc_offset_minutes
            ))
        })?;

    let local_start = date.and_time(settings.start_time);
    let start_utc = offset
        .from_local_datetime(&local_start)
        .single()
        .ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("ambiguous local start time {local_start}"))
        })?
        .with_timezone(&Utc);

    let overflow =
        || AppError::Internal(anyhow::anyhow!("query window around {start_utc} overflows"));
    let start = Duration::try_minutes(settings.margin_before_minutes)
        .and_then(|d| start_utc.checked_sub_signed(d))
        .ok_or_else(overflow)?;
    let end = Duration::try_minutes(settings.duration_after_minutes)
        .and_then(|d| start_utc.checked_add_signed(d))
        .ok_or_else(overflow)?;

    Ok(QueryWindow { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> WindowSettings {
        WindowSettings {
            start_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            utc_offset_minutes: 120,
            margin_before_minutes: 30,
            duration_after_minutes: 240,
        }
    }

    #[test]
    fn test_valid_date() {
        assert_eq!(
            parse_event_date("2025-10-31").unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 31).unwrap()
        );
    }

    #[test]
    fn test_rejects_non_conforming_dates() {
        for raw in [
            "2025-1-31",
            "31-10-2025",
            "2025/10/31",
            "2025-10-31T00:00",
            "",
            "2025-02-30",
            "2025-13-01",
            " 2025-10-31",
        ] {
            assert!(
                matches!(parse_event_date(raw), Err(AppError::Validation(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn test_window_converts_local_start_to_utc() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let window = query_window(date, &settings()).unwrap();
        let (start, end) = window.upstream_bounds();
        // 16:00 at UTC+2 is 14:00 UTC; 30 minutes before and 4 hours after.
        assert_eq!(start, "2025-10-31 13:30:00");
        assert_eq!(end, "2025-10-31 18:00:00");
    }

    #[test]
    fn test_window_crosses_midnight() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let s = WindowSettings {
            start_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            ..settings()
        };
        let (start, end) = query_window(date, &s).unwrap().upstream_bounds();
        assert_eq!(start, "2025-10-30 22:30:00");
        assert_eq!(end, "2025-10-31 03:00:00");
    }

    #[test]
    fn test_negative_offset() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let s = WindowSettings {
            utc_offset_minutes: -300,
            margin_before_minutes: 0,
            duration_after_minutes: 60,
            ..settings()
        };
        let (start, end) = query_window(date, &s).unwrap().upstream_bounds();
        assert_eq!(start, "2025-10-31 21:00:00");
        assert_eq!(end, "2025-10-31 22:00:00");
    }

    #[test]
    fn test_out_of_range_offset_is_internal_error() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let s = WindowSettings {
            utc_offset_minutes: 24 * 60,
            ..settings()
        };
        assert!(matches!(query_window(date, &s), Err(AppError::Internal(_))));
    }

    #[test]
    fn test_huge_margin_is_error_not_panic() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        for s in [
            WindowSettings {
                margin_before_minutes: i64::MAX / 2,
                ..settings()
            },
            WindowSettings {
                duration_after_minutes: i64::MAX,
                ..settings()
            },
            WindowSettings {
                utc_offset_minutes: i32::MAX,
                ..settings()
            },
            WindowSettings {
                utc_offset_minutes: i32::MIN,
                ..settings()
            },
        ] {
            assert!(matches!(query_window(date, &s), Err(AppError::Internal(_))));
        }
    }

    #[test]
    fn test_negative_margin_rejected_instead_of_inverting_window() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let s = WindowSettings {
            margin_before_minutes: -600,
            ..settings()
        };
        assert!(s.validate().is_err());
        assert!(matches!(query_window(date, &s), Err(AppError::Internal(_))));
    }

    #[test]
    fn test_validate_accepts_bounds() {
        let s = WindowSettings {
            utc_offset_minutes: -(23 * 60 + 59),
            margin_before_minutes: 0,
            duration_after_minutes: MAX_WINDOW_MINUTES,
            ..settings()
        };
        assert!(s.validate().is_ok());
        let date = NaiveDate::from_ymd_opt(2025, 10, 31).unwrap();
        let window = query_window(date, &s).unwrap();
        assert!(window.start < window.end);
    }

    #[test]
    fn test_parse_start_time() {
        assert_eq!(
            parse_start_time("16:30").unwrap(),
            NaiveTime::from_hms_opt(16, 30, 0).unwrap()
        );
        assert!(parse_start_time("4pm").is_err());
        assert!(parse_start_time("25:00").is_err());
    }
}
