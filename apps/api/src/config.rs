use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;

use crate::timeline::adapter::ColumnLayout;
use crate::timeline::models::CentroidWeighting;
use crate::timeline::window::{parse_start_time, WindowSettings};

const DEFAULT_POSTHOG_HOST: &str = "https://us.posthog.com";

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub posthog_host: String,
    pub posthog_project_id: String,
    pub posthog_personal_api_key: String,
    /// Scopes upstream events to this deployment.
    pub neighborhood: String,
    /// Date served when a request omits `date`.
    pub default_event_date: String,
    pub event_start_time: NaiveTime,
    pub event_utc_offset_minutes: i32,
    pub window_margin_before_minutes: i64,
    pub window_duration_after_minutes: i64,
    pub bucket_minutes: u32,
    pub query_row_limit: u32,
    pub column_layout: ColumnLayout,
    pub centroid_weighting: CentroidWeighting,
    pub redis_url: Option<String>,
    pub timeline_cache_ttl_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let event_start_time = parse_start_time(&optional_env("EVENT_START_TIME", "16:00"))
            .map_err(|e| anyhow!("EVENT_START_TIME: {e}"))?;

        let bucket_minutes: u32 = parse_env("BUCKET_MINUTES", 5)?;
        if bucket_minutes == 0 {
            return Err(anyhow!("BUCKET_MINUTES must be greater than zero"));
        }

        let config = Config {
            posthog_host: optional_env("POSTHOG_HOST", DEFAULT_POSTHOG_HOST),
            posthog_project_id: require_env("POSTHOG_PROJECT_ID")?,
            posthog_personal_api_key: require_env("POSTHOG_PERSONAL_API_KEY")?,
            neighborhood: optional_env("NEIGHBORHOOD_NAME", "Unknown"),
            default_event_date: optional_env("EVENT_DATE", "2025-10-31"),
            event_start_time,
            event_utc_offset_minutes: parse_env("EVENT_UTC_OFFSET_MINUTES", 120)?,
            window_margin_before_minutes: parse_env("WINDOW_MARGIN_BEFORE_MINUTES", 30)?,
            window_duration_after_minutes: parse_env("WINDOW_DURATION_AFTER_MINUTES", 240)?,
            bucket_minutes,
            query_row_limit: parse_env("QUERY_ROW_LIMIT", 10_000)?,
            column_layout: parse_env("COLUMN_LAYOUT", ColumnLayout::default())?,
            centroid_weighting: parse_env("CENTROID_WEIGHTING", CentroidWeighting::default())?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            timeline_cache_ttl_secs: parse_env("TIMELINE_CACHE_TTL_SECS", 30)?,
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG", "info"),
        };

        config.window_settings().validate().map_err(|e| {
            anyhow!("EVENT_UTC_OFFSET_MINUTES / WINDOW_MARGIN_BEFORE_MINUTES / WINDOW_DURATION_AFTER_MINUTES: {e}")
        })?;

        Ok(config)
    }

    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings {
            start_time: self.event_start_time,
            utc_offset_minutes: self.event_utc_offset_minutes,
            margin_before_minutes: self.window_margin_before_minutes,
            duration_after_minutes: self.window_duration_after_minutes,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow!("{key} has invalid value '{raw}': {e}"))
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Config {
            posthog_host: DEFAULT_POSTHOG_HOST.to_string(),
            posthog_project_id: "12345".to_string(),
            posthog_personal_api_key: "phx_testkey123".to_string(),
            neighborhood: "Observatory".to_string(),
            default_event_date: "2025-10-31".to_string(),
            event_start_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            event_utc_offset_minutes: 120,
            window_margin_before_minutes: 30,
            window_duration_after_minutes: 240,
            bucket_minutes: 5,
            query_row_limit: 10_000,
            column_layout: ColumnLayout::TimeUserLatLng,
            centroid_weighting: CentroidWeighting::PerRow,
            redis_url: None,
            timeline_cache_ttl_secs: 30,
            port: 8080,
            rust_log: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_numeric() {
        assert_eq!(parse_value::<u16>("PORT", " 9090 ").unwrap(), 9090);
        assert_eq!(parse_value::<i32>("EVENT_UTC_OFFSET_MINUTES", "-300").unwrap(), -300);
    }

    #[test]
    fn test_parse_value_error_names_variable() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"), "{err}");
    }

    #[test]
    fn test_parse_value_enums() {
        assert_eq!(
            parse_value::<ColumnLayout>("COLUMN_LAYOUT", "time_lat_lng_user").unwrap(),
            ColumnLayout::TimeLatLngUser
        );
        assert_eq!(
            parse_value::<CentroidWeighting>("CENTROID_WEIGHTING", "per_user").unwrap(),
            CentroidWeighting::PerUser
        );
        assert!(parse_value::<CentroidWeighting>("CENTROID_WEIGHTING", "median").is_err());
    }

    #[test]
    fn test_out_of_range_window_settings_fail_validation() {
        let config = Config {
            window_margin_before_minutes: -30,
            ..Config::for_tests()
        };
        assert!(config.window_settings().validate().is_err());

        let config = Config {
            event_utc_offset_minutes: 24 * 60,
            ..Config::for_tests()
        };
        assert!(config.window_settings().validate().is_err());

        assert!(Config::for_tests().window_settings().validate().is_ok());
    }

    #[test]
    fn test_window_settings_from_config() {
        let settings = Config::for_tests().window_settings();
        assert_eq!(settings.utc_offset_minutes, 120);
        assert_eq!(settings.margin_before_minutes, 30);
        assert_eq!(settings.duration_after_minutes, 240);
    }
}
