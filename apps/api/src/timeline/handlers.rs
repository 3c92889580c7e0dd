//! Axum route handler for the movement timeline.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::posthog_client::queries::{movement_timeline_query, MovementQuery};
use crate::state::AppState;
use crate::timeline::adapter::map_rows;
use crate::timeline::cache::cache_key;
use crate::timeline::models::{Interval, Timeline, TimelineSummary};
use crate::timeline::summary::build_timeline;
use crate::timeline::window::{parse_event_date, query_window, QueryWindow};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineResponse {
    pub timeline: Vec<Interval>,
    pub summary: TimelineSummary,
    pub date: String,
    pub neighborhood: String,
    /// The window that was asked of the upstream. `summary` reports the
    /// range actually present in the data.
    pub requested_window: QueryWindow,
    pub generated_at: DateTime<Utc>,
}

impl TimelineResponse {
    pub fn new(
        timeline: Timeline,
        date: String,
        neighborhood: String,
        requested_window: QueryWindow,
    ) -> Self {
        Self {
            timeline: timeline.intervals,
            summary: timeline.summary,
            date,
            neighborhood,
            requested_window,
            generated_at: Utc::now(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/analytics/movement-timeline?date=YYYY-MM-DD
///
/// Returns per-interval user positions for animated playback, plus summary
/// statistics. `date` defaults to the configured event date.
pub async fn handle_movement_timeline(
    State(state): State<AppState>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<TimelineResponse>, AppError> {
    let date_param = params
        .date
        .unwrap_or_else(|| state.config.default_event_date.clone());
    let date = parse_event_date(&date_param)?;

    let key = cache_key(&state.config.neighborhood, &date_param);
    if let Some(cached) = state.timeline_cache.get(&key).await {
        debug!("Serving movement timeline for {date_param} from cache");
        return Ok(Json(cached));
    }

    let response = load_timeline(&state, date).await?;
    state.timeline_cache.put(&key, &response).await;

    Ok(Json(response))
}

/// Queries the analytics store for `date` and aggregates the rows.
/// Upstream failures propagate; they never become an empty timeline.
async fn load_timeline(state: &AppState, date: NaiveDate) -> Result<TimelineResponse, AppError> {
    let config = &state.config;
    let window = query_window(date, &config.window_settings())?;

    let sql = movement_timeline_query(&MovementQuery {
        neighborhood: &config.neighborhood,
        window: &window,
        bucket_minutes: config.bucket_minutes,
        row_limit: config.query_row_limit,
        layout: config.column_layout,
    });

    let result = state.analytics.run_query(&sql).await?;

    if result.results.is_empty() {
        debug!(
            "Movement timeline query returned zero rows for {} ({} to {})",
            date, window.start, window.end
        );
    }

    if row_limit_reached(result.results.len(), config.query_row_limit) {
        warn!(
            "Movement timeline for {} hit the row limit of {}; later intervals are missing",
            date, config.query_row_limit
        );
    }

    let observations = map_rows(&result.results, config.column_layout);
    let timeline = build_timeline(&observations, config.centroid_weighting);

    info!(
        "Movement timeline for {}: {} rows -> {} intervals, {} unique users, peak {}",
        date,
        result.results.len(),
        timeline.summary.total_intervals,
        timeline.summary.total_unique_users,
        timeline.summary.peak_user_count
    );

    Ok(TimelineResponse::new(
        timeline,
        date.format("%Y-%m-%d").to_string(),
        config.neighborhood.clone(),
        window,
    ))
}

/// The upstream query stops at `LIMIT`, so a full page means truncation.
fn row_limit_reached(row_count: usize, limit: u32) -> bool {
    limit > 0 && row_count >= limit as usize
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use super::*;
    use crate::config::Config;
    use crate::posthog_client::{AnalyticsSource, PosthogError, QueryResult};
    use crate::timeline::cache::InMemoryTimelineCache;

    /// Canned upstream that records every query it receives.
    pub(crate) struct FakeSource {
        rows: Option<Vec<Vec<Value>>>,
        pub calls: AtomicUsize,
        pub queries: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub(crate) fn with_rows(rows: Vec<Vec<Value>>) -> Self {
            Self {
                rows: Some(rows),
                calls: AtomicUsize::new(0),
                queries: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                rows: None,
                calls: AtomicUsize::new(0),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnalyticsSource for FakeSource {
        async fn run_query(&self, hogql: &str) -> Result<QueryResult, PosthogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().push(hogql.to_string());
            match &self.rows {
                Some(rows) => Ok(QueryResult {
                    results: rows.clone(),
                    columns: vec![],
                }),
                None => Err(PosthogError::Api {
                    status: 403,
                    message: "permission denied".to_string(),
                }),
            }
        }
    }

    pub(crate) fn state_with(source: Arc<FakeSource>) -> AppState {
        AppState {
            config: Config::for_tests(),
            analytics: source,
            timeline_cache: Arc::new(InMemoryTimelineCache::new(Duration::from_secs(30))),
        }
    }

    fn rows(v: Value) -> Vec<Vec<Value>> {
        serde_json::from_value(v).unwrap()
    }

    fn params(date: Option<&str>) -> Query<TimelineParams> {
        Query(TimelineParams {
            date: date.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_aggregates_upstream_rows() {
        let source = Arc::new(FakeSource::with_rows(rows(json!([
            ["2025-10-31T14:00:00Z", "u1", 1.0, 1.0, 3],
            ["2025-10-31T14:00:00Z", "u2", 1.0, 1.0, 1],
            ["2025-10-31T14:05:00Z", "u1", "2.0", "2.0", 2]
        ]))));
        let state = state_with(source.clone());

        let Json(body) = handle_movement_timeline(State(state), params(Some("2025-10-31")))
            .await
            .unwrap();

        assert_eq!(body.timeline.len(), 2);
        assert_eq!(body.timeline[0].user_count, 2);
        assert_eq!(body.timeline[1].positions.len(), 1);
        assert_eq!(body.summary.total_unique_users, 2);
        assert_eq!(body.summary.peak_user_count, 2);
        assert_eq!(
            body.summary.peak_bucket_timestamp.as_deref(),
            Some("2025-10-31T14:00:00Z")
        );
        assert_eq!(
            body.summary.observed_range_end.as_deref(),
            Some("2025-10-31T14:05:00Z")
        );
        assert_eq!(body.date, "2025-10-31");
        assert_eq!(body.neighborhood, "Observatory");
    }

    #[tokio::test]
    async fn test_query_is_scoped_to_neighborhood_and_window() {
        let source = Arc::new(FakeSource::with_rows(vec![]));
        let state = state_with(source.clone());

        let Json(body) = handle_movement_timeline(State(state), params(Some("2025-10-31")))
            .await
            .unwrap();
        assert!(body.timeline.is_empty());

        let queries = source.queries.lock();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("properties.neighborhood = 'Observatory'"));
        assert!(queries[0].contains("toDateTime('2025-10-31 13:30:00')"));
        assert!(queries[0].contains("toDateTime('2025-10-31 18:00:00')"));
    }

    #[tokio::test]
    async fn test_invalid_date_rejected_before_query() {
        let source = Arc::new(FakeSource::with_rows(vec![]));
        let state = state_with(source.clone());

        let result = handle_movement_timeline(State(state), params(Some("10/31/2025"))).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_date_uses_configured_default() {
        let source = Arc::new(FakeSource::with_rows(vec![]));
        let state = state_with(source.clone());

        let Json(body) = handle_movement_timeline(State(state), params(None))
            .await
            .unwrap();
        assert_eq!(body.date, "2025-10-31");
    }

    #[tokio::test]
    async fn test_empty_rows_is_empty_timeline_not_error() {
        let source = Arc::new(FakeSource::with_rows(vec![]));
        let state = state_with(source);

        let Json(body) = handle_movement_timeline(State(state), params(Some("2025-10-31")))
            .await
            .unwrap();
        assert!(body.timeline.is_empty());
        assert_eq!(body.summary, TimelineSummary::default());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_distinct_and_not_cached() {
        let source = Arc::new(FakeSource::failing());
        let state = state_with(source.clone());

        let first = handle_movement_timeline(State(state.clone()), params(Some("2025-10-31"))).await;
        assert!(matches!(first, Err(AppError::Upstream(_))));

        let second = handle_movement_timeline(State(state), params(Some("2025-10-31"))).await;
        assert!(matches!(second, Err(AppError::Upstream(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeat_request_served_from_cache() {
        let source = Arc::new(FakeSource::with_rows(rows(json!([
            ["2025-10-31T14:00:00Z", "u1", 1.0, 1.0]
        ]))));
        let state = state_with(source.clone());

        let Json(first) =
            handle_movement_timeline(State(state.clone()), params(Some("2025-10-31")))
                .await
                .unwrap();
        let Json(second) = handle_movement_timeline(State(state.clone()), params(Some("2025-10-31")))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let Json(other_day) = handle_movement_timeline(State(state), params(Some("2025-11-01")))
            .await
            .unwrap();
        assert_eq!(other_day.date, "2025-11-01");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_row_limit_reached() {
        assert!(row_limit_reached(10_000, 10_000));
        assert!(row_limit_reached(3, 2));
        assert!(!row_limit_reached(9_999, 10_000));
        assert!(!row_limit_reached(0, 10_000));
    }

    #[tokio::test]
    async fn test_full_page_still_aggregated() {
        let source = Arc::new(FakeSource::with_rows(rows(json!([
            ["2025-10-31T14:00:00Z", "u1", 1.0, 1.0],
            ["2025-10-31T14:05:00Z", "u1", 1.0, 1.0]
        ]))));
        let mut state = state_with(source);
        state.config.query_row_limit = 2;

        let Json(body) = handle_movement_timeline(State(state), params(Some("2025-10-31")))
            .await
            .unwrap();
        assert_eq!(body.timeline.len(), 2);
    }

    #[tokio::test]
    async fn test_response_json_shape() {
        let source = Arc::new(FakeSource::with_rows(rows(json!([
            ["2025-10-31T14:00:00Z", "u1", 10.0, 20.0]
        ]))));
        let state = state_with(source);

        let Json(body) = handle_movement_timeline(State(state), params(Some("2025-10-31")))
            .await
            .unwrap();
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["timeline"][0]["bucket_timestamp"], "2025-10-31T14:00:00Z");
        assert_eq!(json["timeline"][0]["centroid"]["latitude"], 10.0);
        assert_eq!(json["timeline"][0]["positions"][0]["longitude"], 20.0);
        assert_eq!(json["summary"]["total_intervals"], 1);
        assert_eq!(json["requested_window"]["start"], "2025-10-31T13:30:00Z");
        assert!(json["generated_at"].is_string());
    }
}
