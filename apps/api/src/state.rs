use std::sync::Arc;

use crate::config::Config;
use crate::posthog_client::AnalyticsSource;
use crate::timeline::cache::TimelineCache;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Upstream analytics store. Default: `PosthogClient`.
    pub analytics: Arc<dyn AnalyticsSource>,
    /// Redis-backed when `REDIS_URL` is set, in-memory otherwise.
    pub timeline_cache: Arc<dyn TimelineCache>,
}
