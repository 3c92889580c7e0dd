mod config;
mod errors;
mod posthog_client;
mod routes;
mod state;
mod timeline;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::posthog_client::PosthogClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::timeline::cache::{InMemoryTimelineCache, RedisTimelineCache, TimelineCache};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting timeline API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostHog client
    let analytics = PosthogClient::new(
        config.posthog_host.clone(),
        config.posthog_project_id.clone(),
        config.posthog_personal_api_key.clone(),
    )?;
    info!(
        "PostHog client initialized (host: {}, project: {})",
        config.posthog_host, config.posthog_project_id
    );

    let timeline_cache = build_timeline_cache(&config)?;

    info!(
        "Timeline settings: neighborhood={}, bucket={}min, layout={}, weighting={}",
        config.neighborhood, config.bucket_minutes, config.column_layout, config.centroid_weighting
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        analytics: Arc::new(analytics),
        timeline_cache,
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Redis when `REDIS_URL` is set, otherwise a process-local cache.
fn build_timeline_cache(config: &Config) -> Result<Arc<dyn TimelineCache>> {
    let ttl = Duration::from_secs(config.timeline_cache_ttl_secs);
    match &config.redis_url {
        Some(url) => {
            let redis = redis::Client::open(url.as_str())?;
            info!("Redis timeline cache initialized (ttl {}s)", ttl.as_secs());
            Ok(Arc::new(RedisTimelineCache::new(redis, ttl)))
        }
        None => {
            info!("In-memory timeline cache initialized (ttl {}s)", ttl.as_secs());
            Ok(Arc::new(InMemoryTimelineCache::new(ttl)))
        }
    }
}
