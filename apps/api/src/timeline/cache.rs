//! Response cache owned by the request layer. The aggregation core never
//! sees it, so its output stays a pure function of its input.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Client as RedisClient;
use tokio::time::Instant;
use tracing::warn;

use crate::timeline::handlers::TimelineResponse;

#[async_trait]
pub trait TimelineCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<TimelineResponse>;
    async fn put(&self, key: &str, value: &TimelineResponse);
}

pub fn cache_key(neighborhood: &str, date: &str) -> String {
    format!("movement-timeline:{neighborhood}:{date}")
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

struct CachedEntry {
    stored_at: Instant,
    value: TimelineResponse,
}

/// Process-local TTL cache. A zero TTL disables it.
pub struct InMemoryTimelineCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedEntry>>,
}

impl InMemoryTimelineCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TimelineCache for InMemoryTimelineCache {
    async fn get(&self, key: &str) -> Option<TimelineResponse> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: &TimelineResponse) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        entries.insert(
            key.to_string(),
            CachedEntry {
                stored_at: Instant::now(),
                value: value.clone(),
            },
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

/// Shared cache across instances. Redis failures are logged and treated
/// as a miss.
pub struct RedisTimelineCache {
    client: RedisClient,
    ttl_secs: u64,
}

impl RedisTimelineCache {
    pub fn new(client: RedisClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl_secs: ttl.as_secs(),
        }
    }

    async fn try_get(&self, key: &str) -> anyhow::Result<Option<TimelineResponse>> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut con)
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn try_put(&self, key: &str, value: &TimelineResponse) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        let mut con = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut con)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TimelineCache for RedisTimelineCache {
    async fn get(&self, key: &str) -> Option<TimelineResponse> {
        self.try_get(key).await.unwrap_or_else(|e| {
            warn!("Redis cache read failed for {key}: {e}");
            None
        })
    }

    async fn put(&self, key: &str, value: &TimelineResponse) {
        if self.ttl_secs == 0 {
            return;
        }
        if let Err(e) = self.try_put(key, value).await {
            warn!("Redis cache write failed for {key}: {e}");
        }
    }
}
