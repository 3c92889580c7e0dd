/// PostHog client — the single point of entry for HogQL queries.
///
/// Every analytics read goes through an `AnalyticsSource`. Handlers hold it
/// as `Arc<dyn AnalyticsSource>` so tests can substitute canned rows.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod queries;

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum PosthogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Query failed after {retries} attempts")]
    RetriesExhausted { retries: u32 },
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: HogQlQuery<'a>,
}

#[derive(Debug, Serialize)]
struct HogQlQuery<'a> {
    kind: &'static str,
    query: &'a str,
}

/// Result rows of a HogQL query. A missing or null `results` means no rows.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub results: Vec<Vec<Value>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub columns: Vec<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct PosthogErrorBody {
    detail: Option<String>,
}

/// The upstream event-analytics store as seen by handlers.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn run_query(&self, hogql: &str) -> Result<QueryResult, PosthogError>;
}

/// Wraps the PostHog query API with retry logic.
#[derive(Clone)]
pub struct PosthogClient {
    client: Client,
    host: String,
    project_id: String,
    api_key: String,
}

impl PosthogClient {
    pub fn new(host: String, project_id: String, api_key: String) -> Result<Self, PosthogError> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            host: host.trim_end_matches('/').to_string(),
            project_id,
            api_key,
        })
    }

    fn query_url(&self) -> String {
        format!("{}/api/projects/{}/query/", self.host, self.project_id)
    }
}

#[async_trait]
impl AnalyticsSource for PosthogClient {
    /// Runs a HogQL query. Retries on 429, 5xx and transport errors with
    /// exponential backoff; other failures return immediately.
    async fn run_query(&self, hogql: &str) -> Result<QueryResult, PosthogError> {
        let body = QueryRequest {
            query: HogQlQuery {
                kind: "HogQLQuery",
                query: hogql,
            },
        };

        let mut last_error: Option<PosthogError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "PostHog query attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(self.query_url())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(PosthogError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                warn!("PostHog returned {}: {}", status, message);
                last_error = Some(PosthogError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(PosthogError::Api {
                    status: status.as_u16(),
                    message: error_message(text),
                });
            }

            let text = response.text().await?;
            let result: QueryResult = serde_json::from_str(&text)?;
            debug!(
                "PostHog query succeeded: {} rows, columns={:?}",
                result.results.len(),
                result.columns
            );
            return Ok(result);
        }

        Err(last_error.unwrap_or(PosthogError::RetriesExhausted {
            retries: MAX_RETRIES,
        }))
    }
}

/// Prefers PostHog's `detail` field over the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<PosthogErrorBody>(&body)
        .ok()
        .and_then(|e| e.detail)
        .unwrap_or(body)
}
