use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::posthog_client::queries::PROBE_QUERY;
use crate::state::AppState;

const PERSONAL_KEY_PREFIX: &str = "phx_";
const UNSET_NEIGHBORHOOD: &str = "Unknown";

#[derive(Debug, Serialize)]
pub struct SettingStatus {
    pub configured: bool,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsReport {
    pub timestamp: DateTime<Utc>,
    pub posthog_host: SettingStatus,
    pub posthog_project_id: SettingStatus,
    pub posthog_personal_api_key: SettingStatus,
    pub neighborhood: SettingStatus,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub connection: Option<ConnectionStatus>,
}

/// GET /api/analytics/diagnose
///
/// Reports configuration problems and probes the analytics store with a
/// trivial query. Secrets are masked.
pub async fn diagnose_handler(State(state): State<AppState>) -> Json<DiagnosticsReport> {
    let mut report = inspect_config(&state.config);

    let connection = match state.analytics.run_query(PROBE_QUERY).await {
        Ok(result) => ConnectionStatus {
            ok: true,
            rows: Some(result.results.len()),
            error: None,
        },
        Err(e) => {
            warn!("Diagnostics probe failed: {e}");
            report
                .issues
                .push("PostHog query API is not reachable with the configured credentials".to_string());
            report.recommendations.push(
                "Check that the personal API key has the \"Query Read\" scope and the project id is correct"
                    .to_string(),
            );
            ConnectionStatus {
                ok: false,
                rows: None,
                error: Some(e.to_string()),
            }
        }
    };
    report.connection = Some(connection);

    Json(report)
}

fn inspect_config(config: &Config) -> DiagnosticsReport {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if !config.posthog_personal_api_key.starts_with(PERSONAL_KEY_PREFIX) {
        issues.push(format!(
            "POSTHOG_PERSONAL_API_KEY does not start with \"{PERSONAL_KEY_PREFIX}\""
        ));
        recommendations.push(
            "Use a Personal API Key (not the Project API Key) for server-side queries".to_string(),
        );
    }

    if config.posthog_project_id.parse::<u64>().is_err() {
        issues.push("POSTHOG_PROJECT_ID is not numeric".to_string());
        recommendations.push("Set POSTHOG_PROJECT_ID to the numeric id from project settings".to_string());
    }

    let neighborhood_set = config.neighborhood != UNSET_NEIGHBORHOOD;
    if !neighborhood_set {
        issues.push("NEIGHBORHOOD_NAME is not set".to_string());
        recommendations
            .push("Set NEIGHBORHOOD_NAME so queries only see this deployment's events".to_string());
    }

    DiagnosticsReport {
        timestamp: Utc::now(),
        posthog_host: SettingStatus {
            configured: true,
            value: config.posthog_host.clone(),
        },
        posthog_project_id: SettingStatus {
            configured: !config.posthog_project_id.is_empty(),
            value: config.posthog_project_id.clone(),
        },
        posthog_personal_api_key: SettingStatus {
            configured: !config.posthog_personal_api_key.is_empty(),
            value: mask_secret(&config.posthog_personal_api_key),
        },
        neighborhood: SettingStatus {
            configured: neighborhood_set,
            value: config.neighborhood.clone(),
        },
        issues,
        recommendations,
        connection: None,
    }
}

/// Keeps the first 8 characters of a secret.
fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(8).collect();
    format!("{prefix}...")
}
