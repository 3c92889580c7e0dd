pub mod diagnose;
pub mod health;

use axum::{routing::get, Router};

use crate::state::AppState;
use crate::timeline::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Analytics API
        .route(
            "/api/analytics/movement-timeline",
            get(handlers::handle_movement_timeline),
        )
        .route("/api/analytics/diagnose", get(diagnose::diagnose_handler))
        .with_state(state)
}
