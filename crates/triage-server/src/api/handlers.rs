//! Route table and the informational endpoints.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};

use super::ApiState;

/// Build all API routes.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/query", post(super::query::submit))
}

/// Service name, version and endpoint list.
async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "triage",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /query",
            "POST /query?stream=true",
            "GET /health"
        ]
    }))
}

/// Returns liveness, version, and uptime. No dependency checks.
async fn health_check(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs()
    }))
}
