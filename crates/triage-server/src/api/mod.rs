//! REST API for the triage pipeline.
//!
//! Provides the query endpoint (synchronous JSON or NDJSON streaming),
//! a liveness probe and a service index.

pub mod handlers;
pub mod query;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use triage_core::Orchestrator;

/// Shared state accessible by all API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// The pipeline every query runs through.
    pub orchestrator: Arc<Orchestrator>,
    /// Deadline for one synchronous run.
    pub request_timeout: Duration,
    /// Process start, for the health probe's uptime.
    pub started: Instant,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>, request_timeout: Duration) -> Self {
        Self {
            orchestrator,
            request_timeout,
            started: Instant::now(),
        }
    }
}

/// Build the API router with all routes.
pub fn build_router(state: ApiState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    handlers::routes()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
