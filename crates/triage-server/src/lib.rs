//! HTTP serving layer for the triage pipeline.
//!
//! Exposes the [`Orchestrator`](triage_core::Orchestrator) over
//! `POST /query` (JSON or NDJSON streaming), `GET /health` and `GET /`.
//! The router is built by [`api::build_router`]; [`serve`] binds it to an
//! address and runs until the shutdown future resolves.

pub mod api;
pub mod error;

use std::future::Future;
use std::net::SocketAddr;

use tracing::info;

pub use api::{ApiState, build_router};
pub use error::{ApiError, ServeError};

/// Bind `addr` and serve the API until `shutdown` completes.
pub async fn serve(
    addr: SocketAddr,
    state: ApiState,
    cors_origins: &[String],
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    let app = build_router(state, cors_origins);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })?;

    info!(%addr, "triage API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("triage API stopped");
    Ok(())
}
