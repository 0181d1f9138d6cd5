//! `triage serve` -- run the HTTP API.
//!
//! Bootstraps the pipeline from the resolved configuration and serves
//! `POST /query`, `GET /health` and `GET /` until Ctrl+C or SIGTERM.
//!
//! # Examples
//!
//! ```text
//! triage serve
//! triage serve --host 0.0.0.0 --port 9000
//! ```

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};

use triage_core::AppContext;
use triage_server::ApiState;
use triage_types::Config;

/// Arguments for `triage serve`.
#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind (overrides `server.host`).
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (overrides `server.port`).
    #[arg(short, long)]
    pub port: Option<u16>,
}

pub async fn run(args: ServeArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let server = config.server.clone();
    let addr = tokio::net::lookup_host((server.host.as_str(), server.port))
        .await
        .with_context(|| format!("cannot resolve {}:{}", server.host, server.port))?
        .next()
        .with_context(|| format!("no address for {}:{}", server.host, server.port))?;

    let ctx = AppContext::new(config)
        .await
        .context("failed to initialize pipeline")?;
    let state = ApiState::new(ctx.orchestrator().clone(), server.request_timeout());

    triage_server::serve(addr, state, &server.cors_origins, shutdown_signal()).await?;
    info!("server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
