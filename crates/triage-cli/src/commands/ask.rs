//! `triage ask` -- run one query locally.
//!
//! Prints the final result as pretty JSON, or with `--stream` prints
//! each pipeline event as one NDJSON line as it happens. Ctrl+C cancels
//! the run.
//!
//! # Examples
//!
//! ```text
//! triage ask "I have had a fever for two days" --caller U1
//! triage ask "எனக்கு காய்ச்சல்" --caller U1 --language Tamil --stream
//! ```

use std::io::Write;

use anyhow::Context;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use triage_core::AppContext;
use triage_types::{Config, PipelineEvent, Query};

/// Arguments for `triage ask`.
#[derive(Args)]
pub struct AskArgs {
    /// The question, in any language.
    pub text: String,

    /// Caller handle, resolved through the identifier mapping.
    #[arg(long)]
    pub caller: String,

    /// Declared source language, if known.
    #[arg(short, long)]
    pub language: Option<String>,

    /// Print pipeline events as NDJSON instead of the final result.
    #[arg(long)]
    pub stream: bool,
}

impl AskArgs {
    fn query(&self) -> Query {
        let query = Query::new(self.text.trim(), self.caller.trim());
        match &self.language {
            Some(language) => query.with_language(language.trim()),
            None => query,
        }
    }
}

pub async fn run(args: AskArgs, config: Config) -> anyhow::Result<()> {
    let ctx = AppContext::new(config)
        .await
        .context("failed to initialize pipeline")?;
    let orchestrator = ctx.orchestrator().clone();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let query = args.query();
    if args.stream {
        let mut rx = orchestrator.spawn_stream(query, cancel);
        let mut failed = false;
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            failed |= matches!(event, PipelineEvent::Error(_));
            stdout.write_all(&event.to_ndjson()?)?;
            stdout.flush()?;
        }
        if failed {
            anyhow::bail!("pipeline run failed");
        }
        return Ok(());
    }

    match orchestrator.process(query, &cancel).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.envelope().into_body())?);
            anyhow::bail!("pipeline run failed: {}", err.public_message())
        }
    }
}
