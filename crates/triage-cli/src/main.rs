//! `triage` -- CLI binary for the multilingual medical query pipeline.
//!
//! Provides the following subcommands:
//!
//! - `triage serve` -- Start the HTTP API.
//! - `triage ask` -- Run one query locally and print the result.
//! - `triage mapping` -- Manage the caller identifier mapping.
//! - `triage config` -- Show the resolved configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// Multilingual medical query triage.
#[derive(Parser)]
#[command(name = "triage", about = "Multilingual medical query triage", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    Serve(commands::serve::ServeArgs),

    /// Run one query through the pipeline.
    Ask(commands::ask::AskArgs),

    /// Manage the caller identifier mapping.
    Mapping {
        #[command(subcommand)]
        action: MappingCmd,
    },

    /// Show resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

/// Subcommands for `triage mapping`.
#[derive(Subcommand)]
enum MappingCmd {
    /// List every mapped caller.
    List,

    /// Map an external caller handle to a stable identifier.
    Add {
        /// External handle (e.g. a phone number or chat id).
        external_id: String,

        /// Stable identifier used by the pipeline.
        stable_id: String,
    },

    /// Remove a mapping.
    Remove {
        /// External handle to remove.
        external_id: String,
    },

    /// Resolve a handle, generating and storing an identifier if unmapped.
    Resolve {
        /// External handle to resolve.
        external_id: String,
    },
}

/// Subcommands for `triage config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Show the full resolved configuration, or one section of it.
    Show {
        /// Section name (e.g., "server", "models", "retrieval").
        section: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args, config).await?,
        Commands::Ask(args) => commands::ask::run(args, config).await?,
        Commands::Mapping { action } => {
            let store = commands::mapping::open_store(&config).await;
            match action {
                MappingCmd::List => commands::mapping::mapping_list(&store).await,
                MappingCmd::Add {
                    external_id,
                    stable_id,
                } => commands::mapping::mapping_add(&store, &external_id, &stable_id).await?,
                MappingCmd::Remove { external_id } => {
                    commands::mapping::mapping_remove(&store, &external_id).await?
                }
                MappingCmd::Resolve { external_id } => {
                    commands::mapping::mapping_resolve(&store, &external_id).await?
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigCmd::Show { section: None } => commands::config_cmd::config_show(&config),
            ConfigCmd::Show {
                section: Some(name),
            } => commands::config_cmd::config_section(&config, &name)?,
        },
    }

    Ok(())
}
