//! CLI command implementations for `triage`.
//!
//! Each subcommand is implemented in its own module:
//!
//! - [`serve`] -- HTTP API server.
//! - [`ask`] -- One local query, JSON or NDJSON output.
//! - [`mapping`] -- Caller identifier mapping maintenance.
//! - [`config_cmd`] -- Resolved configuration display.

pub mod ask;
pub mod config_cmd;
pub mod mapping;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use triage_types::Config;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "TRIAGE_CONFIG";

/// Load configuration from the given path override or via auto-discovery.
///
/// If `config_override` is provided, that file must exist. Otherwise the
/// discovery chain is:
/// 1. `TRIAGE_CONFIG` env var
/// 2. `~/.triage/config.json`
///
/// Returns a default `Config` if no config file is found.
pub fn load_config(config_override: Option<&Path>) -> anyhow::Result<Config> {
    let path = match config_override {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => discover_config_path(std::env::var(CONFIG_ENV).ok(), Config::default_path()),
    };

    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Config::from_file(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            debug!("no config file found, using defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// First existing candidate among the env override and the default path.
pub fn discover_config_path(
    env_value: Option<String>,
    default_path: Option<PathBuf>,
) -> Option<PathBuf> {
    env_value
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .into_iter()
        .chain(default_path)
        .find(|path| path.exists())
}
