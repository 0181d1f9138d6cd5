//! `triage config` -- display resolved configuration.
//!
//! Shows the full resolved configuration as formatted JSON, or a specific
//! section by name.
//!
//! # Examples
//!
//! ```text
//! triage config show
//! triage config show retrieval
//! ```

use triage_types::Config;

/// Display the resolved configuration as formatted JSON.
pub fn config_show(config: &Config) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("error: failed to serialize config: {e}"),
    }
}

/// Display one configuration section.
pub fn config_section(config: &Config, section: &str) -> anyhow::Result<()> {
    println!("{}", render_section(config, section)?);
    Ok(())
}

fn render_section(config: &Config, section: &str) -> anyhow::Result<String> {
    let value = serde_json::to_value(config)?;
    match value.get(section) {
        Some(v) => Ok(serde_json::to_string_pretty(v)?),
        None => {
            let available: Vec<&str> = value
                .as_object()
                .map(|m| m.keys().map(|k| k.as_str()).collect())
                .unwrap_or_default();
            anyhow::bail!(
                "unknown section '{section}' (available: {})",
                available.join(", ")
            )
        }
    }
}
