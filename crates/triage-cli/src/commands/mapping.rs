//! `triage mapping` -- manage the caller identifier mapping.
//!
//! The mapping file is `mappingFile` from the config, or
//! `~/.triage/mapping.json` when unset.
//!
//! # Examples
//!
//! ```text
//! triage mapping list
//! triage mapping add +441234567890 PATIENT_0042
//! triage mapping remove +441234567890
//! triage mapping resolve +441234567890
//! ```

use std::path::PathBuf;

use comfy_table::{Table, presets::UTF8_FULL};

use triage_core::identity::JsonIdentityStore;
use triage_core::pipeline::traits::IdentityResolver;
use triage_types::Config;

const MAPPING_FILENAME: &str = "mapping.json";

/// Resolve the mapping file path.
fn mapping_path(config: &Config) -> PathBuf {
    if let Some(path) = &config.mapping_file {
        return path.clone();
    }
    match dirs::home_dir() {
        Some(home) => home.join(".triage").join(MAPPING_FILENAME),
        None => PathBuf::from(MAPPING_FILENAME),
    }
}

/// Open the mapping store. The file and its directory are created on the
/// first write.
pub async fn open_store(config: &Config) -> JsonIdentityStore {
    JsonIdentityStore::open(mapping_path(config)).await
}

/// Print every mapping as a table.
pub async fn mapping_list(store: &JsonIdentityStore) {
    let entries = store.list().await;
    if entries.is_empty() {
        println!("No mappings.");
        println!("  Store: {}", store.path().display());
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["EXTERNAL ID", "STABLE ID"]);
    for (external, stable) in &entries {
        table.add_row([external, stable]);
    }
    println!("{table}");
}

pub async fn mapping_add(
    store: &JsonIdentityStore,
    external_id: &str,
    stable_id: &str,
) -> anyhow::Result<()> {
    store.add(external_id, stable_id).await?;
    println!("Mapped {external_id} -> {stable_id}");
    Ok(())
}

pub async fn mapping_remove(store: &JsonIdentityStore, external_id: &str) -> anyhow::Result<()> {
    if store.remove(external_id).await? {
        println!("Removed {external_id}");
        Ok(())
    } else {
        anyhow::bail!("no mapping for {external_id}")
    }
}

pub async fn mapping_resolve(store: &JsonIdentityStore, external_id: &str) -> anyhow::Result<()> {
    println!("{}", store.resolve(external_id).await?);
    Ok(())
}
