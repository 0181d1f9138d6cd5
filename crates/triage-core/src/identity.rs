//! Flat-file mapping from external caller handles to stable patient ids.
//!
//! The file is a pretty-printed JSON object `{"<external>": "<stable>"}`.
//! Every mutation rewrites it (temp file + rename) while the in-memory map
//! is still locked, so concurrent resolves never interleave writes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::pipeline::traits::IdentityResolver;

/// Prefix for auto-generated stable ids.
pub const GENERATED_ID_PREFIX: &str = "PATIENT_";

/// Identifier-mapping store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("mapping store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mapping store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON-file backed [`IdentityResolver`].
pub struct JsonIdentityStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonIdentityStore {
    /// Open the store at `path`.
    ///
    /// A missing file yields an empty store. An unreadable or corrupt file
    /// is logged and also yields an empty store; it is overwritten by the
    /// next mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(map) => {
                    info!(path = %path.display(), entries = map.len(), "loaded identifier mapping");
                    map
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt mapping file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no mapping file yet");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable mapping file, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up without creating.
    pub async fn get(&self, external_id: &str) -> Option<String> {
        self.entries.lock().await.get(external_id.trim()).cloned()
    }

    /// Insert or replace a mapping.
    pub async fn add(&self, external_id: &str, stable_id: &str) -> Result<(), StoreError> {
        let external_id = validate(external_id)?;
        let stable_id = validate(stable_id)?;

        let mut entries = self.entries.lock().await;
        entries.insert(external_id.to_string(), stable_id.to_string());
        self.persist(&entries).await?;
        info!(external_id, stable_id, "mapping added");
        Ok(())
    }

    /// Remove a mapping. Returns `false` if it did not exist.
    pub async fn remove(&self, external_id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(external_id.trim()).is_none() {
            return Ok(false);
        }
        self.persist(&entries).await?;
        info!(external_id, "mapping removed");
        Ok(true)
    }

    /// Snapshot of every mapping, ordered by external id.
    pub async fn list(&self) -> BTreeMap<String, String> {
        self.entries.lock().await.clone()
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityResolver for JsonIdentityStore {
    async fn resolve(&self, external_id: &str) -> Result<String, StoreError> {
        let external_id = validate(external_id)?;

        let mut entries = self.entries.lock().await;
        if let Some(stable) = entries.get(external_id) {
            return Ok(stable.clone());
        }

        let stable = format!("{GENERATED_ID_PREFIX}{external_id}");
        entries.insert(external_id.to_string(), stable.clone());
        self.persist(&entries).await?;
        info!(external_id, stable_id = %stable, "generated stable id");
        Ok(stable)
    }
}

impl std::fmt::Debug for JsonIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonIdentityStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn validate(id: &str) -> Result<&str, StoreError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(StoreError::InvalidId("identifier must not be empty".into()));
    }
    Ok(id)
}
