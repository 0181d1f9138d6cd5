//! Retrieved passages and their display-safe projection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A passage returned by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Chunk identifier, cited by generated answers.
    pub id: String,

    /// Passage text.
    pub content: String,

    /// Arbitrary metadata; `source_path` / `document_id` name the document.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Relevance score (higher is more relevant, not normalized).
    pub score: f32,
}

impl RetrievedChunk {
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
            score,
        }
    }

    /// Add one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Human-readable document label.
    ///
    /// Prefers `source_path`, then `document_id`, then the chunk id. Null
    /// and empty values are skipped.
    pub fn document_label(&self) -> String {
        ["source_path", "document_id"]
            .iter()
            .filter_map(|key| self.metadata.get(*key))
            .find_map(meta_to_label)
            .unwrap_or_else(|| self.id.clone())
    }

    /// Project this chunk for display, dropping its content.
    pub fn attribution(&self) -> SourceAttribution {
        SourceAttribution {
            chunk_id: self.id.clone(),
            document: self.document_label(),
            score: self.score,
        }
    }
}

fn meta_to_label(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(false) => None,
        other => Some(other.to_string()),
    }
}

/// What a caller may see about a retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub chunk_id: String,
    pub document: String,
    pub score: f32,
}

/// Attributions for a list of chunks, preserving order.
pub fn sources_from_chunks(chunks: &[RetrievedChunk]) -> Vec<SourceAttribution> {
    chunks.iter().map(RetrievedChunk::attribution).collect()
}
