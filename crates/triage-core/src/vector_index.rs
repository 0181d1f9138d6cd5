//! In-memory vector index with cosine similarity search.
//!
//! [`EmbeddingIndex`] holds a small corpus of passages and their embedding
//! vectors and answers [`VectorStore`] queries by embedding the question
//! and scoring every passage. The corpus is a JSON array of
//! `{id, content, metadata?, embedding?}`; entries without an embedding
//! are embedded in batches when the index is built.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use triage_llm::{Embedder, ProviderError};
use triage_types::RetrievedChunk;

use crate::pipeline::traits::VectorStore;

/// Texts sent per embedding request while building.
const EMBED_BATCH_SIZE: usize = 64;

/// Index construction failures.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to read corpus: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse corpus: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to embed corpus: {0}")]
    Embedding(#[from] ProviderError),

    #[error("entry '{id}' has dimension {got}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        got: usize,
    },
}

/// One corpus entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

struct IndexedEntry {
    id: String,
    content: String,
    metadata: HashMap<String, serde_json::Value>,
    embedding: Vec<f32>,
}

/// Brute-force cosine index. Read-only once built.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    entries: Vec<IndexedEntry>,
    dimension: Option<usize>,
}

impl EmbeddingIndex {
    /// Build from entries, embedding any that lack a vector.
    pub async fn build(
        embedder: Arc<dyn Embedder>,
        entries: Vec<CorpusEntry>,
    ) -> Result<Self, IndexError> {
        let missing: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        let mut entries = entries;
        for batch in missing.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|&i| entries[i].content.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(IndexError::Embedding(ProviderError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                ))));
            }
            for (&i, vector) in batch.iter().zip(vectors) {
                entries[i].embedding = Some(vector);
            }
            debug!(embedded = batch.len(), "embedded corpus batch");
        }

        let mut dimension = None;
        let mut indexed = Vec::with_capacity(entries.len());
        for entry in entries {
            let embedding = entry.embedding.unwrap_or_default();
            match dimension {
                None => dimension = Some(embedding.len()),
                Some(expected) if expected != embedding.len() => {
                    return Err(IndexError::DimensionMismatch {
                        id: entry.id,
                        expected,
                        got: embedding.len(),
                    });
                }
                Some(_) => {}
            }
            indexed.push(IndexedEntry {
                id: entry.id,
                content: entry.content,
                metadata: entry.metadata,
                embedding,
            });
        }

        info!(
            entries = indexed.len(),
            embedded = missing.len(),
            embedder = embedder.name(),
            "vector index built"
        );

        Ok(Self {
            embedder,
            entries: indexed,
            dimension,
        })
    }

    /// Load a JSON corpus file and build the index.
    pub async fn load(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let entries: Vec<CorpusEntry> = serde_json::from_str(&raw)?;
        Self::build(embedder, entries).await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k entries by descending cosine similarity to `query`.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<RetrievedChunk> {
        if self.entries.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f32, &IndexedEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(query, &entry.embedding), entry))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, entry)| RetrievedChunk {
                id: entry.id.clone(),
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                score,
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for EmbeddingIndex {
    async fn similarity_search(
        &self,
        question: &str,
        top_k: usize,
    ) -> triage_llm::Result<Vec<RetrievedChunk>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(question).await?;
        if let Some(expected) = self.dimension
            && query.len() != expected
        {
            return Err(ProviderError::InvalidResponse(format!(
                "query embedding has dimension {}, index has {expected}",
                query.len()
            )));
        }
        Ok(self.search(&query, top_k))
    }
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("entries", &self.entries.len())
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Cosine similarity; 0.0 when either vector is zero or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Embeds by keyword presence: [fever, cough, rash].
    struct KeywordEmbedder {
        batches: AtomicU32,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                batches: AtomicU32::new(0),
            }
        }

        fn vector(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            ["fever", "cough", "rash"]
                .iter()
                .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                .collect()
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> triage_llm::Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| Self::vector(t)).collect())
        }
    }

    fn entry(id: &str, content: &str) -> CorpusEntry {
        CorpusEntry {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::from([("source_path".to_string(), serde_json::json!(format!("{id}.md")))]),
            embedding: None,
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn build_embeds_missing_and_search_ranks() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let mut precomputed = entry("c3", "unrelated");
        precomputed.embedding = Some(vec![0.0, 0.0, 1.0]);

        let index = EmbeddingIndex::build(
            embedder.clone(),
            vec![
                entry("c1", "Fever management in adults"),
                entry("c2", "Fever with cough"),
                precomputed,
            ],
        )
        .await
        .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 1);

        let results = index.similarity_search("cough and fever", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c2");
        assert_eq!(results[1].id, "c1");
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].document_label(), "c2.md");
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let mut odd = entry("bad", "x");
        odd.embedding = Some(vec![1.0]);
        let err = EmbeddingIndex::build(embedder, vec![entry("ok", "fever"), odd])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let index = EmbeddingIndex::build(embedder.clone(), Vec::new())
            .await
            .unwrap();
        assert!(index.is_empty());
        assert!(index.similarity_search("fever", 5).await.unwrap().is_empty());
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "r1", "content": "Rash after antibiotics", "metadata": {"document_id": "derm-01"}},
                {"id": "f1", "content": "Fever in children", "embedding": [1.0, 0.0, 0.0]}
            ]"#,
        )
        .unwrap();

        let index = EmbeddingIndex::load(&path, Arc::new(KeywordEmbedder::new()))
            .await
            .unwrap();
        let results = index.similarity_search("itchy rash", 1).await.unwrap();
        assert_eq!(results[0].id, "r1");
        assert_eq!(results[0].document_label(), "derm-01");
    }
}
