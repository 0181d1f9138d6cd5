//! Collaborator capabilities the pipeline depends on.
//!
//! The orchestrator only sees these traits. Production implementations
//! live in [`llm_adapter`](super::llm_adapter),
//! [`vector_index`](crate::vector_index) and [`identity`](crate::identity);
//! tests substitute counting mocks. Every implementation must be safe to
//! share across concurrent runs.
//!
//! All fallible model and search capabilities report
//! [`ProviderError`](triage_llm::ProviderError) so the same retry
//! classifier and sanitization apply everywhere.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use triage_llm::Result;
use triage_types::{PatientHistory, RetrievedChunk, SafetyVerdict, TranslatedQuery};

use crate::identity::StoreError;

/// Ranked passage search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `top_k` chunks, most relevant first.
    async fn similarity_search(&self, question: &str, top_k: usize) -> Result<Vec<RetrievedChunk>>;
}

/// Detects the query language and translates it for the pipeline.
#[async_trait]
pub trait Translator: Send + Sync {
    /// `declared_language` is a hint from the caller, when one was given.
    async fn translate(
        &self,
        text: &str,
        declared_language: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TranslatedQuery>;
}

/// Translates a finished answer back into the caller's language.
#[async_trait]
pub trait BackTranslator: Send + Sync {
    async fn back_translate(
        &self,
        answer: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Produces the pre-flight safety verdict.
#[async_trait]
pub trait SafetyChecker: Send + Sync {
    async fn check(&self, text: &str, cancel: &CancellationToken) -> Result<SafetyVerdict>;
}

/// What a classification capability handed back.
///
/// Providers do not always honour a structured-output contract, so the
/// raw form is kept until
/// [`ClassificationStage`](super::classifier::ClassificationStage) has
/// validated it.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutput {
    /// Already-decoded JSON.
    Structured(serde_json::Value),
    /// Unstructured text that may or may not contain JSON.
    Text(String),
}

/// Produces a routing classification for translated input.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, cancel: &CancellationToken) -> Result<ClassifierOutput>;
}

/// Maps an external caller handle to a stable identifier.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, external_id: &str) -> std::result::Result<String, StoreError>;
}

/// Looks up a caller's history. Lookups never fail the run; an
/// implementation that cannot reach its backend returns an empty history.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn fetch(&self, stable_id: &str) -> PatientHistory;
}

/// Resolver that uses the external handle as the stable id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughResolver;

#[async_trait]
impl IdentityResolver for PassthroughResolver {
    async fn resolve(&self, external_id: &str) -> std::result::Result<String, StoreError> {
        Ok(external_id.to_string())
    }
}

/// History provider with no backing store.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyHistory;

#[async_trait]
impl HistoryProvider for EmptyHistory {
    async fn fetch(&self, _stable_id: &str) -> PatientHistory {
        PatientHistory::default()
    }
}
