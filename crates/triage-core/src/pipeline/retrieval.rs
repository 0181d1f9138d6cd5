//! Retrieval stage: ranked context chunks for a question.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use triage_llm::{ProviderError, RetryPolicy};
use triage_types::{PipelineContext, PipelineError, RetrievedChunk};

use super::traits::VectorStore;

/// Wraps a [`VectorStore`] with retries and caller-safe errors.
pub struct RetrievalStage {
    store: Arc<dyn VectorStore>,
    retry: Arc<RetryPolicy>,
}

impl RetrievalStage {
    pub fn new(store: Arc<dyn VectorStore>, retry: Arc<RetryPolicy>) -> Self {
        Self { store, retry }
    }

    /// Fetch up to `top_k` chunks in the store's ranking order.
    ///
    /// An empty result is a success. Transient store failures are retried;
    /// the final error is logged with the session id and replaced by
    /// [`PipelineError::RetrievalFailed`].
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedChunk>, PipelineError> {
        let outcome = self
            .retry
            .run("retrieval", cancel, || self.store.similarity_search(question, top_k))
            .await;

        match outcome {
            Ok(chunks) => {
                debug!(session_id = %ctx.session_id, top_k, retrieved = chunks.len(), "retrieval complete");
                Ok(chunks)
            }
            Err(ProviderError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                error!(session_id = %ctx.session_id, error = %err, "retrieval failed");
                Err(PipelineError::RetrievalFailed {
                    exhausted: err.is_exhausted(),
                })
            }
        }
    }
}
