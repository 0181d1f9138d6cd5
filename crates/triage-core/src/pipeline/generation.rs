//! Generation stage: model completions for every answering branch.
//!
//! The complex branch uses [`GenerationStage::generate`], which grounds the
//! question in retrieved chunks. The direct, administrative and
//! safety-answer branches use [`GenerationStage::answer`] with their own
//! prompt. Both share the same retry and error mapping.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use triage_llm::{CompletionRequest, LanguageModel, ProviderError, RetryPolicy};
use triage_types::config::GenerationConfig;
use triage_types::{PipelineContext, PipelineError, RetrievedChunk};

/// Prompt context used when retrieval found nothing.
pub const NO_CONTEXT_NOTE: &str = "No context passages were retrieved. Answer conservatively.";

/// Model id and sampling settings for one role.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl ModelParams {
    pub fn new(model: impl Into<String>, generation: &GenerationConfig) -> Self {
        Self {
            model: model.into(),
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
        }
    }
}

/// Build the grounded prompt: numbered context then the question.
///
/// Chunks appear in the order given, each as `id (document):` followed by
/// its content.
pub fn build_grounded_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let context = if chunks.is_empty() {
        NO_CONTEXT_NOTE.to_string()
    } else {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            let _ = write!(
                out,
                "{} ({}):\n{}",
                chunk.id,
                chunk.document_label(),
                chunk.content.trim()
            );
        }
        out
    };

    format!(
        "Context passages:\n{context}\n\nQuestion: {}\n\
         Respond with a factual answer that cites chunk identifiers in parentheses.",
        question.trim()
    )
}

/// Completion calls with retries and caller-safe errors.
pub struct GenerationStage {
    model: Arc<dyn LanguageModel>,
    retry: Arc<RetryPolicy>,
}

impl GenerationStage {
    pub fn new(model: Arc<dyn LanguageModel>, retry: Arc<RetryPolicy>) -> Self {
        Self { model, retry }
    }

    /// Answer `question` grounded in `chunks`.
    pub async fn generate(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        instructions: &str,
        params: &ModelParams,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let prompt = build_grounded_prompt(question, chunks);
        self.answer("generation", instructions, prompt, params, ctx, cancel)
            .await
    }

    /// Run one completion and return the trimmed text.
    ///
    /// A blank completion is [`PipelineError::EmptyGeneration`] and is not
    /// retried.
    pub async fn answer(
        &self,
        operation: &str,
        instructions: &str,
        prompt: String,
        params: &ModelParams,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let request = CompletionRequest::new(instructions, prompt, params.model.as_str())
            .with_max_tokens(params.max_tokens)
            .with_temperature(params.temperature);

        let outcome = self
            .retry
            .run(operation, cancel, || self.model.complete(&request))
            .await;

        match outcome {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    warn!(session_id = %ctx.session_id, operation, "model returned an empty answer");
                    return Err(PipelineError::EmptyGeneration);
                }
                debug!(session_id = %ctx.session_id, operation, chars = text.len(), "answer generated");
                Ok(text.to_string())
            }
            Err(ProviderError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                error!(session_id = %ctx.session_id, operation, error = %err, "generation failed");
                Err(PipelineError::GenerationFailed {
                    exhausted: err.is_exhausted(),
                })
            }
        }
    }
}
