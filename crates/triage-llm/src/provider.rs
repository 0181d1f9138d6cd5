//! The core [`LanguageModel`] trait for free-text completions.

use async_trait::async_trait;

use crate::error::Result;

/// Everything one completion call needs.
///
/// `instructions` becomes the system message and `prompt` the single user
/// message. `json_output` asks the provider for a JSON object response
/// where supported; callers still validate what comes back.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub instructions: String,
    pub prompt: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub json_output: bool,
}

impl CompletionRequest {
    /// Create a request with no token limit or temperature override.
    pub fn new(
        instructions: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            prompt: prompt.into(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            json_output: false,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Request a JSON object response.
    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// A client that produces free-text completions.
///
/// Implementations must be safe to share across concurrent pipeline runs;
/// the main implementation is
/// [`OpenAiCompatProvider`](crate::openai_compat::OpenAiCompatProvider).
///
/// # Example
///
/// ```rust,ignore
/// use triage_llm::{CompletionRequest, LanguageModel};
///
/// async fn ask(model: &dyn LanguageModel) -> triage_llm::Result<String> {
///     let request = CompletionRequest::new("Be brief.", "What is a fever?", "gpt-4o");
///     model.complete(&request).await
/// }
/// ```
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the provider name (e.g. "openai").
    fn name(&self) -> &str;

    /// Execute one completion and return the assistant text.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`](crate::error::ProviderError) for network
    /// failures, non-success statuses and unparseable responses. Transient
    /// and permanent failures are distinguishable through
    /// [`is_retryable`](crate::retry::is_retryable).
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
