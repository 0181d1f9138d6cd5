//! Language-model and embedding clients for triage.
//!
//! # Architecture
//!
//! - [`LanguageModel`] trait defines the completion interface
//! - [`OpenAiCompatProvider`] implements it for any OpenAI-compatible API
//! - [`Embedder`] / [`OpenAiEmbedder`] produce vectors for retrieval
//! - [`RetryPolicy`] wraps any provider call with capped exponential backoff
//! - [`ProviderError`] carries the transient/permanent distinction the
//!   retry classifier relies on
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use triage_llm::{CompletionRequest, LanguageModel, OpenAiCompatProvider, RetryPolicy};
//!
//! let model = OpenAiCompatProvider::new(config.provider.clone())?;
//! let policy = RetryPolicy::new((&config.retry).into());
//! let request = CompletionRequest::new("Be concise.", "What is a fever?", "gpt-4o");
//! let answer = policy.run("direct", &cancel, || model.complete(&request)).await?;
//! ```

pub mod embeddings;
pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod retry;
pub mod types;

pub use embeddings::{Embedder, OpenAiEmbedder};
pub use error::{ProviderError, Result};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{CompletionRequest, LanguageModel};
pub use retry::{RetryConfig, RetryPolicy, is_retryable};
