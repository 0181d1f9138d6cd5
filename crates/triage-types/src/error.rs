//! Error types for the triage pipeline.
//!
//! [`PipelineError`] is the caller-facing taxonomy. Variants never carry
//! provider error text: stages log the internal cause and then return one
//! of these, so `Display` output is always safe to show a caller.
//! [`PipelineError::BlockedInput`] is the exception: its concerns and
//! recommended action are informational.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-safe pipeline failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The request itself was malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The translation step could not produce a usable translation.
    #[error("translation failed")]
    TranslationFailed,

    /// The safety guardrail vetoed the input.
    #[error("input blocked by safety guardrail")]
    BlockedInput {
        concerns: Vec<String>,
        recommended_action: String,
    },

    /// The classification call itself failed.
    #[error("classification failed")]
    ClassificationFailed,

    /// The classifier answered, but not with a classification.
    #[error("classification output was malformed")]
    ClassificationMalformed,

    /// Context retrieval failed (`exhausted` = retries ran out).
    #[error("{}", failure_message("context retrieval", .exhausted))]
    RetrievalFailed { exhausted: bool },

    /// Answer generation failed (`exhausted` = retries ran out).
    #[error("{}", failure_message("generation", .exhausted))]
    GenerationFailed { exhausted: bool },

    /// The model returned a blank completion.
    #[error("model returned an empty answer")]
    EmptyGeneration,

    /// Back-translation failed. The orchestrator logs it and returns the
    /// untranslated answer with `translation_failed` set.
    #[error("back-translation failed")]
    BackTranslationFailed,

    /// The caller's overall deadline expired.
    #[error("request timed out")]
    TimedOut,

    /// The run was cancelled (caller disconnected).
    #[error("request cancelled")]
    Cancelled,

    /// The run died without producing a result, e.g. a panicked task.
    #[error("internal error")]
    Internal,
}

fn failure_message(what: &str, exhausted: &bool) -> String {
    if *exhausted {
        format!("{what} failed after retries")
    } else {
        format!("{what} failed")
    }
}

/// Coarse status classification used by the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Blocked,
    UpstreamUnavailable,
    Timeout,
    Internal,
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidQuery(_) => ErrorClass::Validation,
            Self::BlockedInput { .. } => ErrorClass::Blocked,
            Self::TranslationFailed
            | Self::ClassificationFailed
            | Self::ClassificationMalformed
            | Self::RetrievalFailed { .. }
            | Self::GenerationFailed { .. }
            | Self::EmptyGeneration
            | Self::BackTranslationFailed => ErrorClass::UpstreamUnavailable,
            Self::TimedOut | Self::Cancelled => ErrorClass::Timeout,
            Self::Internal => ErrorClass::Internal,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::Validation => 422,
            ErrorClass::Blocked => 400,
            ErrorClass::UpstreamUnavailable => 502,
            ErrorClass::Timeout => 504,
            ErrorClass::Internal => 500,
        }
    }

    /// Message shown to callers.
    pub fn public_message(&self) -> String {
        let msg = self.to_string();
        let mut chars = msg.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => msg,
        }
    }

    /// Caller-visible structured details, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::BlockedInput {
                concerns,
                recommended_action,
            } => Some(serde_json::json!({
                "concerns": concerns,
                "recommended_action": recommended_action,
            })),
            _ => None,
        }
    }

    /// Build the uniform error envelope for this error.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status: self.status_code(),
            message: self.public_message(),
            details: self.details(),
        }
    }
}

/// Uniform error body: `{status, message, details?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Wrap as `{"error": {...}}`, the shape used on the wire.
    pub fn into_body(self) -> serde_json::Value {
        serde_json::json!({ "error": self })
    }
}

/// A convenience type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
