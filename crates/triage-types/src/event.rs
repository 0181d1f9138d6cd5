//! Streaming events.
//!
//! A streamed run emits newline-delimited JSON objects of the form
//! `{"event": "context" | "answer" | "error", "data": {...}}`. A stream
//! always ends with exactly one `answer` or one `error` event.

use serde::{Deserialize, Serialize};

use crate::classification::Route;
use crate::error::ErrorEnvelope;
use crate::pipeline::PipelineResult;
use crate::retrieval::SourceAttribution;

/// Payload of the `context` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
    /// The question as the pipeline works with it (translated).
    pub question: String,
    pub session_id: String,
    pub route: Route,
    pub sources: Vec<SourceAttribution>,
}

/// Payload of the `error` event: `{"error": {status, message, details?}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: ErrorEnvelope,
}

/// One event on a pipeline stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum PipelineEvent {
    Context(ContextPayload),
    Answer(Box<PipelineResult>),
    Error(ErrorPayload),
}

impl PipelineEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Context(_) => "context",
            Self::Answer(_) => "answer",
            Self::Error(_) => "error",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Answer(_) | Self::Error(_))
    }

    /// Serialize as one NDJSON line (trailing `\n` included).
    pub fn to_ndjson(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
