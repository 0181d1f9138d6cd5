//! API error types.

use std::net::SocketAddr;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use triage_types::{ErrorEnvelope, PipelineError};

/// A request that failed, rendered as the uniform `{"error": {...}}` body.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The body or query string could not be decoded.
    #[error("malformed request: {0}")]
    Rejected(String),

    /// The run failed, or the request failed pipeline validation.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            Self::Rejected(reason) => {
                PipelineError::InvalidQuery(reason.clone()).envelope()
            }
            Self::Pipeline(err) => err.envelope(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = self.envelope();
        warn!(status = envelope.status, error = %self, "request failed");
        let status =
            StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(envelope.into_body())).into_response()
    }
}

/// Failure to run the HTTP server.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_validation_class() {
        let err = ApiError::Rejected("missing field `text`".into());
        let envelope = err.envelope();
        assert_eq!(envelope.status, 422);
        assert_eq!(envelope.message, "Invalid query: missing field `text`");
    }

    #[test]
    fn blocked_input_keeps_details() {
        let err = ApiError::from(PipelineError::BlockedInput {
            concerns: vec!["self-harm".into()],
            recommended_action: "Call a crisis line.".into(),
        });
        let envelope = err.envelope();
        assert_eq!(envelope.status, 400);
        assert_eq!(envelope.details.unwrap()["concerns"][0], "self-harm");
    }

    #[test]
    fn response_status_matches_envelope() {
        let response = ApiError::from(PipelineError::TimedOut).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
