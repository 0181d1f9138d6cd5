//! Provider error types for triage-llm.
//!
//! Every collaborator call (completion, embedding, similarity search)
//! returns [`Result<T>`] with [`ProviderError`] as the error type, so a
//! single retry classifier covers all of them.

use thiserror::Error;

/// Errors that can occur when calling an external provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request failed for a reason only described by text.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Authentication with the provider was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Upstream {
        status: u16,
        message: String,
    },

    /// The requested model does not exist on the provider.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The provider has not been configured (e.g. missing API key).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The provider returned a response that could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request timed out.
    #[error("timeout")]
    Timeout,

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every allowed attempt failed with a transient error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        /// The error from the final attempt.
        last: Box<ProviderError>,
    },

    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Build an error from an HTTP status and response body.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthFailed(body),
            429 => Self::RateLimited {
                retry_after_ms: 1000,
            },
            _ => Self::Upstream {
                status,
                message: body,
            },
        }
    }

    /// True for the "gave up" condition, as opposed to a single failure.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Upstream { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// A convenience type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_rate_limited() {
        let err = ProviderError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited: retry after 5000ms");
    }

    #[test]
    fn display_status() {
        let err = ProviderError::Upstream {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: unavailable");
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn display_exhausted_wraps_last() {
        let err = ProviderError::RetriesExhausted {
            attempts: 5,
            last: Box::new(ProviderError::Timeout),
        };
        assert_eq!(err.to_string(), "retries exhausted after 5 attempts: timeout");
        assert!(err.is_exhausted());
        assert!(!ProviderError::Timeout.is_exhausted());
    }

    #[test]
    fn from_status_classifies() {
        assert!(matches!(
            ProviderError::from_status(401, "no".into()),
            ProviderError::AuthFailed(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(400, "bad".into()),
            ProviderError::Upstream { status: 400, .. }
        ));
    }

    #[test]
    fn json_error_from_conversion() {
        let bad_json = serde_json::from_str::<serde_json::Value>("not json");
        let provider_err: ProviderError = bad_json.unwrap_err().into();
        assert!(provider_err.to_string().starts_with("json error:"));
    }
}
