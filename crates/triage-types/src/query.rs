//! Incoming query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A caller's question, exactly as received.
///
/// Created once per incoming request and never mutated afterwards; every
/// derived value (translation, classification, answer) lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    /// Raw question text.
    pub text: String,

    /// Language declared by the caller, if any. Detection still runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Caller-supplied identifier (external handle, not yet resolved).
    pub caller_id: String,

    /// When the query was received.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Query {
    /// Create a query stamped with the current time.
    pub fn new(text: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            caller_id: caller_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Attach a declared source language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Output of the translation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslatedQuery {
    /// Human-readable name of the detected language (e.g. "Tamil").
    pub detected_language: String,

    /// ISO 639-1 code of the detected language (e.g. "ta").
    pub language_code: String,

    /// The question rendered in the pipeline's working language.
    pub translated_text: String,

    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
}

impl TranslatedQuery {
    /// Build a translation result, clamping `confidence` into `[0, 1]`.
    pub fn new(
        detected_language: impl Into<String>,
        language_code: impl Into<String>,
        translated_text: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            detected_language: detected_language.into(),
            language_code: language_code.into(),
            translated_text: translated_text.into(),
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_new_has_no_declared_language() {
        let q = Query::new("I have had fever for two days", "U1");
        assert_eq!(q.caller_id, "U1");
        assert!(q.language.is_none());
    }

    #[test]
    fn query_with_language() {
        let q = Query::new("hola", "U2").with_language("Spanish");
        assert_eq!(q.language.as_deref(), Some("Spanish"));
    }

    #[test]
    fn query_deserialize_without_timestamp() {
        let q: Query = serde_json::from_str(r#"{"text":"hi there","caller_id":"U3"}"#).unwrap();
        assert_eq!(q.text, "hi there");
        assert!(q.created_at <= Utc::now());
    }

    #[test]
    fn translated_confidence_is_clamped() {
        assert_eq!(TranslatedQuery::new("English", "en", "x", 1.7).confidence, 1.0);
        assert_eq!(TranslatedQuery::new("English", "en", "x", -0.2).confidence, 0.0);
        assert_eq!(TranslatedQuery::new("English", "en", "x", f64::NAN).confidence, 0.0);
        assert_eq!(TranslatedQuery::new("English", "en", "x", 0.42).confidence, 0.42);
    }
}
