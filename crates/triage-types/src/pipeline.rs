//! Per-run pipeline state and the terminal result.

use serde::{Deserialize, Serialize};

use crate::classification::{Classification, Route};
use crate::query::TranslatedQuery;
use crate::retrieval::SourceAttribution;

/// Caller history supplied by the storage layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientHistory {
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub past_visits: Vec<String>,
}

impl PatientHistory {
    pub fn is_empty(&self) -> bool {
        self.allergies.is_empty()
            && self.medications.is_empty()
            && self.conditions.is_empty()
            && self.past_visits.is_empty()
    }

    /// Render as a short prompt section. Empty categories read "none recorded".
    pub fn render(&self) -> String {
        fn list(items: &[String]) -> String {
            if items.is_empty() {
                "none recorded".into()
            } else {
                items.join(", ")
            }
        }
        format!(
            "Known allergies: {}\nCurrent medications: {}\nConditions: {}\nPast visits: {}",
            list(&self.allergies),
            list(&self.medications),
            list(&self.conditions),
            list(&self.past_visits),
        )
    }
}

/// Ambient data for one pipeline run, passed by reference to every stage.
///
/// Never persisted by the pipeline itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineContext {
    /// Stable caller identifier (already resolved through the mapping store).
    pub caller_id: String,

    /// Detected language name. Starts as the declared language (or
    /// `"unknown"`) and is replaced once translation succeeds.
    pub detected_language: String,

    /// Unique per run; used for log correlation only.
    pub session_id: String,

    /// Caller history from the storage layer.
    pub history: PatientHistory,
}

impl PipelineContext {
    pub fn new(
        caller_id: impl Into<String>,
        declared_language: Option<&str>,
        session_id: impl Into<String>,
        history: PatientHistory,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            detected_language: declared_language.unwrap_or("unknown").to_string(),
            session_id: session_id.into(),
            history,
        }
    }
}

/// Pre-flight verdict from the safety guardrail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,

    #[serde(default)]
    pub is_emergency: bool,

    #[serde(default)]
    pub concerns: Vec<String>,

    #[serde(default, alias = "action")]
    pub recommended_action: String,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            is_emergency: false,
            concerns: Vec::new(),
            recommended_action: "proceed".into(),
        }
    }

    /// The fail-closed verdict used when no verdict could be obtained.
    pub fn unavailable() -> Self {
        Self {
            is_safe: false,
            is_emergency: false,
            concerns: vec!["safety check unavailable".into()],
            recommended_action:
                "The request could not be safety-checked. Please try again later or contact a healthcare provider."
                    .into(),
        }
    }
}

/// Terminal artifact of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Final response text, in the caller's language when back-translation
    /// succeeded.
    pub response: String,
    pub detected_language: String,
    pub language_code: String,
    pub confidence: f64,
    pub classification: Classification,
    pub session_id: String,
    pub route: Route,
    #[serde(default)]
    pub sources: Vec<SourceAttribution>,
    /// Set when the response carries the emergency warning prefix.
    #[serde(default)]
    pub emergency: bool,
    /// Set when back-translation failed and `response` is untranslated.
    #[serde(default)]
    pub translation_failed: bool,
}

impl PipelineResult {
    /// Assemble a result from the pieces of a finished run.
    pub fn assemble(
        response: String,
        translated: &TranslatedQuery,
        classification: Classification,
        session_id: &str,
        sources: Vec<SourceAttribution>,
    ) -> Self {
        let route = classification.route();
        Self {
            response,
            detected_language: translated.detected_language.clone(),
            language_code: translated.language_code.clone(),
            confidence: translated.confidence,
            classification,
            session_id: session_id.to_string(),
            route,
            sources,
            emergency: false,
            translation_failed: false,
        }
    }
}
