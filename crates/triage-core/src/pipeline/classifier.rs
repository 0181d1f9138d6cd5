//! Classification stage: validate whatever the classifier handed back.
//!
//! A structured payload must decode as a [`Classification`] as-is. Plain
//! text gets a strict parse and then exactly one lenient attempt through
//! [`repair_json`](crate::json_repair::repair_json); anything still
//! unreadable is [`PipelineError::ClassificationMalformed`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use triage_llm::ProviderError;
use triage_types::{Classification, PipelineContext, PipelineError};

use super::traits::{Classifier, ClassifierOutput};
use crate::json_repair::repair_json;

/// Decode classifier output into a [`Classification`].
pub fn decode_classification(output: ClassifierOutput) -> Result<Classification, PipelineError> {
    match output {
        ClassifierOutput::Structured(value) => serde_json::from_value(value).map_err(|e| {
            warn!(error = %e, "structured classification has the wrong shape");
            PipelineError::ClassificationMalformed
        }),
        ClassifierOutput::Text(text) => {
            if let Ok(classification) = serde_json::from_str(&text) {
                return Ok(classification);
            }
            serde_json::from_str(&repair_json(&text)).map_err(|e| {
                warn!(error = %e, "unstructured classification could not be recovered");
                PipelineError::ClassificationMalformed
            })
        }
    }
}

/// Calls the classifier once and validates the result.
pub struct ClassificationStage {
    classifier: Arc<dyn Classifier>,
}

impl ClassificationStage {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    pub async fn classify(
        &self,
        text: &str,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<Classification, PipelineError> {
        let output = match self.classifier.classify(text, cancel).await {
            Ok(output) => output,
            Err(ProviderError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(err) => {
                error!(session_id = %ctx.session_id, error = %err, "classification call failed");
                return Err(PipelineError::ClassificationFailed);
            }
        };

        let classification = decode_classification(output)?;
        debug!(
            session_id = %ctx.session_id,
            route = classification.route().as_str(),
            urgency = %classification.urgency_level,
            category = %classification.category,
            "query classified"
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{MockClassifier, ctx};
    use serde_json::json;
    use triage_types::{Route, UrgencyLevel};

    #[test]
    fn structured_payload_decodes() {
        let c = decode_classification(ClassifierOutput::Structured(json!({
            "is_complex": true,
            "urgency_level": "high",
            "category": "respiratory"
        })))
        .unwrap();
        assert!(c.is_complex);
        assert_eq!(c.urgency_level, UrgencyLevel::High);
        assert_eq!(c.route(), Route::Complex);
    }

    #[test]
    fn structured_payload_with_wrong_shape_is_malformed() {
        let err = decode_classification(ClassifierOutput::Structured(json!({
            "complex": "maybe"
        })))
        .unwrap_err();
        assert_eq!(err, PipelineError::ClassificationMalformed);
    }

    #[test]
    fn text_payload_recovers_once() {
        let text = "Here you go:\n```json\n{is_complex: false, is_administrative: true, urgency_level: \"low\",}\n```";
        let c = decode_classification(ClassifierOutput::Text(text.into())).unwrap();
        assert!(c.is_administrative);
        assert_eq!(c.route(), Route::Administrative);
    }

    #[test]
    fn prose_is_malformed() {
        let err = decode_classification(ClassifierOutput::Text(
            "This looks like a simple question to me.".into(),
        ))
        .unwrap_err();
        assert_eq!(err, PipelineError::ClassificationMalformed);
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = decode_classification(ClassifierOutput::Text(r#"{"is_complex": true}"#.into()))
            .unwrap_err();
        assert_eq!(err, PipelineError::ClassificationMalformed);
    }

    #[tokio::test]
    async fn call_failure_is_classification_failed() {
        let classifier = Arc::new(MockClassifier::failing());
        let err = ClassificationStage::new(classifier.clone())
            .classify("q", &ctx(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::ClassificationFailed);
        assert_eq!(classifier.calls(), 1);
    }

    #[tokio::test]
    async fn stage_returns_decoded_classification() {
        let expected = Classification {
            is_safety_critical: true,
            ..Classification::simple(UrgencyLevel::Medium)
        };
        let stage = ClassificationStage::new(Arc::new(MockClassifier::structured(&expected)));
        let c = stage
            .classify("can I take ibuprofen", &ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(c, expected);
    }
}
