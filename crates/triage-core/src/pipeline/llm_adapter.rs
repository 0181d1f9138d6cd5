//! Language-model implementations of the pipeline capabilities.
//!
//! Translation, back-translation, safety checking and classification are
//! each one completion against a shared [`LanguageModel`] with role
//! instructions. Every call goes through the shared [`RetryPolicy`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use triage_llm::{CompletionRequest, LanguageModel, ProviderError, Result, RetryPolicy};
use triage_types::{SafetyVerdict, TranslatedQuery};

use super::traits::{BackTranslator, Classifier, ClassifierOutput, SafetyChecker, Translator};
use crate::json_repair::parse_with_repair;

/// One model role: model id, instructions and the retry policy.
#[derive(Clone)]
pub struct LlmRole {
    model: Arc<dyn LanguageModel>,
    retry: Arc<RetryPolicy>,
    model_id: String,
    instructions: String,
}

impl LlmRole {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retry: Arc<RetryPolicy>,
        model_id: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            model,
            retry,
            model_id: model_id.into(),
            instructions: instructions.into(),
        }
    }

    async fn call(
        &self,
        operation: &str,
        prompt: String,
        json: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut request = CompletionRequest::new(
            self.instructions.as_str(),
            prompt,
            self.model_id.as_str(),
        )
        .with_temperature(0.0);
        if json {
            request = request.json();
        }
        let text = self
            .retry
            .run(operation, cancel, || self.model.complete(&request))
            .await?;
        debug!(operation, model = %self.model_id, chars = text.len(), "capability call complete");
        Ok(text)
    }
}

impl std::fmt::Debug for LlmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRole")
            .field("provider", &self.model.name())
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TranslationPayload {
    detected_language: String,
    language_code: String,
    translated_text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Detects the language and translates into English.
#[derive(Debug, Clone)]
pub struct LlmTranslator {
    role: LlmRole,
}

impl LlmTranslator {
    pub fn new(role: LlmRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(
        &self,
        text: &str,
        declared_language: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TranslatedQuery> {
        let prompt = match declared_language {
            Some(language) => format!("Declared language: {language}\n\nMessage:\n{text}"),
            None => text.to_string(),
        };
        let raw = self.role.call("translation", prompt, true, cancel).await?;
        let payload: TranslationPayload = decode(&raw, "translation")?;
        if payload.translated_text.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(
                "translation returned empty text".into(),
            ));
        }
        Ok(TranslatedQuery::new(
            payload.detected_language.trim(),
            payload.language_code.trim().to_lowercase(),
            payload.translated_text.trim(),
            payload.confidence.unwrap_or(0.0),
        ))
    }
}

/// Translates answers back into the caller's language.
#[derive(Debug, Clone)]
pub struct LlmBackTranslator {
    role: LlmRole,
}

impl LlmBackTranslator {
    pub fn new(role: LlmRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl BackTranslator for LlmBackTranslator {
    async fn back_translate(
        &self,
        answer: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!("Translate to {language}: {answer}");
        let text = self.role.call("back_translation", prompt, false, cancel).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "back-translation returned empty text".into(),
            ));
        }
        Ok(text.to_string())
    }
}

/// Produces a [`SafetyVerdict`] from a JSON completion.
#[derive(Debug, Clone)]
pub struct LlmSafetyChecker {
    role: LlmRole,
}

impl LlmSafetyChecker {
    pub fn new(role: LlmRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl SafetyChecker for LlmSafetyChecker {
    async fn check(&self, text: &str, cancel: &CancellationToken) -> Result<SafetyVerdict> {
        let raw = self
            .role
            .call("safety_check", text.to_string(), true, cancel)
            .await?;
        decode(&raw, "safety verdict")
    }
}

/// Returns the raw classification text for the stage to validate.
#[derive(Debug, Clone)]
pub struct LlmClassifier {
    role: LlmRole,
}

impl LlmClassifier {
    pub fn new(role: LlmRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, text: &str, cancel: &CancellationToken) -> Result<ClassifierOutput> {
        let raw = self
            .role
            .call("classification", text.to_string(), true, cancel)
            .await?;
        Ok(ClassifierOutput::Text(raw))
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    let value = parse_with_repair(raw)
        .map_err(|e| ProviderError::InvalidResponse(format!("{what} is not JSON: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(format!("{what} has the wrong shape: {e}")))
}
