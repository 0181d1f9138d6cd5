//! OpenAI-compatible provider implementation.
//!
//! [`OpenAiCompatProvider`] works with any API that follows the OpenAI chat
//! completion format (OpenAI, Azure-style gateways, Groq, local servers such
//! as vLLM or Ollama's compat endpoint).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use triage_types::config::ProviderSettings;

use crate::error::{ProviderError, Result};
use crate::provider::{CompletionRequest, LanguageModel};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, ResponseFormat};

/// A language model reached through the OpenAI chat completion API.
///
/// # Construction
///
/// ```rust,ignore
/// use triage_llm::OpenAiCompatProvider;
/// use triage_types::config::ProviderSettings;
///
/// let provider = OpenAiCompatProvider::new(ProviderSettings::default())?;
/// ```
pub struct OpenAiCompatProvider {
    settings: ProviderSettings,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    /// Create a provider; the API key is read from `settings.api_key_env`
    /// at request time.
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let http = build_client(&settings)?;
        Ok(Self {
            settings,
            http,
            api_key: None,
        })
    }

    /// Create a provider with an explicit API key, bypassing the
    /// environment lookup.
    pub fn with_api_key(settings: ProviderSettings, api_key: String) -> Result<Self> {
        let http = build_client(&settings)?;
        Ok(Self {
            settings,
            http,
            api_key: Some(api_key),
        })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn completions_url(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Resolve the API key: explicit key > environment variable.
    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        resolve_env_key(&self.settings.api_key_env)
    }

    fn chat_request(request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.instructions.is_empty() {
            messages.push(ChatMessage::system(&request.instructions));
        }
        messages.push(ChatMessage::user(&request.prompt));

        let mut chat = ChatRequest::new(&request.model, messages);
        chat.max_tokens = request.max_tokens;
        chat.temperature = request.temperature;
        if request.json_output {
            chat.response_format = Some(ResponseFormat::json_object());
        }
        chat
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let api_key = self.resolve_api_key()?;
        let url = self.completions_url();
        let body = Self::chat_request(request);

        debug!(
            provider = %self.settings.name,
            model = %request.model,
            json = request.json_output,
            "sending chat completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");

        for (k, v) in &self.settings.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.json(&body).send().await.map_err(map_send_error)?;
        let response = check_status(&self.settings.name, &request.model, response).await?;

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse response: {e}"))
        })?;

        let content = chat_response
            .first_content()
            .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".into()))?
            .to_string();

        debug!(
            provider = %self.settings.name,
            model = %chat_response.model,
            chars = content.len(),
            "chat completion response received"
        );

        Ok(content)
    }
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.settings.name)
            .field("base_url", &self.settings.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

pub(crate) fn build_client(settings: &ProviderSettings) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
        .build()?;
    Ok(client)
}

pub(crate) fn resolve_env_key(env_var: &str) -> Result<String> {
    std::env::var(env_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ProviderError::NotConfigured(format!("set {env_var} env var")))
}

/// Map a transport failure, keeping timeouts distinguishable.
pub(crate) fn map_send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(err)
    }
}

/// Turn a non-success response into the matching [`ProviderError`].
pub(crate) async fn check_status(
    provider: &str,
    model: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let header_ms = parse_retry_after_header(&response);
        let body = response.text().await.unwrap_or_default();

        // Billing/quota exhaustion also arrives as 429 but never clears on retry.
        if is_quota_exhausted(&body) {
            let msg = extract_error_message(&body)
                .unwrap_or_else(|| "credits exhausted or spending limit reached".into());
            warn!(provider, "quota exhausted (not retryable)");
            return Err(ProviderError::AuthFailed(msg));
        }

        let retry_ms = header_ms
            .or_else(|| parse_retry_after_ms(&body))
            .unwrap_or(1000);
        warn!(provider, retry_after_ms = retry_ms, "rate limited");
        return Err(ProviderError::RateLimited {
            retry_after_ms: retry_ms,
        });
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or(body);

    if status.as_u16() == 404 {
        return Err(ProviderError::ModelNotFound(format!(
            "model '{model}': {message}"
        )));
    }

    Err(ProviderError::from_status(status.as_u16(), message))
}

fn is_quota_exhausted(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("spending limit")
        || lower.contains("billing")
        || lower.contains("quota exceeded")
        || lower.contains("insufficient_quota")
}

/// Extract a human-readable error message from a JSON error response body.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error").and_then(|v| {
        // {"error": {"message": "..."}} or {"error": "..."}
        v.get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .or_else(|| v.as_str().map(String::from))
    })
}

/// Numeric `Retry-After` header in seconds; HTTP-date values are ignored.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    let header_val = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())?;
    let secs = header_val.trim().parse::<f64>().ok()?;
    Some((secs * 1000.0).max(0.0) as u64)
}

fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0) as u64)
        })
}
