//! Text embeddings via an OpenAI-compatible `/embeddings` endpoint.
//!
//! Failures use the same [`ProviderError`] model as completions, so the
//! retry classifier treats both alike.

use async_trait::async_trait;
use tracing::debug;

use triage_types::config::ProviderSettings;

use crate::error::{ProviderError, Result};
use crate::openai_compat::{build_client, check_status, map_send_error, resolve_env_key};
use crate::types::{EmbeddingRequest, EmbeddingResponse};

/// Trait for generating vector embeddings from text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; the output has one vector per input, in
    /// input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::InvalidResponse("no embedding returned".into()))
    }

    /// Identifier used in logs (e.g. the model name).
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Embedder backed by a remote OpenAI-compatible API.
pub struct OpenAiEmbedder {
    settings: ProviderSettings,
    model: String,
    dimension: Option<usize>,
    http: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(
        settings: ProviderSettings,
        model: impl Into<String>,
        dimension: Option<usize>,
    ) -> Result<Self> {
        let http = build_client(&settings)?;
        Ok(Self {
            settings,
            model: model.into(),
            dimension,
            http,
        })
    }

    fn embeddings_url(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        format!("{base}/embeddings")
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let api_key = resolve_env_key(&self.settings.api_key_env)?;
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimension,
        };

        debug!(model = %self.model, inputs = texts.len(), "sending embedding request");

        let mut req = self
            .http
            .post(self.embeddings_url())
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");
        for (k, v) in &self.settings.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.json(&body).send().await.map_err(map_send_error)?;
        let response = check_status(&self.settings.name, &self.model, response).await?;

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse embeddings: {e}"))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_url_construction() {
        let settings = ProviderSettings {
            base_url: "http://localhost:9000/v1/".into(),
            ..ProviderSettings::default()
        };
        let embedder = OpenAiEmbedder::new(settings, "text-embedding-3-small", None).unwrap();
        assert_eq!(embedder.embeddings_url(), "http://localhost:9000/v1/embeddings");
        assert_eq!(embedder.name(), "text-embedding-3-small");
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let settings = ProviderSettings {
            api_key_env: "TRIAGE_EMBED_KEY_THAT_IS_NOT_SET".into(),
            ..ProviderSettings::default()
        };
        let embedder = OpenAiEmbedder::new(settings, "m", None).unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }
}
