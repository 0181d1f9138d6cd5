//! Configuration schema.
//!
//! All structs accept both `snake_case` and `camelCase` field names via
//! `#[serde(alias)]`. Unknown fields are ignored and every field has a
//! default, so an empty JSON object is a valid configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// LLM / embedding provider connection.
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Model identifier per pipeline role.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Grounded generation parameters.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retrieval breadth and corpus location.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Backoff schedule for external calls.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Directory of `<role>.txt` instruction overrides.
    #[serde(default, alias = "instructionsDir")]
    pub instructions_dir: Option<PathBuf>,

    /// JSON file backing the caller identifier mapping.
    #[serde(default, alias = "mappingFile")]
    pub mapping_file: Option<PathBuf>,
}

impl Config {
    /// Default config file location (`~/.triage/config.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".triage").join("config.json"))
    }

    /// Read, parse and validate a config file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.topK must be at least 1".into()));
        }
        if self.retrieval.safety_top_k == 0 {
            return Err(ConfigError::Invalid(
                "retrieval.safetyTopK must be at least 1".into(),
            ));
        }
        if self.retrieval.safety_top_k >= self.retrieval.top_k {
            return Err(ConfigError::Invalid(format!(
                "retrieval.safetyTopK ({}) must be smaller than retrieval.topK ({})",
                self.retrieval.safety_top_k, self.retrieval.top_k
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.maxAttempts must be at least 1".into()));
        }
        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.minDelayMs must not exceed retry.maxDelayMs".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}

// ── Server ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Overall deadline for one synchronous run.
    #[serde(default = "default_request_timeout", alias = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default, alias = "corsOrigins")]
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            cors_origins: Vec::new(),
        }
    }
}

// ── Provider ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: String,

    /// Environment variable that holds the API key.
    #[serde(default = "default_api_key_env", alias = "apiKeyEnv")]
    pub api_key_env: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_provider_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_provider_timeout() -> u64 {
    60
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_provider_timeout(),
            headers: HashMap::new(),
        }
    }
}

// ── Models ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_small_model")]
    pub translator: String,

    #[serde(default = "default_small_model")]
    pub classifier: String,

    #[serde(default = "default_small_model")]
    pub safety: String,

    #[serde(default = "default_small_model")]
    pub direct: String,

    #[serde(default = "default_small_model")]
    pub administrative: String,

    #[serde(default = "default_small_model", alias = "safetyAnswer")]
    pub safety_answer: String,

    #[serde(default = "default_generation_model")]
    pub generation: String,

    #[serde(default = "default_small_model", alias = "backTranslation")]
    pub back_translation: String,
}

fn default_small_model() -> String {
    "gpt-4.1-nano".into()
}
fn default_generation_model() -> String {
    "gpt-4o".into()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            translator: default_small_model(),
            classifier: default_small_model(),
            safety: default_small_model(),
            direct: default_small_model(),
            administrative: default_small_model(),
            safety_answer: default_small_model(),
            generation: default_generation_model(),
            back_translation: default_small_model(),
        }
    }
}

// ── Generation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens", alias = "maxTokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_max_tokens() -> u32 {
    800
}
fn default_temperature() -> f64 {
    0.2
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

// ── Retrieval ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Breadth of the general RAG branch.
    #[serde(default = "default_top_k", alias = "topK")]
    pub top_k: usize,

    /// Breadth of the safety branch; must stay below `top_k`.
    #[serde(default = "default_safety_top_k", alias = "safetyTopK")]
    pub safety_top_k: usize,

    /// JSON corpus loaded into the in-memory index.
    #[serde(default, alias = "corpusPath")]
    pub corpus_path: Option<PathBuf>,

    #[serde(default = "default_embedding_model", alias = "embeddingModel")]
    pub embedding_model: String,

    #[serde(default, alias = "embeddingDimension")]
    pub embedding_dimension: Option<usize>,
}

fn default_top_k() -> usize {
    8
}
fn default_safety_top_k() -> usize {
    5
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            safety_top_k: default_safety_top_k(),
            corpus_path: None,
            embedding_model: default_embedding_model(),
            embedding_dimension: None,
        }
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Backoff schedule: `clamp(base * multiplier^n, min, max)` before retry
/// `n + 1`, for at most `max_attempts` total attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts", alias = "maxAttempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms", alias = "baseDelayMs")]
    pub base_delay_ms: u64,

    #[serde(default = "default_min_delay_ms", alias = "minDelayMs")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms", alias = "maxDelayMs")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_min_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}
