//! Exponential backoff retry logic for external provider calls.
//!
//! [`RetryPolicy`] runs any async operation returning [`Result`] and
//! retries transient failures (HTTP 429, 5xx, timeouts and a handful of
//! well-known message patterns) with capped exponential backoff. Every
//! attempt and every backoff sleep races a [`CancellationToken`], so a
//! caller-side timeout or disconnect preempts the loop immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use triage_types::config::RetrySettings;

use crate::error::{ProviderError, Result};

/// Message fragments that mark a text-only failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "server error",
    "internal",
    "temporar",
    "429",
    "timed out",
];

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 5).
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 1 second).
    pub base_delay: Duration,
    /// Lower bound for any backoff delay (default: 1 second).
    pub min_delay: Duration,
    /// Upper bound for any backoff delay (default: 30 seconds).
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (default: 2.0).
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            min_delay: Duration::from_millis(settings.min_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }
}

/// Determines whether a [`ProviderError`] should be retried.
///
/// An HTTP status, when known, is authoritative: 429 and 5xx retry, every
/// other status is terminal. Text-only failures fall back to pattern
/// matching.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. } | ProviderError::Timeout => true,
        ProviderError::Upstream { status, .. } => is_transient_status(*status),
        ProviderError::Http(e) => {
            if e.is_timeout() {
                return true;
            }
            match e.status() {
                Some(status) => is_transient_status(status.as_u16()),
                // Connection resets and refused connects carry no status.
                None => true,
            }
        }
        ProviderError::RequestFailed(msg) => matches_transient_pattern(msg),
        ProviderError::AuthFailed(_)
        | ProviderError::ModelNotFound(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::InvalidResponse(_)
        | ProviderError::Json(_)
        | ProviderError::RetriesExhausted { .. }
        | ProviderError::Cancelled => false,
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn matches_transient_pattern(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Calculate the delay after failed attempt `n` (0-indexed).
///
/// The delay is `base_delay * multiplier^n`, clamped to
/// `[min_delay, max_delay]`. With the defaults this yields 1s, 2s, 4s, 8s.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = config.multiplier.max(1.0).powi(attempt.min(63) as i32);
    let raw_ms = config.base_delay.as_millis() as f64 * factor;
    let min_ms = config.min_delay.as_millis() as f64;
    let max_ms = (config.max_delay.as_millis() as f64).max(min_ms);
    Duration::from_millis(raw_ms.clamp(min_ms, max_ms) as u64)
}

/// Retries transient failures of arbitrary async operations.
///
/// The policy holds no per-call state, so one instance is shared by every
/// stage and every concurrent pipeline run.
///
/// # Example
///
/// ```rust,ignore
/// use triage_llm::retry::{RetryConfig, RetryPolicy};
///
/// let policy = RetryPolicy::new(RetryConfig::default());
/// let text = policy
///     .run("generation", &cancel, || model.complete(&request))
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns a reference to the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff delay for a failure on attempt `n` (0-indexed).
    ///
    /// A rate-limit hint from the provider lengthens the computed delay but
    /// never beyond `max_delay`.
    fn delay_for(&self, err: &ProviderError, attempt: u32) -> Duration {
        let computed = compute_delay(&self.config, attempt);
        match err {
            ProviderError::RateLimited { retry_after_ms } => computed
                .max(Duration::from_millis(*retry_after_ms))
                .min(self.config.max_delay.max(self.config.min_delay)),
            _ => computed,
        }
    }

    /// Run `f` until it succeeds, fails terminally, or attempts run out.
    ///
    /// - a non-retryable error is returned unchanged after the first attempt
    /// - exhausting `max_attempts` returns [`ProviderError::RetriesExhausted`]
    /// - cancellation returns [`ProviderError::Cancelled`], even mid-backoff
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                outcome = f() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                debug!(operation, attempt, error = %err, "terminal failure, not retrying");
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                return Err(ProviderError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(&err, attempt - 1);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
