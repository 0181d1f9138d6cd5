//! Pre-flight safety guardrail.
//!
//! Runs on the translated text before classification. The guardrail fails
//! closed: if no verdict can be obtained the input is blocked.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use triage_llm::ProviderError;
use triage_types::{PipelineContext, PipelineError, SafetyVerdict};

use super::traits::SafetyChecker;

pub struct SafetyGuardrail {
    checker: Arc<dyn SafetyChecker>,
}

impl SafetyGuardrail {
    pub fn new(checker: Arc<dyn SafetyChecker>) -> Self {
        Self { checker }
    }

    /// Return the verdict when the input may proceed, otherwise
    /// [`PipelineError::BlockedInput`] carrying the verdict's concerns.
    pub async fn check(
        &self,
        text: &str,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<SafetyVerdict, PipelineError> {
        let verdict = match self.checker.check(text, cancel).await {
            Ok(verdict) => verdict,
            Err(ProviderError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(err) => {
                error!(session_id = %ctx.session_id, error = %err, "safety check unavailable, blocking");
                SafetyVerdict::unavailable()
            }
        };

        if !verdict.is_safe {
            info!(
                session_id = %ctx.session_id,
                concerns = ?verdict.concerns,
                "input blocked by safety guardrail"
            );
            return Err(PipelineError::BlockedInput {
                concerns: verdict.concerns,
                recommended_action: verdict.recommended_action,
            });
        }

        if verdict.is_emergency {
            info!(session_id = %ctx.session_id, "safety check flagged an emergency");
        }
        Ok(verdict)
    }
}
