//! Prompts for the non-RAG branches.
//!
//! The direct and administrative branches answer from the question alone.
//! The safety-critical branch first gathers patient-scoped safety passages
//! with a narrower `top_k` and frames them for a contraindication review.
//! Unlike the complex branch it never aborts on retrieval failure; the
//! prompt degrades to a cautious "no safety information" form instead.

use std::fmt::Write as _;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use triage_types::{PatientHistory, PipelineContext, PipelineError, RetrievedChunk};

use super::retrieval::RetrievalStage;

/// Caution added when safety passages could not be retrieved.
pub const SAFETY_RETRIEVAL_CAUTION: &str = "CRITICAL: Patient safety records could not be retrieved. \
Do not provide medication recommendations without safety verification. \
Recommend consulting a healthcare provider.";

/// Prompt for the direct branch. History is included when there is any.
pub fn direct_prompt(question: &str, history: &PatientHistory) -> String {
    if history.is_empty() {
        question.trim().to_string()
    } else {
        format!(
            "Patient history:\n{}\n\nQuestion: {}",
            history.render(),
            question.trim()
        )
    }
}

/// Prompt for the administrative branch.
pub fn administrative_prompt(question: &str) -> String {
    question.trim().to_string()
}

/// Retrieval question for the safety-critical branch.
pub fn safety_retrieval_question(patient_id: &str, question: &str) -> String {
    format!(
        "For patient {patient_id}, retrieve:\n\
         1. ALL known allergies (especially drug allergies)\n\
         2. Current medications and dosages\n\
         3. Recent adverse reactions or contraindications\n\
         4. Medical conditions that may affect medication use\n\n\
         Query context: {}",
        question.trim()
    )
}

/// Render safety passages as `[Source i: label (relevance: x.xx)]` blocks.
pub fn format_safety_sources(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[Source {}: {} (relevance: {:.2})]\n{}",
                i + 1,
                chunk.document_label(),
                chunk.score,
                chunk.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Full prompt for the safety-answer model call.
pub fn safety_prompt(
    ctx: &PipelineContext,
    question: &str,
    chunks: &[RetrievedChunk],
    retrieval_failed: bool,
) -> String {
    let mut prompt = format!("PATIENT SAFETY INFORMATION (Patient ID: {}):\n\n", ctx.caller_id);

    if chunks.is_empty() {
        let _ = write!(
            prompt,
            "No safety information found in patient {}'s records. CAUTION: Recommend \
             consulting a healthcare provider before proceeding with any medication or treatment.",
            ctx.caller_id
        );
    } else {
        prompt.push_str(&format_safety_sources(chunks));
    }
    if retrieval_failed {
        prompt.push_str("\n\n");
        prompt.push_str(SAFETY_RETRIEVAL_CAUTION);
    }

    let _ = write!(
        prompt,
        "\n\nPATIENT HISTORY:\n{}\n\n\
         INSTRUCTIONS FOR SAFETY ANALYSIS:\n\
         1. Review all allergies mentioned above, especially drug allergies\n\
         2. Check current medications for potential interactions\n\
         3. Identify any contraindications with the patient's query: \"{}\"\n\
         4. If SAFE: provide guidance with precautions\n\
         5. If CONTRAINDICATED: clearly warn and suggest alternatives\n\
         6. If UNCERTAIN: recommend consulting a healthcare provider",
        ctx.history.render(),
        question.trim()
    );
    prompt
}

/// Safety passages and the prompt built from them.
#[derive(Debug, Clone)]
pub struct SafetyBrief {
    pub prompt: String,
    pub chunks: Vec<RetrievedChunk>,
}

/// Gather safety passages and build the safety-answer prompt.
///
/// Only cancellation is returned as an error.
pub async fn prepare_safety_brief(
    retrieval: &RetrievalStage,
    question: &str,
    safety_top_k: usize,
    ctx: &PipelineContext,
    cancel: &CancellationToken,
) -> Result<SafetyBrief, PipelineError> {
    let safety_question = safety_retrieval_question(&ctx.caller_id, question);
    let (chunks, failed) = match retrieval
        .retrieve(&safety_question, safety_top_k, ctx, cancel)
        .await
    {
        Ok(chunks) => (chunks, false),
        Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
        Err(err) => {
            warn!(session_id = %ctx.session_id, error = %err, "safety retrieval failed, answering without records");
            (Vec::new(), true)
        }
    };

    debug!(session_id = %ctx.session_id, sources = chunks.len(), "safety brief prepared");
    let prompt = safety_prompt(ctx, question, &chunks, failed);
    Ok(SafetyBrief { prompt, chunks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{MockStore, chunk, ctx, fast_retry};
    use std::sync::Arc;

    #[test]
    fn direct_prompt_adds_history_only_when_present() {
        assert_eq!(direct_prompt(" fever? ", &PatientHistory::default()), "fever?");
        let history = PatientHistory {
            conditions: vec!["asthma".into()],
            ..Default::default()
        };
        let prompt = direct_prompt("fever?", &history);
        assert!(prompt.starts_with("Patient history:\n"));
        assert!(prompt.contains("Conditions: asthma"));
        assert!(prompt.ends_with("Question: fever?"));
    }

    #[test]
    fn sources_are_numbered_and_separated() {
        let text = format_safety_sources(&[
            chunk("a", "Allergic to penicillin.", 0.876),
            chunk("b", "Takes warfarin 5mg.", 0.5),
        ]);
        assert_eq!(
            text,
            "[Source 1: a.md (relevance: 0.88)]\nAllergic to penicillin.\n\n---\n\n\
             [Source 2: b.md (relevance: 0.50)]\nTakes warfarin 5mg."
        );
    }

    #[tokio::test]
    async fn brief_uses_safety_top_k_and_patient_scope() {
        let store = Arc::new(MockStore::with_chunks(vec![
            chunk("a", "Allergic to penicillin.", 0.9),
        ]));
        let retrieval = RetrievalStage::new(store.clone(), Arc::new(fast_retry()));
        let brief = prepare_safety_brief(
            &retrieval,
            "Can I take amoxicillin?",
            5,
            &ctx(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(*store.last_top_k.lock().unwrap(), Some(5));
        let question = store.last_question.lock().unwrap().clone().unwrap();
        assert!(question.starts_with("For patient PATIENT_U1, retrieve:"));
        assert!(question.ends_with("Query context: Can I take amoxicillin?"));
        assert_eq!(brief.chunks.len(), 1);
        assert!(brief.prompt.contains("[Source 1: a.md"));
        assert!(brief.prompt.contains("\"Can I take amoxicillin?\""));
        assert!(!brief.prompt.contains("CRITICAL"));
    }

    #[tokio::test]
    async fn no_chunks_recommends_provider() {
        let retrieval = RetrievalStage::new(
            Arc::new(MockStore::with_chunks(Vec::new())),
            Arc::new(fast_retry()),
        );
        let brief = prepare_safety_brief(&retrieval, "q", 5, &ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(brief.chunks.is_empty());
        assert!(brief.prompt.contains("No safety information found"));
        assert!(brief.prompt.contains("consulting a healthcare provider"));
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_with_caution() {
        let store = Arc::new(MockStore::failing(503));
        let retrieval = RetrievalStage::new(store.clone(), Arc::new(fast_retry()));
        let brief = prepare_safety_brief(&retrieval, "q", 5, &ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(brief.prompt.contains("No safety information found"));
        assert!(brief.prompt.contains(SAFETY_RETRIEVAL_CAUTION));
        assert_eq!(store.calls(), 5);
    }

    #[tokio::test]
    async fn cancellation_is_not_degraded() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let retrieval = RetrievalStage::new(
            Arc::new(MockStore::with_chunks(Vec::new())),
            Arc::new(fast_retry()),
        );
        let err = prepare_safety_brief(&retrieval, "q", 5, &ctx(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
    }
}
