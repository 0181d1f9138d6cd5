//! The query pipeline.
//!
//! Stages, in run order:
//!
//! - [`safety::SafetyGuardrail`] vetoes unsafe input (fails closed)
//! - [`classifier::ClassificationStage`] validates the routing decision
//! - [`retrieval::RetrievalStage`] fetches ranked context chunks
//! - [`generation::GenerationStage`] produces the answer
//!
//! [`orchestrator::Orchestrator`] drives them, and
//! [`stream::StreamEmitter`] reports progress for streamed runs.
//! Collaborator capabilities are declared in [`traits`]; their
//! language-model implementations are in [`llm_adapter`].

pub mod classifier;
pub mod generation;
pub mod llm_adapter;
pub mod orchestrator;
pub mod responders;
pub mod retrieval;
pub mod safety;
pub mod stream;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;
