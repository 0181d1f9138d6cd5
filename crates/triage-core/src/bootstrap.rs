//! Application bootstrap and dependency wiring.
//!
//! [`AppContext`] builds every collaborator once from a [`Config`] and
//! hands out shared handles to them. Nothing here is lazily initialised;
//! a process constructs one context at startup and passes the
//! [`Orchestrator`] to its serving layer.
//!
//! # Usage
//!
//! ```rust,ignore
//! use triage_core::bootstrap::AppContext;
//! use triage_types::Config;
//!
//! let ctx = AppContext::new(Config::default()).await?;
//! let result = ctx.orchestrator().process(query, &cancel).await?;
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use triage_llm::{LanguageModel, OpenAiCompatProvider, OpenAiEmbedder, ProviderError, RetryPolicy};
use triage_types::Config;

use crate::identity::JsonIdentityStore;
use crate::instructions::{InstructionRole, Instructions, InstructionsError};
use crate::pipeline::llm_adapter::{
    LlmBackTranslator, LlmClassifier, LlmRole, LlmSafetyChecker, LlmTranslator,
};
use crate::pipeline::orchestrator::{Collaborators, Orchestrator, PipelineSettings};
use crate::pipeline::traits::{EmptyHistory, IdentityResolver, PassthroughResolver};
use crate::vector_index::{EmbeddingIndex, IndexError};

/// Failure to assemble the application.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("instructions: {0}")]
    Instructions(#[from] InstructionsError),

    #[error("vector index: {0}")]
    Index(#[from] IndexError),
}

/// Fully wired application.
pub struct AppContext {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    mapping: Option<Arc<JsonIdentityStore>>,
}

impl AppContext {
    /// Build every component from `config`:
    ///
    /// 1. the OpenAI-compatible model client and retry policy
    /// 2. instructions (built-in, overridden from `instructionsDir`)
    /// 3. the vector index from `retrieval.corpusPath` (empty if unset)
    /// 4. the identifier mapping from `mappingFile` (passthrough if unset)
    /// 5. the LLM-backed capabilities and the orchestrator
    pub async fn new(config: Config) -> Result<Self, BootstrapError> {
        info!(provider = %config.provider.name, "bootstrapping triage pipeline");

        let model: Arc<dyn LanguageModel> =
            Arc::new(OpenAiCompatProvider::new(config.provider.clone())?);
        let retry = Arc::new(RetryPolicy::new((&config.retry).into()));
        debug!(config = ?retry.config(), "retry policy ready");

        let instructions = match &config.instructions_dir {
            Some(dir) => Instructions::load(dir)?,
            None => Instructions::default(),
        };

        let embedder = Arc::new(OpenAiEmbedder::new(
            config.provider.clone(),
            config.retrieval.embedding_model.clone(),
            config.retrieval.embedding_dimension,
        )?);
        let index = match &config.retrieval.corpus_path {
            Some(path) => EmbeddingIndex::load(path, embedder).await?,
            None => {
                info!("no corpus configured, retrieval will return no context");
                EmbeddingIndex::build(embedder, Vec::new()).await?
            }
        };

        let mapping = match &config.mapping_file {
            Some(path) => Some(Arc::new(JsonIdentityStore::open(path).await)),
            None => None,
        };
        let identity: Arc<dyn IdentityResolver> = match &mapping {
            Some(store) => store.clone() as Arc<dyn IdentityResolver>,
            None => Arc::new(PassthroughResolver),
        };

        let role = |role: InstructionRole, model_id: &str| {
            LlmRole::new(
                model.clone(),
                retry.clone(),
                model_id,
                instructions.get(role),
            )
        };
        let models = &config.models;
        let collaborators = Collaborators {
            translator: Arc::new(LlmTranslator::new(role(
                InstructionRole::Translator,
                models.translator.as_str(),
            ))),
            back_translator: Arc::new(LlmBackTranslator::new(role(
                InstructionRole::BackTranslation,
                models.back_translation.as_str(),
            ))),
            safety: Arc::new(LlmSafetyChecker::new(role(
                InstructionRole::SafetyCheck,
                models.safety.as_str(),
            ))),
            classifier: Arc::new(LlmClassifier::new(role(
                InstructionRole::Classifier,
                models.classifier.as_str(),
            ))),
            vector_store: Arc::new(index),
            model: model.clone(),
            identity,
            history: Arc::new(EmptyHistory),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            collaborators,
            instructions,
            PipelineSettings::from_config(&config),
            retry,
        ));

        info!("bootstrap complete");
        Ok(Self {
            config,
            orchestrator,
            mapping,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the pipeline.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The identifier mapping store, when one is configured.
    pub fn mapping(&self) -> Option<&Arc<JsonIdentityStore>> {
        self.mapping.as_ref()
    }
}
