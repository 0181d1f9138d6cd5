//! End-to-end query pipeline.
//!
//! One run moves through a fixed sequence of states and never re-enters
//! one:
//!
//! ```text
//! Translate -> SafetyCheck -> Classify -> Route -> Respond -> TranslateBack
//! ```
//!
//! Every state except TranslateBack aborts the run on failure. Respond is
//! the only branching point; [`Route`] enumerates its branches. All
//! collaborators are shared read-only handles, so any number of runs can
//! be in flight on one [`Orchestrator`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use triage_llm::{LanguageModel, ProviderError, RetryPolicy};
use triage_types::config::{GenerationConfig, ModelsConfig};
use triage_types::event::ContextPayload;
use triage_types::retrieval::sources_from_chunks;
use triage_types::{
    Config, PipelineContext, PipelineError, PipelineEvent, PipelineResult, Query,
    RetrievedChunk, Route, TranslatedQuery,
};

use super::classifier::ClassificationStage;
use super::generation::{GenerationStage, ModelParams};
use super::responders::{administrative_prompt, direct_prompt, prepare_safety_brief};
use super::retrieval::RetrievalStage;
use super::safety::SafetyGuardrail;
use super::stream::StreamEmitter;
use super::traits::{
    BackTranslator, Classifier, HistoryProvider, IdentityResolver, SafetyChecker, Translator,
    VectorStore,
};
use crate::instructions::{InstructionRole, Instructions};

/// Prepended to every response for an emergency. Always English and
/// applied after back-translation so no model call can drop it.
pub const EMERGENCY_PREFIX: &str = "\u{26a0}\u{fe0f} EMERGENCY: If this is a medical emergency, \
call your local emergency number or go to the nearest emergency department immediately.\n\n";

/// Read-only tuning shared by every run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub safety_top_k: usize,
    pub models: ModelsConfig,
    pub generation: GenerationConfig,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            safety_top_k: config.retrieval.safety_top_k,
            models: config.models.clone(),
            generation: config.generation.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Every external capability a run uses.
pub struct Collaborators {
    pub translator: Arc<dyn Translator>,
    pub back_translator: Arc<dyn BackTranslator>,
    pub safety: Arc<dyn SafetyChecker>,
    pub classifier: Arc<dyn Classifier>,
    pub vector_store: Arc<dyn VectorStore>,
    pub model: Arc<dyn LanguageModel>,
    pub identity: Arc<dyn IdentityResolver>,
    pub history: Arc<dyn HistoryProvider>,
}

pub struct Orchestrator {
    translator: Arc<dyn Translator>,
    back_translator: Arc<dyn BackTranslator>,
    guardrail: SafetyGuardrail,
    classification: ClassificationStage,
    retrieval: RetrievalStage,
    generation: GenerationStage,
    identity: Arc<dyn IdentityResolver>,
    history: Arc<dyn HistoryProvider>,
    instructions: Instructions,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        instructions: Instructions,
        settings: PipelineSettings,
        retry: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            translator: collaborators.translator,
            back_translator: collaborators.back_translator,
            guardrail: SafetyGuardrail::new(collaborators.safety),
            classification: ClassificationStage::new(collaborators.classifier),
            retrieval: RetrievalStage::new(collaborators.vector_store, retry.clone()),
            generation: GenerationStage::new(collaborators.model, retry),
            identity: collaborators.identity,
            history: collaborators.history,
            instructions,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one query to completion.
    pub async fn process(
        &self,
        query: Query,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(query, cancel, None).await
    }

    /// Run one query to completion within `deadline`.
    ///
    /// On expiry `cancel` is cancelled and the run fails with
    /// [`PipelineError::TimedOut`].
    pub async fn process_within(
        &self,
        query: Query,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<PipelineResult, PipelineError> {
        match tokio::time::timeout(deadline, self.run(query, cancel, None)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(deadline_expired(cancel, deadline)),
        }
    }

    /// Run one query, reporting progress on `emitter`.
    ///
    /// The emitter always receives exactly one terminal event.
    pub async fn process_streaming(
        &self,
        query: Query,
        cancel: &CancellationToken,
        emitter: &mut StreamEmitter,
    ) {
        let outcome = self.run(query, cancel, Some(&mut *emitter)).await;
        finish(outcome, emitter).await;
    }

    /// Streaming counterpart of [`Orchestrator::process_within`]. A run
    /// that outlives `deadline` ends with a `TimedOut` error event.
    pub async fn process_streaming_within(
        &self,
        query: Query,
        cancel: &CancellationToken,
        deadline: Duration,
        emitter: &mut StreamEmitter,
    ) {
        let run = self.run(query, cancel, Some(&mut *emitter));
        let outcome = match tokio::time::timeout(deadline, run).await {
            Ok(outcome) => outcome,
            Err(_) => Err(deadline_expired(cancel, deadline)),
        };
        finish(outcome, emitter).await;
    }

    /// Spawn a streamed run and return its event receiver.
    pub fn spawn_stream(
        self: &Arc<Self>,
        query: Query,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<PipelineEvent> {
        self.spawn_streaming(query, cancel, None)
    }

    /// Spawn a streamed run bounded by `deadline`.
    pub fn spawn_stream_within(
        self: &Arc<Self>,
        query: Query,
        cancel: CancellationToken,
        deadline: Duration,
    ) -> mpsc::Receiver<PipelineEvent> {
        self.spawn_streaming(query, cancel, Some(deadline))
    }

    /// The run task is watched: if it dies before its terminal event, the
    /// watcher closes the stream with an `Internal` error.
    fn spawn_streaming(
        self: &Arc<Self>,
        query: Query,
        cancel: CancellationToken,
        deadline: Option<Duration>,
    ) -> mpsc::Receiver<PipelineEvent> {
        let (mut emitter, rx) = StreamEmitter::channel();
        let sentinel = emitter.sentinel();
        let orchestrator = Arc::clone(self);
        let run = tokio::spawn(async move {
            match deadline {
                Some(deadline) => {
                    orchestrator
                        .process_streaming_within(query, &cancel, deadline, &mut emitter)
                        .await
                }
                None => {
                    orchestrator
                        .process_streaming(query, &cancel, &mut emitter)
                        .await
                }
            }
        });
        tokio::spawn(async move {
            if let Err(err) = run.await {
                error!(error = %err, "streamed run aborted");
            }
            sentinel.close(&PipelineError::Internal).await;
        });
        rx
    }

    async fn run(
        &self,
        query: Query,
        cancel: &CancellationToken,
        emitter: Option<&mut StreamEmitter>,
    ) -> Result<PipelineResult, PipelineError> {
        validate(&query)?;
        let session_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline", session_id = %session_id);
        self.execute(query, session_id, cancel, emitter)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        query: Query,
        session_id: String,
        cancel: &CancellationToken,
        mut emitter: Option<&mut StreamEmitter>,
    ) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        checkpoint(cancel)?;

        let caller_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            id = self.resolve_caller(&query.caller_id) => id,
        };
        let history = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            history = self.history.fetch(&caller_id) => history,
        };
        let mut ctx = PipelineContext::new(caller_id, query.language.as_deref(), session_id, history);
        info!(caller_id = %ctx.caller_id, "pipeline started");

        // Translate
        checkpoint(cancel)?;
        let translated = self.translate(&query, &ctx, cancel).await?;
        ctx.detected_language = translated.detected_language.clone();
        let question = translated.translated_text.as_str();

        // SafetyCheck
        checkpoint(cancel)?;
        let verdict = self.guardrail.check(question, &ctx, cancel).await?;

        // Classify
        checkpoint(cancel)?;
        let classification = self.classification.classify(question, &ctx, cancel).await?;

        // Route
        let route = classification.route();
        info!(
            route = route.as_str(),
            urgency = %classification.urgency_level,
            language = %ctx.detected_language,
            "route selected"
        );

        // Respond
        checkpoint(cancel)?;
        let (answer, chunks) = self
            .respond(route, question, &ctx, cancel, &mut emitter)
            .await?;

        // TranslateBack
        let (mut response, translation_failed) = self
            .translate_back(answer, &query, &translated, &ctx, cancel)
            .await?;

        let emergency = verdict.is_emergency || classification.is_emergency();
        if emergency {
            response = format!("{EMERGENCY_PREFIX}{response}");
        }

        let mut result = PipelineResult::assemble(
            response,
            &translated,
            classification,
            &ctx.session_id,
            sources_from_chunks(&chunks),
        );
        result.emergency = emergency;
        result.translation_failed = translation_failed;

        info!(
            route = route.as_str(),
            sources = result.sources.len(),
            emergency,
            translation_failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        Ok(result)
    }

    async fn resolve_caller(&self, raw: &str) -> String {
        match self.identity.resolve(raw).await {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "identity resolution failed, using caller id as given");
                raw.trim().to_string()
            }
        }
    }

    async fn translate(
        &self,
        query: &Query,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<TranslatedQuery, PipelineError> {
        match self
            .translator
            .translate(&query.text, query.language.as_deref(), cancel)
            .await
        {
            Ok(translated) if translated.translated_text.trim().is_empty() => {
                error!(session_id = %ctx.session_id, "translation returned empty text");
                Err(PipelineError::TranslationFailed)
            }
            Ok(translated) => Ok(translated),
            Err(ProviderError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                error!(session_id = %ctx.session_id, error = %err, "translation failed");
                Err(PipelineError::TranslationFailed)
            }
        }
    }

    async fn respond(
        &self,
        route: Route,
        question: &str,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
        emitter: &mut Option<&mut StreamEmitter>,
    ) -> Result<(String, Vec<RetrievedChunk>), PipelineError> {
        let models = &self.settings.models;
        match route {
            Route::Administrative => {
                emit_context(emitter, question, ctx, route, &[]).await;
                let answer = self
                    .generation
                    .answer(
                        "administrative",
                        self.instructions.get(InstructionRole::Administrative),
                        administrative_prompt(question),
                        &self.params(&models.administrative),
                        ctx,
                        cancel,
                    )
                    .await?;
                Ok((answer, Vec::new()))
            }
            Route::SafetyCritical => {
                let brief = prepare_safety_brief(
                    &self.retrieval,
                    question,
                    self.settings.safety_top_k,
                    ctx,
                    cancel,
                )
                .await?;
                emit_context(emitter, question, ctx, route, &brief.chunks).await;
                checkpoint(cancel)?;
                let answer = self
                    .generation
                    .answer(
                        "safety_answer",
                        self.instructions.get(InstructionRole::SafetyAnswer),
                        brief.prompt,
                        &self.params(&models.safety_answer),
                        ctx,
                        cancel,
                    )
                    .await?;
                Ok((answer, brief.chunks))
            }
            Route::Complex => {
                let chunks = self
                    .retrieval
                    .retrieve(question, self.settings.top_k, ctx, cancel)
                    .await?;
                emit_context(emitter, question, ctx, route, &chunks).await;
                checkpoint(cancel)?;
                let answer = self
                    .generation
                    .generate(
                        question,
                        &chunks,
                        self.instructions.get(InstructionRole::Generation),
                        &self.params(&models.generation),
                        ctx,
                        cancel,
                    )
                    .await?;
                Ok((answer, chunks))
            }
            Route::Direct => {
                emit_context(emitter, question, ctx, route, &[]).await;
                let answer = self
                    .generation
                    .answer(
                        "direct",
                        self.instructions.get(InstructionRole::Direct),
                        direct_prompt(question, &ctx.history),
                        &self.params(&models.direct),
                        ctx,
                        cancel,
                    )
                    .await?;
                Ok((answer, Vec::new()))
            }
        }
    }

    /// Returns the response and whether back-translation failed.
    async fn translate_back(
        &self,
        answer: String,
        query: &Query,
        translated: &TranslatedQuery,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<(String, bool), PipelineError> {
        let target = query
            .language
            .as_deref()
            .unwrap_or(&translated.detected_language);
        if is_english(target) || (query.language.is_none() && is_english(&translated.language_code)) {
            return Ok((answer, false));
        }

        checkpoint(cancel)?;
        match self.back_translate(&answer, target, ctx, cancel).await {
            Ok(text) => Ok((text, false)),
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                warn!(session_id = %ctx.session_id, target, error = %err, "keeping untranslated answer");
                Ok((answer, true))
            }
        }
    }

    async fn back_translate(
        &self,
        answer: &str,
        target: &str,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        match self.back_translator.back_translate(answer, target, cancel).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => {
                warn!(session_id = %ctx.session_id, target, "back-translation returned empty text");
                Err(PipelineError::BackTranslationFailed)
            }
            Err(ProviderError::Cancelled) => Err(PipelineError::Cancelled),
            Err(err) => {
                warn!(session_id = %ctx.session_id, target, error = %err, "back-translation call failed");
                Err(PipelineError::BackTranslationFailed)
            }
        }
    }

    fn params(&self, model: &str) -> ModelParams {
        ModelParams::new(model, &self.settings.generation)
    }
}

async fn finish(outcome: Result<PipelineResult, PipelineError>, emitter: &mut StreamEmitter) {
    match outcome {
        Ok(result) => emitter.answer(result).await,
        Err(err) => emitter.error(&err).await,
    }
}

fn deadline_expired(cancel: &CancellationToken, deadline: Duration) -> PipelineError {
    cancel.cancel();
    warn!(deadline_ms = deadline.as_millis() as u64, "run deadline expired");
    PipelineError::TimedOut
}

async fn emit_context(
    emitter: &mut Option<&mut StreamEmitter>,
    question: &str,
    ctx: &PipelineContext,
    route: Route,
    chunks: &[RetrievedChunk],
) {
    if let Some(emitter) = emitter.as_deref_mut() {
        emitter
            .context(ContextPayload {
                question: question.to_string(),
                session_id: ctx.session_id.clone(),
                route,
                sources: sources_from_chunks(chunks),
            })
            .await;
    }
}

fn validate(query: &Query) -> Result<(), PipelineError> {
    if query.text.trim().is_empty() {
        return Err(PipelineError::InvalidQuery("text must not be empty".into()));
    }
    if query.caller_id.trim().is_empty() {
        return Err(PipelineError::InvalidQuery("caller_id must not be empty".into()));
    }
    Ok(())
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

fn is_english(language: &str) -> bool {
    let language = language.trim();
    language.eq_ignore_ascii_case("en")
        || language.eq_ignore_ascii_case("english")
        || language.to_ascii_lowercase().starts_with("en-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;

    use crate::identity::JsonIdentityStore;
    use crate::pipeline::generation::NO_CONTEXT_NOTE;
    use crate::pipeline::test_support::{
        MockBackTranslator, MockClassifier, MockSafety, MockStore, MockTranslator, ScriptedModel,
        chunk, classification, fast_retry, upstream,
    };
    use crate::pipeline::traits::{ClassifierOutput, EmptyHistory, PassthroughResolver};
    use triage_types::{Classification, PatientHistory, SafetyVerdict, UrgencyLevel};

    struct FixedHistory(PatientHistory);

    #[async_trait]
    impl HistoryProvider for FixedHistory {
        async fn fetch(&self, _stable_id: &str) -> PatientHistory {
            self.0.clone()
        }
    }

    struct StalledHistory;

    #[async_trait]
    impl HistoryProvider for StalledHistory {
        async fn fetch(&self, _stable_id: &str) -> PatientHistory {
            std::future::pending().await
        }
    }

    struct PanickingResolver;

    #[async_trait]
    impl IdentityResolver for PanickingResolver {
        async fn resolve(
            &self,
            _external_id: &str,
        ) -> std::result::Result<String, crate::identity::StoreError> {
            panic!("mapping store poisoned");
        }
    }

    struct Harness {
        translator: Arc<MockTranslator>,
        back: Arc<MockBackTranslator>,
        safety: Arc<MockSafety>,
        classifier: Arc<MockClassifier>,
        store: Arc<MockStore>,
        model: Arc<ScriptedModel>,
        identity: Arc<dyn IdentityResolver>,
        history: Arc<dyn HistoryProvider>,
    }

    impl Harness {
        fn new(classification: &Classification) -> Self {
            Self {
                translator: Arc::new(MockTranslator::english("I have had fever for two days")),
                back: Arc::new(MockBackTranslator::tagging()),
                safety: Arc::new(MockSafety::safe()),
                classifier: Arc::new(MockClassifier::structured(classification)),
                store: Arc::new(MockStore::with_chunks(vec![
                    chunk("c1", "Fever over 39C needs review.", 0.91),
                    chunk("c2", "Hydration helps recovery.", 0.72),
                ])),
                model: Arc::new(ScriptedModel::replying("Rest and drink fluids.")),
                identity: Arc::new(PassthroughResolver),
                history: Arc::new(EmptyHistory),
            }
        }

        fn tamil(mut self) -> Self {
            self.translator = Arc::new(MockTranslator::returning(TranslatedQuery::new(
                "Tamil",
                "ta",
                "I have had fever for two days",
                0.93,
            )));
            self
        }

        fn orchestrator(&self) -> Arc<Orchestrator> {
            Arc::new(Orchestrator::new(
                Collaborators {
                    translator: self.translator.clone(),
                    back_translator: self.back.clone(),
                    safety: self.safety.clone(),
                    classifier: self.classifier.clone(),
                    vector_store: self.store.clone(),
                    model: self.model.clone(),
                    identity: self.identity.clone(),
                    history: self.history.clone(),
                },
                Instructions::default(),
                PipelineSettings::default(),
                Arc::new(fast_retry()),
            ))
        }
    }

    fn query() -> Query {
        Query::new("I have had fever for two days", "U1")
    }

    fn direct() -> Classification {
        classification(false, false, false)
    }

    async fn events(mut rx: mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    fn names(events: &[PipelineEvent]) -> Vec<&'static str> {
        events.iter().map(PipelineEvent::name).collect()
    }

    #[tokio::test]
    async fn simple_query_takes_direct_branch() {
        let h = Harness::new(&direct());
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.route, Route::Direct);
        assert_eq!(result.response, "Rest and drink fluids.");
        assert!(Uuid::parse_str(&result.session_id).is_ok());
        assert!(result.sources.is_empty());
        assert!(!result.emergency);
        assert_eq!(h.store.calls(), 0);
        assert_eq!(h.model.calls(), 1);
        assert_eq!(h.back.calls(), 0);
        assert_eq!(h.model.last_request().model, "gpt-4.1-nano");
    }

    #[tokio::test]
    async fn unsafe_input_stops_before_any_downstream_call() {
        let mut h = Harness::new(&classification(true, false, false));
        h.safety = Arc::new(MockSafety::returning(SafetyVerdict {
            is_safe: false,
            is_emergency: false,
            concerns: vec!["self-harm indicators".into()],
            recommended_action: "Contact a crisis line.".into(),
        }));
        let err = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::BlockedInput { .. }));
        assert_eq!(err.details().unwrap()["concerns"][0], "self-harm indicators");
        assert_eq!(h.classifier.calls(), 0);
        assert_eq!(h.store.calls(), 0);
        assert_eq!(h.model.calls(), 0);
        assert_eq!(h.back.calls(), 0);
    }

    #[tokio::test]
    async fn safety_check_failure_fails_closed() {
        let mut h = Harness::new(&direct());
        h.safety = Arc::new(MockSafety::failing());
        let err = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BlockedInput { .. }));
        assert_eq!(h.classifier.calls(), 0);
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn safety_checks_translated_text() {
        let h = Harness::new(&direct()).tamil();
        h.orchestrator()
            .process(Query::new("இரண்டு நாட்களாக காய்ச்சல்", "U1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            h.safety.last_text.lock().unwrap().as_deref(),
            Some("I have had fever for two days")
        );
    }

    #[tokio::test]
    async fn administrative_wins_over_complex() {
        let h = Harness::new(&classification(true, true, false));
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.route, Route::Administrative);
        assert_eq!(h.store.calls(), 0);
        assert_eq!(
            h.model.last_request().instructions,
            Instructions::default().get(InstructionRole::Administrative)
        );
    }

    #[tokio::test]
    async fn safety_critical_wins_over_complex_and_uses_small_top_k() {
        let h = Harness::new(&classification(true, false, true));
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.route, Route::SafetyCritical);
        assert_eq!(*h.store.last_top_k.lock().unwrap(), Some(5));
        assert_eq!(result.sources.len(), 2);
        let prompt = h.model.last_request().prompt;
        assert!(prompt.contains("[Source 1: c1.md (relevance: 0.91)]"));
    }

    #[tokio::test]
    async fn complex_branch_retrieves_then_generates() {
        let h = Harness::new(&classification(true, false, false));
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.route, Route::Complex);
        assert_eq!(*h.store.last_top_k.lock().unwrap(), Some(8));
        let ids: Vec<_> = result.sources.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2"]);
        assert_eq!(result.sources[0].document, "c1.md");

        let request = h.model.last_request();
        assert_eq!(request.model, "gpt-4o");
        assert!(request.prompt.contains("c1 (c1.md):"));
    }

    #[tokio::test]
    async fn empty_retrieval_still_answers() {
        let mut h = Harness::new(&classification(true, false, false));
        h.store = Arc::new(MockStore::with_chunks(Vec::new()));
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.response.is_empty());
        assert!(result.sources.is_empty());
        assert!(h.model.last_request().prompt.contains(NO_CONTEXT_NOTE));
    }

    #[tokio::test]
    async fn emergency_urgency_adds_prefix_on_any_branch() {
        let c = Classification {
            urgency_level: UrgencyLevel::Emergency,
            ..direct()
        };
        let h = Harness::new(&c);
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.route, Route::Direct);
        assert!(result.response.starts_with(EMERGENCY_PREFIX));
        assert!(result.response.ends_with("Rest and drink fluids."));
        assert!(result.emergency);
    }

    #[tokio::test]
    async fn emergency_verdict_prefix_survives_back_translation() {
        let mut h = Harness::new(&direct()).tamil();
        h.safety = Arc::new(MockSafety::returning(SafetyVerdict {
            is_emergency: true,
            ..SafetyVerdict::safe()
        }));
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.response.starts_with(EMERGENCY_PREFIX));
        assert!(result.response.ends_with("[Tamil] Rest and drink fluids."));
    }

    #[tokio::test]
    async fn back_translation_targets_detected_language() {
        let h = Harness::new(&direct()).tamil();
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.response, "[Tamil] Rest and drink fluids.");
        assert_eq!(result.detected_language, "Tamil");
        assert_eq!(result.language_code, "ta");
        assert!(!result.translation_failed);
        assert_eq!(h.back.calls(), 1);
    }

    #[tokio::test]
    async fn declared_language_is_hint_and_target() {
        let h = Harness::new(&direct()).tamil();
        let result = h
            .orchestrator()
            .process(query().with_language("ta-LK"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(h.translator.last_declared.lock().unwrap().as_deref(), Some("ta-LK"));
        assert_eq!(result.response, "[ta-LK] Rest and drink fluids.");
    }

    #[tokio::test]
    async fn back_translation_failure_keeps_answer_verbatim() {
        let mut h = Harness::new(&direct()).tamil();
        h.back = Arc::new(MockBackTranslator::failing());
        let result = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.response, "Rest and drink fluids.");
        assert!(result.translation_failed);
    }

    #[tokio::test]
    async fn translation_failure_aborts_first() {
        let mut h = Harness::new(&direct());
        h.translator = Arc::new(MockTranslator::failing());
        let err = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::TranslationFailed);
        assert_eq!(h.safety.calls(), 0);
        assert_eq!(h.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_classification_aborts() {
        let mut h = Harness::new(&direct());
        h.classifier = Arc::new(MockClassifier::returning(ClassifierOutput::Text(
            "simple question".into(),
        )));
        let err = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::ClassificationMalformed);
        assert_eq!(h.store.calls(), 0);
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn generation_exhaustion_surfaces_sanitized() {
        let mut h = Harness::new(&classification(true, false, false));
        let mut model = ScriptedModel::replying("never");
        for _ in 0..5 {
            model = model.then(Err(upstream(500)));
        }
        h.model = Arc::new(model);
        let err = h
            .orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::GenerationFailed { exhausted: true });
        assert_eq!(err.status_code(), 502);
        assert_eq!(h.model.calls(), 5);
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_calls() {
        let h = Harness::new(&direct());
        let err = h
            .orchestrator()
            .process(Query::new("   ", "U1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuery(_)));
        assert_eq!(h.translator.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_run_makes_no_calls() {
        let h = Harness::new(&direct());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h.orchestrator().process(query(), &cancel).await.unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert_eq!(h.translator.calls(), 0);
    }

    #[tokio::test]
    async fn stalled_history_yields_to_cancellation() {
        let mut h = Harness::new(&direct());
        h.history = Arc::new(StalledHistory);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome =
            tokio::time::timeout(Duration::from_secs(2), h.orchestrator().process(query(), &cancel))
                .await
                .expect("run should stop once cancelled");
        assert_eq!(outcome.unwrap_err(), PipelineError::Cancelled);
        assert_eq!(h.translator.calls(), 0);
    }

    #[tokio::test]
    async fn expired_deadline_is_timed_out() {
        let mut h = Harness::new(&direct());
        h.history = Arc::new(StalledHistory);
        let cancel = CancellationToken::new();
        let err = h
            .orchestrator()
            .process_within(query(), &cancel, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::TimedOut);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn run_within_deadline_answers() {
        let h = Harness::new(&direct());
        let result = h
            .orchestrator()
            .process_within(query(), &CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.route, Route::Direct);
    }

    #[tokio::test]
    async fn concurrent_runs_get_distinct_sessions() {
        let h = Harness::new(&direct());
        let orchestrator = h.orchestrator();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator
                        .process(query(), &CancellationToken::new())
                        .await
                        .unwrap()
                        .session_id
                })
            })
            .collect();
        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 8);
    }

    #[tokio::test]
    async fn safety_branch_uses_resolved_id_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new(&classification(false, false, true));
        h.identity = Arc::new(JsonIdentityStore::open(dir.path().join("mapping.json")).await);
        h.history = Arc::new(FixedHistory(PatientHistory {
            allergies: vec!["penicillin".into()],
            ..Default::default()
        }));
        h.orchestrator()
            .process(query(), &CancellationToken::new())
            .await
            .unwrap();

        let question = h.store.last_question.lock().unwrap().clone().unwrap();
        assert!(question.starts_with("For patient PATIENT_U1"));
        let prompt = h.model.last_request().prompt;
        assert!(prompt.contains("Patient ID: PATIENT_U1"));
        assert!(prompt.contains("Known allergies: penicillin"));
    }

    #[tokio::test]
    async fn stream_emits_context_then_answer() {
        let h = Harness::new(&classification(true, false, false));
        let rx = h.orchestrator().spawn_stream(query(), CancellationToken::new());
        let events = events(rx).await;
        assert_eq!(names(&events), ["context", "answer"]);
        match &events[0] {
            PipelineEvent::Context(payload) => {
                assert_eq!(payload.route, Route::Complex);
                assert_eq!(payload.sources.len(), 2);
                assert_eq!(payload.question, "I have had fever for two days");
            }
            other => panic!("expected context, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_generation_failure_is_context_then_error() {
        let mut h = Harness::new(&classification(true, false, false));
        let mut model = ScriptedModel::replying("never");
        for _ in 0..5 {
            model = model.then(Err(upstream(503)));
        }
        h.model = Arc::new(model);
        let rx = h.orchestrator().spawn_stream(query(), CancellationToken::new());
        let events = events(rx).await;
        assert_eq!(names(&events), ["context", "error"]);
        match &events[1] {
            PipelineEvent::Error(payload) => {
                assert_eq!(payload.error.status, 502);
                assert_eq!(payload.error.message, "Generation failed after retries");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_deadline_ends_with_timeout_error() {
        let mut h = Harness::new(&direct());
        h.history = Arc::new(StalledHistory);
        let rx = h.orchestrator().spawn_stream_within(
            query(),
            CancellationToken::new(),
            Duration::from_millis(50),
        );
        let events = tokio::time::timeout(Duration::from_secs(2), events(rx))
            .await
            .expect("stream should close after the deadline");
        assert_eq!(names(&events), ["error"]);
        match &events[0] {
            PipelineEvent::Error(payload) => {
                assert_eq!(payload.error.status, 504);
                assert_eq!(payload.error.message, "Request timed out");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_run_still_ends_with_error_event() {
        let mut h = Harness::new(&direct());
        h.identity = Arc::new(PanickingResolver);
        let rx = h.orchestrator().spawn_stream(query(), CancellationToken::new());
        let events = events(rx).await;
        assert_eq!(names(&events), ["error"]);
        match &events[0] {
            PipelineEvent::Error(payload) => {
                assert_eq!(payload.error.status, 500);
                assert_eq!(payload.error.message, "Internal error");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_blocked_input_is_single_error() {
        let mut h = Harness::new(&direct());
        h.safety = Arc::new(MockSafety::failing());
        let rx = h.orchestrator().spawn_stream(query(), CancellationToken::new());
        assert_eq!(names(&events(rx).await), ["error"]);
    }
}
