//! Counting mocks shared by the pipeline unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use triage_llm::{CompletionRequest, LanguageModel, ProviderError, RetryConfig, RetryPolicy};
use triage_types::{
    Classification, PatientHistory, PipelineContext, RetrievedChunk, SafetyVerdict,
    TranslatedQuery, UrgencyLevel,
};

use super::traits::{
    BackTranslator, Classifier, ClassifierOutput, SafetyChecker, Translator, VectorStore,
};

/// Retry policy with millisecond backoff so tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    })
}

pub fn ctx() -> PipelineContext {
    PipelineContext::new("PATIENT_U1", None, "session-test", PatientHistory::default())
}

pub fn upstream(status: u16) -> ProviderError {
    ProviderError::Upstream {
        status,
        message: format!("mock upstream {status}"),
    }
}

pub fn chunk(id: &str, content: &str, score: f32) -> RetrievedChunk {
    RetrievedChunk::new(id, content, score).with_meta("source_path", format!("{id}.md"))
}

pub fn classification(complex: bool, admin: bool, safety: bool) -> Classification {
    Classification {
        is_complex: complex,
        is_administrative: admin,
        is_safety_critical: safety,
        ..Classification::simple(UrgencyLevel::Low)
    }
}

// ── Language model ──────────────────────────────────────────────────────

/// Pops scripted outcomes in order, then falls back to `default_reply`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<triage_llm::Result<String>>>,
    default_reply: String,
    pub calls: AtomicU32,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn replying(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: text.into(),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, outcome: triage_llm::Result<String>) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> triage_llm::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}

// ── Vector store ────────────────────────────────────────────────────────

pub struct MockStore {
    chunks: Vec<RetrievedChunk>,
    fail_status: Option<u16>,
    /// Number of leading calls that fail before the store recovers.
    failures: u32,
    pub calls: AtomicU32,
    pub last_top_k: Mutex<Option<usize>>,
    pub last_question: Mutex<Option<String>>,
}

impl MockStore {
    pub fn with_chunks(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            fail_status: None,
            failures: 0,
            calls: AtomicU32::new(0),
            last_top_k: Mutex::new(None),
            last_question: Mutex::new(None),
        }
    }

    /// Fail with `status` on every call.
    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            failures: u32::MAX,
            ..Self::with_chunks(Vec::new())
        }
    }

    /// Fail with `status` `n` times, then return `chunks`.
    pub fn flaky(status: u16, n: u32, chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            fail_status: Some(status),
            failures: n,
            ..Self::with_chunks(chunks)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for MockStore {
    async fn similarity_search(
        &self,
        question: &str,
        top_k: usize,
    ) -> triage_llm::Result<Vec<RetrievedChunk>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_top_k.lock().unwrap() = Some(top_k);
        *self.last_question.lock().unwrap() = Some(question.to_string());
        if let Some(status) = self.fail_status
            && n < self.failures
        {
            return Err(upstream(status));
        }
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

// ── Capabilities ────────────────────────────────────────────────────────

pub struct MockTranslator {
    result: Option<TranslatedQuery>,
    pub calls: AtomicU32,
    pub last_declared: Mutex<Option<String>>,
}

impl MockTranslator {
    pub fn returning(result: TranslatedQuery) -> Self {
        Self {
            result: Some(result),
            calls: AtomicU32::new(0),
            last_declared: Mutex::new(None),
        }
    }

    pub fn english(text: &str) -> Self {
        Self::returning(TranslatedQuery::new("English", "en", text, 0.99))
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            calls: AtomicU32::new(0),
            last_declared: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        _text: &str,
        declared_language: Option<&str>,
        _cancel: &CancellationToken,
    ) -> triage_llm::Result<TranslatedQuery> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_declared.lock().unwrap() = declared_language.map(str::to_string);
        self.result
            .clone()
            .ok_or_else(|| ProviderError::RequestFailed("translator unavailable".into()))
    }
}

pub struct MockBackTranslator {
    fail: bool,
    pub calls: AtomicU32,
}

impl MockBackTranslator {
    /// Prefixes the answer with `[<language>] `.
    pub fn tagging() -> Self {
        Self {
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackTranslator for MockBackTranslator {
    async fn back_translate(
        &self,
        answer: &str,
        language: &str,
        _cancel: &CancellationToken,
    ) -> triage_llm::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::RetriesExhausted {
                attempts: 5,
                last: Box::new(upstream(503)),
            });
        }
        Ok(format!("[{language}] {answer}"))
    }
}

pub struct MockSafety {
    verdict: Option<SafetyVerdict>,
    pub calls: AtomicU32,
    pub last_text: Mutex<Option<String>>,
}

impl MockSafety {
    pub fn returning(verdict: SafetyVerdict) -> Self {
        Self {
            verdict: Some(verdict),
            calls: AtomicU32::new(0),
            last_text: Mutex::new(None),
        }
    }

    pub fn safe() -> Self {
        Self::returning(SafetyVerdict::safe())
    }

    pub fn failing() -> Self {
        Self {
            verdict: None,
            calls: AtomicU32::new(0),
            last_text: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SafetyChecker for MockSafety {
    async fn check(
        &self,
        text: &str,
        _cancel: &CancellationToken,
    ) -> triage_llm::Result<SafetyVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_text.lock().unwrap() = Some(text.to_string());
        self.verdict.clone().ok_or(ProviderError::Timeout)
    }
}

pub struct MockClassifier {
    output: Option<ClassifierOutput>,
    pub calls: AtomicU32,
}

impl MockClassifier {
    pub fn returning(output: ClassifierOutput) -> Self {
        Self {
            output: Some(output),
            calls: AtomicU32::new(0),
        }
    }

    pub fn structured(classification: &Classification) -> Self {
        Self::returning(ClassifierOutput::Structured(
            serde_json::to_value(classification).unwrap(),
        ))
    }

    pub fn failing() -> Self {
        Self {
            output: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        _text: &str,
        _cancel: &CancellationToken,
    ) -> triage_llm::Result<ClassifierOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output
            .clone()
            .ok_or_else(|| ProviderError::RequestFailed("classifier down".into()))
    }
}
