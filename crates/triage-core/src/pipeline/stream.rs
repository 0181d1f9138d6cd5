//! Ordered event emission for streamed runs.
//!
//! A stream carries at most one `context` event followed by exactly one
//! terminal event (`answer` or `error`). [`StreamEmitter`] enforces that
//! order; events offered out of order are dropped and logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use triage_types::event::{ContextPayload, ErrorPayload};
use triage_types::{PipelineError, PipelineEvent, PipelineResult};

/// Events buffered between the run and the transport.
pub const STREAM_BUFFER: usize = 8;

/// Sending half of a pipeline event stream.
#[derive(Debug)]
pub struct StreamEmitter {
    tx: mpsc::Sender<PipelineEvent>,
    context_sent: bool,
    terminated: Arc<AtomicBool>,
}

/// Second sending half that can close a stream whose emitter went away
/// before its terminal event.
#[derive(Debug)]
pub struct StreamSentinel {
    tx: mpsc::Sender<PipelineEvent>,
    terminated: Arc<AtomicBool>,
}

impl StreamSentinel {
    /// Emit `err` as the terminal event unless one was already sent.
    pub async fn close(self, err: &PipelineError) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(error = %err, "stream closed without a terminal event");
        send(&self.tx, error_event(err)).await;
    }
}

impl StreamEmitter {
    /// Create an emitter and the receiver a transport reads from.
    pub fn channel() -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (
            Self {
                tx,
                context_sent: false,
                terminated: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Handle sharing this emitter's terminal state.
    pub fn sentinel(&self) -> StreamSentinel {
        StreamSentinel {
            tx: self.tx.clone(),
            terminated: Arc::clone(&self.terminated),
        }
    }

    /// Emit the `context` event. Ignored after a terminal event or when a
    /// context event was already sent.
    pub async fn context(&mut self, payload: ContextPayload) {
        if self.is_terminated() || self.context_sent {
            warn!(session_id = %payload.session_id, "context event out of order, dropped");
            return;
        }
        self.context_sent = true;
        self.send(PipelineEvent::Context(payload)).await;
    }

    /// Emit the terminal `answer` event.
    pub async fn answer(&mut self, result: PipelineResult) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            warn!(session_id = %result.session_id, "stream already terminated, answer dropped");
            return;
        }
        self.send(PipelineEvent::Answer(Box::new(result))).await;
    }

    /// Emit the terminal `error` event with the caller-safe envelope.
    pub async fn error(&mut self, err: &PipelineError) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            warn!(error = %err, "stream already terminated, error dropped");
            return;
        }
        self.send(error_event(err)).await;
    }

    async fn send(&self, event: PipelineEvent) {
        send(&self.tx, event).await;
    }
}

fn error_event(err: &PipelineError) -> PipelineEvent {
    PipelineEvent::Error(ErrorPayload {
        error: err.envelope(),
    })
}

async fn send(tx: &mpsc::Sender<PipelineEvent>, event: PipelineEvent) {
    let name = event.name();
    if tx.send(event).await.is_err() {
        debug!(event = name, "stream receiver gone");
    }
}
