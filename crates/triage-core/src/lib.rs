//! # triage-core
//!
//! Pipeline engine for multilingual medical query triage.
//!
//! Contains the pipeline stages and orchestrator, the streaming event
//! emitter, the in-memory vector index, the caller identifier mapping,
//! role instructions, and application bootstrap.

pub mod bootstrap;
pub mod identity;
pub mod instructions;
pub mod json_repair;
pub mod pipeline;
pub mod vector_index;

pub use bootstrap::{AppContext, BootstrapError};
pub use pipeline::orchestrator::{Collaborators, EMERGENCY_PREFIX, Orchestrator, PipelineSettings};
pub use pipeline::stream::StreamEmitter;
