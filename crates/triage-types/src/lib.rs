//! # triage-types
//!
//! Core type definitions for the triage query pipeline.
//!
//! This crate is the foundation of the dependency graph -- all other
//! triage crates depend on it. It contains:
//!
//! - **[`query`]** -- incoming [`Query`] and its [`TranslatedQuery`]
//! - **[`classification`]** -- the routing decision and its precedence rules
//! - **[`retrieval`]** -- retrieved chunks and display-safe source attributions
//! - **[`pipeline`]** -- per-run context, safety verdicts, and the final result
//! - **[`event`]** -- streaming events emitted while a run progresses
//! - **[`error`]** -- [`PipelineError`] and the uniform error envelope
//! - **[`config`]** -- configuration schema

pub mod classification;
pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod query;
pub mod retrieval;

pub use classification::{Classification, Route, UrgencyLevel};
pub use config::{Config, ConfigError};
pub use error::{ErrorClass, ErrorEnvelope, PipelineError, Result};
pub use event::PipelineEvent;
pub use pipeline::{PatientHistory, PipelineContext, PipelineResult, SafetyVerdict};
pub use query::{Query, TranslatedQuery};
pub use retrieval::{RetrievedChunk, SourceAttribution};
