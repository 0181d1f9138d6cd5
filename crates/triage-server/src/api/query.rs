//! `POST /query`: run one query, as JSON or as an NDJSON event stream.

use axum::{
    Json,
    body::Body,
    extract::{Query as QueryString, State, rejection::JsonRejection, rejection::QueryRejection},
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::stream;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use triage_types::{PipelineError, Query};

use super::ApiState;
use crate::error::ApiError;

/// Bounds on the trimmed query text, in characters.
pub const MIN_TEXT_CHARS: usize = 3;
pub const MAX_TEXT_CHARS: usize = 2000;

const NDJSON: &str = "application/x-ndjson";

/// Request body.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(alias = "callerId")]
    pub caller_id: String,
    /// Declared source language, if the client knows it.
    #[serde(default)]
    pub language: Option<String>,
}

impl QueryRequest {
    /// Trim and validate into a pipeline [`Query`].
    pub fn into_query(self) -> Result<Query, PipelineError> {
        let text = self.text.trim();
        let chars = text.chars().count();
        if chars < MIN_TEXT_CHARS {
            return Err(PipelineError::InvalidQuery(format!(
                "text must be at least {MIN_TEXT_CHARS} characters"
            )));
        }
        if chars > MAX_TEXT_CHARS {
            return Err(PipelineError::InvalidQuery(format!(
                "text must be at most {MAX_TEXT_CHARS} characters"
            )));
        }
        let caller_id = self.caller_id.trim();
        if caller_id.is_empty() {
            return Err(PipelineError::InvalidQuery("caller_id must not be empty".into()));
        }

        let query = Query::new(text, caller_id);
        Ok(match self.language.as_deref().map(str::trim) {
            Some(language) if !language.is_empty() => query.with_language(language),
            _ => query,
        })
    }
}

/// Query-string options.
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub stream: bool,
}

pub async fn submit(
    State(state): State<ApiState>,
    params: Result<QueryString<QueryParams>, QueryRejection>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let QueryString(params) = params.map_err(|e| ApiError::Rejected(e.body_text()))?;
    let Json(request) = body.map_err(|e| ApiError::Rejected(e.body_text()))?;
    let query = request.into_query()?;

    if params.stream {
        Ok(stream_response(&state, query))
    } else {
        run_to_completion(&state, query).await
    }
}

async fn run_to_completion(state: &ApiState, query: Query) -> Result<Response, ApiError> {
    let cancel = CancellationToken::new();
    let result = state
        .orchestrator
        .process_within(query, &cancel, state.request_timeout)
        .await?;
    info!(session_id = %result.session_id, route = result.route.as_str(), "query answered");
    Ok(Json(result).into_response())
}

/// Stream events as NDJSON lines. The run is bounded by the request
/// timeout and cancelled when the body is dropped, which includes a
/// client disconnect.
fn stream_response(state: &ApiState, query: Query) -> Response {
    let cancel = CancellationToken::new();
    let rx = state
        .orchestrator
        .spawn_stream_within(query, cancel.clone(), state.request_timeout);
    let guard = cancel.drop_guard();

    let lines = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((event.to_ndjson(), (rx, guard)))
    });

    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response()
}
