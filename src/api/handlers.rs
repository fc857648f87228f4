//! API request handlers.

use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::Response;
use log::{debug, error};
use serde::Serialize;

use crate::conversation;
use crate::upstream::{InferenceRequest, UpstreamSession};

use super::error::{ApiError, ApiResult};
use super::models::ChatCompletionRequest;
use super::state::AppState;
use super::stream;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /v1/chat/completions
///
/// Validates and pairs the conversation, opens one upstream session, and
/// streams reconciled deltas back as SSE. The socket is only dialed after
/// the request validates; a dial failure is a plain 500 before any stream
/// bytes are written.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> ApiResult<Response<Body>> {
    let (query, history) = conversation::split_messages(&request.messages)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    debug!(
        "chat completion: model={} history_turns={}",
        request.model,
        history.len()
    );

    let session = UpstreamSession::connect(&state.upstream).await.map_err(|e| {
        error!("upstream connection failed: {e}");
        ApiError::internal(format!("upstream connection failed: {e}"))
    })?;

    let updates = session.stream(InferenceRequest {
        model: request.model,
        query,
        history,
    });

    stream::sse_response(updates)
}
