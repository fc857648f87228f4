//! Streaming chunk emitter.
//!
//! Turns the session's snapshot feed into the caller-facing SSE body. Each
//! reconciled delta goes out as one `data: <json>\n\n` event the moment it
//! exists; empty deltas produce nothing. Terminal errors become a single
//! delta-shaped chunk carrying the error text, then the stream closes —
//! there is no separate error envelope.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::http::{Response, StatusCode};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::reconcile::DeltaReconciler;
use crate::upstream::SessionUpdate;

use super::error::{ApiError, ApiResult};
use super::models::ChatCompletionChunk;

/// Capacity of the chunk queue between the reconciling task and the body.
const CHUNK_QUEUE: usize = 32;

/// Build the streaming response for one exchange.
///
/// Spawns the task that consumes session updates, reconciles snapshots into
/// deltas, and feeds the response body. Dropping the body (caller
/// disconnect) unwinds the whole chain: this task's send fails, the update
/// receiver drops, and the upstream session tears down its socket.
pub fn sse_response(mut updates: mpsc::Receiver<SessionUpdate>) -> ApiResult<Response<Body>> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(CHUNK_QUEUE);

    tokio::spawn(async move {
        let mut reconciler = DeltaReconciler::new();
        while let Some(update) = updates.recv().await {
            match update {
                SessionUpdate::Snapshot { text, last } => {
                    let delta = reconciler.push(&text);
                    if !delta.is_empty() {
                        if tx.send(Ok(encode_chunk(&delta))).await.is_err() {
                            debug!("caller disconnected, stopping emission");
                            break;
                        }
                    }
                    if last {
                        break;
                    }
                }
                SessionUpdate::Failed(err) => {
                    warn!("exchange failed mid-stream: {err}");
                    let _ = tx.send(Ok(encode_chunk(&format!("Error: {err}")))).await;
                    break;
                }
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .map_err(|e| ApiError::internal(format!("building stream response: {e}")))
}

fn encode_chunk(delta: &str) -> Bytes {
    let chunk = ChatCompletionChunk::content(delta);
    let json = serde_json::to_string(&chunk).expect("chunk serialization cannot fail");
    Bytes::from(format!("data: {json}\n\n"))
}
