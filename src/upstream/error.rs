//! Upstream session error types.

use thiserror::Error;

use super::protocol::EventKind;

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors that can occur while talking to the upstream service.
///
/// All variants are terminal for the request's exchange; unknown event kinds
/// received mid-stream are logged and skipped instead of raising one of
/// these.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The websocket dial failed. Surfaced before any stream bytes are
    /// written.
    #[error("failed to connect to upstream at {url}: {message}")]
    Connect { url: String, message: String },

    /// A handshake wait received the wrong event kind.
    #[error("handshake failed: expected {expected}, got {got}")]
    UnexpectedEvent { expected: EventKind, got: EventKind },

    /// A handshake wait timed out.
    #[error("handshake failed: timed out waiting for {expected}")]
    Timeout { expected: EventKind },

    /// The upstream reported `success: false` on a process event.
    #[error("upstream reported failure: {detail}")]
    BackendFailure { detail: String },

    /// An inbound frame could not be decoded.
    #[error("failed to decode upstream frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The socket closed while an exchange was still in progress.
    #[error("upstream connection closed unexpectedly")]
    ConnectionClosed,
}
