//! Upstream queue-protocol client.
//!
//! One [`UpstreamSession`] is opened per caller request: it dials the
//! service's websocket, runs the fixed handshake, sends the inference
//! request, and forwards the resulting snapshot stream. Sessions are never
//! pooled or reused.

pub mod client;
pub mod error;
pub mod protocol;
pub mod session;

pub use error::{UpstreamError, UpstreamResult};
pub use session::{InferenceRequest, SessionUpdate, UpstreamSession};

use serde::{Deserialize, Serialize};

/// Connection and protocol settings for the upstream service.
///
/// `fn_index` and the generation parameters are deployment properties of the
/// upstream, injected through configuration rather than compiled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Websocket endpoint of the queue (e.g. `wss://host/queue/join`).
    pub url: String,
    /// Identifier of the server-side function the exchange invokes.
    pub fn_index: u32,
    /// Token budget passed in the inference payload.
    pub max_tokens: u32,
    /// System prompt passed in the inference payload.
    pub system_prompt: String,
    /// Seconds to wait for each expected handshake event.
    pub wait_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://localhost/queue/join".to_string(),
            fn_index: 18,
            max_tokens: 4096,
            system_prompt: "Serve me as a writing and programming assistant.".to_string(),
            wait_timeout_secs: 30,
        }
    }
}
