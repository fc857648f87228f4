//! qbridge library.
//!
//! Bridges OpenAI-style streaming chat completions onto a queue-based duplex
//! websocket inference service: one upstream session per request, a fixed
//! handshake, then cumulative HTML snapshots reconciled into clean markdown
//! deltas.

pub mod api;
pub mod conversation;
pub mod reconcile;
pub mod upstream;
