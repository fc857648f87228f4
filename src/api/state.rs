//! Application state shared across handlers.

use std::sync::Arc;

use crate::upstream::UpstreamConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Upstream connection and protocol settings. Sessions themselves are
    /// per-request; no state is shared between concurrent requests.
    pub upstream: Arc<UpstreamConfig>,
}

impl AppState {
    pub fn new(upstream: UpstreamConfig) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }
}
