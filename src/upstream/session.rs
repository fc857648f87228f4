//! Per-request upstream session and its handshake state machine.
//!
//! The queue requires a fixed exchange before it accepts an inference
//! request: wait for `send_hash`, reply with the session hash, wait for
//! `estimation` and `send_data`, then send the full payload. After that the
//! service streams `process_generating` snapshots until `process_completed`.

use log::{debug, warn};
use nanoid::nanoid;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::conversation::ConversationTurn;

use super::UpstreamConfig;
use super::client::QueueClient;
use super::error::{UpstreamError, UpstreamResult};
use super::protocol::{EventKind, JoinFrame, PredictFrame, QueueEvent};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    AwaitingHash,
    HashSent,
    AwaitingEstimation,
    AwaitingSendData,
    Ready,
    Streaming,
    Completed,
    Failed,
}

/// What the exchange driver forwards downstream.
#[derive(Debug)]
pub enum SessionUpdate {
    /// A cumulative snapshot of the assistant's reply so far. `last` marks
    /// the `process_completed` tick.
    Snapshot { text: String, last: bool },
    /// The exchange ended with a terminal error.
    Failed(UpstreamError),
}

/// The inference request replayed into the upstream session.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: String,
    pub query: String,
    pub history: Vec<ConversationTurn>,
}

/// One upstream session, owned by one caller request.
pub struct UpstreamSession {
    client: QueueClient,
    config: UpstreamConfig,
    session_hash: String,
    state: SessionState,
}

impl UpstreamSession {
    /// Dial the upstream. A dial failure is surfaced here, before the state
    /// machine starts.
    pub async fn connect(config: &UpstreamConfig) -> UpstreamResult<Self> {
        let client = QueueClient::connect(&config.url).await?;
        Ok(Self {
            client,
            config: config.clone(),
            session_hash: nanoid!(),
            state: SessionState::Connected,
        })
    }

    /// Run the exchange on its own task and return the update stream.
    ///
    /// Dropping the receiver cancels the exchange: the driver's next send
    /// fails, the session drops, and the pump tasks tear the socket down.
    pub fn stream(self, request: InferenceRequest) -> mpsc::Receiver<SessionUpdate> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(self.run(request, tx));
        rx
    }

    async fn run(mut self, request: InferenceRequest, tx: mpsc::Sender<SessionUpdate>) {
        if let Err(err) = self.handshake(&request).await {
            self.state = SessionState::Failed;
            warn!("upstream handshake failed: {err}");
            let _ = tx.send(SessionUpdate::Failed(err)).await;
            return;
        }

        self.enter(SessionState::Streaming);
        loop {
            let event = match self.client.recv().await {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    self.state = SessionState::Failed;
                    let _ = tx.send(SessionUpdate::Failed(err)).await;
                    return;
                }
                None => {
                    self.state = SessionState::Failed;
                    let _ = tx
                        .send(SessionUpdate::Failed(UpstreamError::ConnectionClosed))
                        .await;
                    return;
                }
            };

            match event.kind() {
                EventKind::ProcessStarts => {}
                kind @ (EventKind::ProcessGenerating | EventKind::ProcessCompleted) => {
                    if !event.success {
                        self.state = SessionState::Failed;
                        let _ = tx
                            .send(SessionUpdate::Failed(backend_failure(&event)))
                            .await;
                        return;
                    }

                    let last = kind == EventKind::ProcessCompleted;
                    let text = event.snapshot().unwrap_or_default();
                    if !text.is_empty() || last {
                        if tx.send(SessionUpdate::Snapshot { text, last }).await.is_err() {
                            // Caller went away.
                            return;
                        }
                    }
                    if last {
                        self.enter(SessionState::Completed);
                        return;
                    }
                }
                other => {
                    warn!("ignoring unexpected {other} event while streaming");
                }
            }
        }
    }

    async fn handshake(&mut self, request: &InferenceRequest) -> UpstreamResult<()> {
        self.enter(SessionState::AwaitingHash);
        self.expect(EventKind::SendHash).await?;

        self.client
            .send_json(&JoinFrame {
                fn_index: self.config.fn_index,
                session_hash: self.session_hash.clone(),
            })
            .await?;
        self.enter(SessionState::HashSent);

        self.enter(SessionState::AwaitingEstimation);
        self.expect(EventKind::Estimation).await?;

        self.enter(SessionState::AwaitingSendData);
        self.expect(EventKind::SendData).await?;

        let frame = PredictFrame::new(
            self.config.fn_index,
            &self.session_hash,
            self.config.max_tokens,
            &self.config.system_prompt,
            &request.model,
            &request.query,
            &request.history,
        );
        self.client.send_json(&frame).await?;
        self.enter(SessionState::Ready);

        Ok(())
    }

    /// Wait for the next event and require it to be `expected`.
    async fn expect(&mut self, expected: EventKind) -> UpstreamResult<QueueEvent> {
        let wait = std::time::Duration::from_secs(self.config.wait_timeout_secs);
        match timeout(wait, self.client.recv()).await {
            Err(_) => Err(UpstreamError::Timeout { expected }),
            Ok(None) => Err(UpstreamError::ConnectionClosed),
            Ok(Some(Err(err))) => Err(err),
            Ok(Some(Ok(event))) => {
                if event.kind() == expected {
                    Ok(event)
                } else {
                    Err(UpstreamError::UnexpectedEvent {
                        expected,
                        got: event.kind(),
                    })
                }
            }
        }
    }

    fn enter(&mut self, state: SessionState) {
        debug!(
            "session {}: {:?} -> {:?}",
            self.session_hash, self.state, state
        );
        self.state = state;
    }
}

fn backend_failure(event: &QueueEvent) -> UpstreamError {
    let detail = serde_json::to_string(&event.output.data).unwrap_or_default();
    UpstreamError::BackendFailure { detail }
}
