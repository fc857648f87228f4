//! Websocket connection with inbound/outbound pump tasks.
//!
//! The read pump turns frames into parsed [`QueueEvent`]s on a bounded
//! channel and enforces a read-liveness deadline that refreshes on every
//! inbound frame. The write pump owns the sink and serializes all outgoing
//! frames (handshake replies, the inference request, keepalive pings)
//! through a single bounded queue, so frames are never interleaved.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::error::{UpstreamError, UpstreamResult};
use super::protocol::QueueEvent;

/// If no frame arrives for this long the connection is considered dead.
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Keepalive ping cadence, two-thirds of the read deadline.
const PING_PERIOD: Duration = Duration::from_secs(40);

/// Capacity of the per-direction frame queues.
const QUEUE_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One live websocket connection to the upstream queue.
///
/// Dropping the client aborts both pumps, which closes the socket. This is
/// the teardown path for every exit: completion, handshake failure,
/// mid-stream error, and caller cancellation.
pub struct QueueClient {
    outbound: mpsc::Sender<Message>,
    inbound: mpsc::Receiver<UpstreamResult<QueueEvent>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl QueueClient {
    /// Dial the upstream websocket and start the pump tasks.
    pub async fn connect(url: &str) -> UpstreamResult<Self> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| UpstreamError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        debug!("connected to upstream at {url}");

        let (sink, source) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);

        let reader = tokio::spawn(read_pump(source, inbound_tx, outbound_tx.clone()));
        let writer = tokio::spawn(write_pump(sink, outbound_rx));

        Ok(Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            reader,
            writer,
        })
    }

    /// Queue a JSON frame for sending.
    pub async fn send_json<T: Serialize>(&self, frame: &T) -> UpstreamResult<()> {
        let text = serde_json::to_string(frame)?;
        self.outbound
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| UpstreamError::ConnectionClosed)
    }

    /// Receive the next parsed event. `None` means the connection ended.
    pub async fn recv(&mut self) -> Option<UpstreamResult<QueueEvent>> {
        self.inbound.recv().await
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Read frames off the socket and push parsed events inbound.
///
/// Each read is bounded by [`READ_DEADLINE`]; receiving any frame (including
/// keepalive traffic) restarts it. Server pings are answered through the
/// outbound queue so the write pump stays the only writer.
async fn read_pump(
    mut source: WsSource,
    events: mpsc::Sender<UpstreamResult<QueueEvent>>,
    outbound: mpsc::Sender<Message>,
) {
    loop {
        let frame = match tokio::time::timeout(READ_DEADLINE, source.next()).await {
            Err(_) => {
                warn!("upstream read deadline elapsed, dropping connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("upstream read error: {e}");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<QueueEvent>(&text) {
                Ok(event) => {
                    if events.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = events.send(Err(e.into())).await;
                    break;
                }
            },
            Message::Ping(payload) => {
                if outbound.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Message::Pong(_) => {}
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Serialize all writes to the socket and emit periodic keepalive pings.
async fn write_pump(mut sink: WsSink, mut outbound: mpsc::Receiver<Message>) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    // Skip the interval's immediate first tick.
    ping.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}
