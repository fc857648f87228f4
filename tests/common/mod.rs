//! Test utilities and common setup.

use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use qbridge::api::{self, AppState};
use qbridge::upstream::UpstreamConfig;

pub type MockSocket = WebSocketStream<TcpStream>;

/// Build a test application wired to the given upstream URL, with a short
/// handshake timeout so failure tests stay fast.
pub fn test_app(upstream_url: &str) -> Router {
    let config = UpstreamConfig {
        url: upstream_url.to_string(),
        wait_timeout_secs: 1,
        ..Default::default()
    };
    api::create_router(AppState::new(config))
}

/// Start a scripted mock upstream that serves one connection; returns its
/// websocket URL.
pub async fn spawn_upstream<F, Fut>(script: F) -> String
where
    F: FnOnce(MockSocket) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(socket).await;
        }
    });

    format!("ws://{addr}/queue/join")
}

/// Send one JSON control frame to the bridge.
pub async fn send_event(socket: &mut MockSocket, value: Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Receive the next JSON text frame from the bridge, skipping keepalive
/// traffic.
pub async fn recv_json(socket: &mut MockSocket) -> Value {
    while let Some(frame) = socket.next().await {
        match frame.unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame from bridge: {other:?}"),
        }
    }
    panic!("bridge closed the socket while a frame was expected");
}

/// Pull the delta contents out of a raw SSE body.
pub fn parse_deltas(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|json| {
            let value: Value = serde_json::from_str(json).unwrap();
            value["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}
