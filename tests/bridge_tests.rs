//! End-to-end bridge tests against a scripted mock upstream.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

mod common;
use common::{parse_deltas, recv_json, send_event, spawn_upstream, test_app};

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .uri("/v1/chat/completions")
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn collect_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app("ws://127.0.0.1:1/queue/join");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = collect_body(response).await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_rejects_request_without_user_message() {
    let app = test_app("ws://127.0.0.1:1/queue/join");

    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "system", "content": "only a system prompt"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = collect_body(response).await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_rejects_malformed_body() {
    let app = test_app("ws://127.0.0.1:1/queue/join");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/chat/completions")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not valid json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_upstream_returns_500() {
    // Bind and immediately drop a listener to get a port nothing serves.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let app = test_app(&format!("ws://{addr}/queue/join"));
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_streams_reconciled_deltas() {
    let (frames_tx, mut frames_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();

    let url = spawn_upstream(move |mut socket| async move {
        send_event(&mut socket, json!({"msg": "send_hash"})).await;
        frames_tx.send(recv_json(&mut socket).await).unwrap();

        send_event(&mut socket, json!({"msg": "estimation"})).await;
        send_event(&mut socket, json!({"msg": "send_data"})).await;
        frames_tx.send(recv_json(&mut socket).await).unwrap();

        send_event(&mut socket, json!({"msg": "process_starts", "success": true})).await;
        send_event(
            &mut socket,
            json!({
                "msg": "process_generating",
                "success": true,
                "output": {
                    "data": [null, [["bye", "<p>The answer</p>"]]],
                    "is_generating": true
                }
            }),
        )
        .await;
        send_event(
            &mut socket,
            json!({
                "msg": "process_generating",
                "success": true,
                "output": {
                    "data": [null, [["bye", "<p>The answer is 42.</p>"]]],
                    "is_generating": true
                }
            }),
        )
        .await;
        send_event(
            &mut socket,
            json!({
                "msg": "process_completed",
                "success": true,
                "output": {
                    "data": [null, [["bye", "<p>The answer is 42.</p>"]]],
                    "is_generating": false
                }
            }),
        )
        .await;
    })
    .await;

    let app = test_app(&url);
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [
                {"role": "system", "content": "be helpful"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "bye"}
            ]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let body = collect_body(response).await;
    let deltas = parse_deltas(&body);
    assert_eq!(deltas, vec!["The answer", " is 42."]);
    assert_eq!(deltas.concat(), "The answer is 42.");

    // The handshake reply carries the configured function index and a
    // session hash.
    let join = frames_rx.recv().await.unwrap();
    assert_eq!(join["fn_index"], 18);
    assert!(join["session_hash"].is_string());

    // The inference payload replays the active query and paired history.
    let predict = frames_rx.recv().await.unwrap();
    assert_eq!(predict["session_hash"], join["session_hash"]);
    let data = predict["data"].as_array().unwrap();
    assert_eq!(data[2], "gpt-4o");
    assert_eq!(data[3], "bye");
    assert_eq!(data[7], json!([["hi", "hello"]]));
}

#[tokio::test]
async fn test_handshake_timeout_emits_single_error_chunk() {
    // The mock accepts the connection but never speaks, holding the socket
    // open past the bridge's handshake timeout.
    let url = spawn_upstream(|socket| async move {
        let _keep_open = socket;
        tokio::time::sleep(Duration::from_secs(3)).await;
    })
    .await;

    let app = test_app(&url);
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    // The connection itself succeeded, so the failure arrives in-stream.
    assert_eq!(response.status(), StatusCode::OK);

    let body = collect_body(response).await;
    let deltas = parse_deltas(&body);
    assert_eq!(deltas.len(), 1);
    assert!(deltas[0].starts_with("Error:"));
    assert!(deltas[0].contains("timed out"));
}

#[tokio::test]
async fn test_backend_failure_reported_in_stream() {
    let url = spawn_upstream(|mut socket| async move {
        send_event(&mut socket, json!({"msg": "send_hash"})).await;
        recv_json(&mut socket).await;
        send_event(&mut socket, json!({"msg": "estimation"})).await;
        send_event(&mut socket, json!({"msg": "send_data"})).await;
        recv_json(&mut socket).await;
        send_event(
            &mut socket,
            json!({
                "msg": "process_generating",
                "success": false,
                "output": {"data": ["quota exceeded"], "is_generating": false}
            }),
        )
        .await;
    })
    .await;

    let app = test_app(&url);
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = collect_body(response).await;
    let deltas = parse_deltas(&body);
    assert_eq!(deltas.len(), 1);
    assert!(deltas[0].contains("upstream reported failure"));
    assert!(deltas[0].contains("quota exceeded"));
}

#[tokio::test]
async fn test_unknown_streaming_events_are_ignored() {
    let url = spawn_upstream(|mut socket| async move {
        send_event(&mut socket, json!({"msg": "send_hash"})).await;
        recv_json(&mut socket).await;
        send_event(&mut socket, json!({"msg": "estimation"})).await;
        send_event(&mut socket, json!({"msg": "send_data"})).await;
        recv_json(&mut socket).await;

        // An event kind the bridge does not recognize mid-stream is skipped.
        send_event(&mut socket, json!({"msg": "queue_full", "success": true})).await;
        send_event(
            &mut socket,
            json!({
                "msg": "process_completed",
                "success": true,
                "output": {"data": [null, [["hi", "<p>done</p>"]]], "is_generating": false}
            }),
        )
        .await;
    })
    .await;

    let app = test_app(&url);
    let response = app
        .oneshot(chat_request(json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let body = collect_body(response).await;
    assert_eq!(parse_deltas(&body), vec!["done"]);
}
