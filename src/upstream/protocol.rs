//! Queue protocol wire types.
//!
//! The upstream service speaks JSON control frames over a persistent
//! websocket. Inbound frames are loosely typed (`output.data` is a
//! heterogeneous nested list); this module is the boundary where they become
//! explicit tagged structures. Anything unrecognized parses to
//! [`EventKind::Unknown`] instead of failing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::ConversationTurn;

/// Inbound event kinds, in handshake order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SendHash,
    Estimation,
    SendData,
    ProcessStarts,
    ProcessGenerating,
    ProcessCompleted,
    Unknown,
}

impl EventKind {
    fn from_msg(msg: &str) -> Self {
        match msg {
            "send_hash" => Self::SendHash,
            "estimation" => Self::Estimation,
            "send_data" => Self::SendData,
            "process_starts" => Self::ProcessStarts,
            "process_generating" => Self::ProcessGenerating,
            "process_completed" => Self::ProcessCompleted,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendHash => "send_hash",
            Self::Estimation => "estimation",
            Self::SendData => "send_data",
            Self::ProcessStarts => "process_starts",
            Self::ProcessGenerating => "process_generating",
            Self::ProcessCompleted => "process_completed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound control frame.
///
/// Handshake frames carry only `msg`; process frames add `success` and
/// `output`. A missing `success` means the frame is not reporting a failure.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueEvent {
    #[serde(default)]
    pub msg: String,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub output: EventOutput,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventOutput {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub is_generating: bool,
}

fn default_true() -> bool {
    true
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::from_msg(&self.msg)
    }

    /// Extract the latest cumulative assistant snapshot from `output.data`.
    ///
    /// The payload is `[metadata, conversation_list]` where each conversation
    /// entry is `[user_html, assistant_html]`. Returns `None` when the shape
    /// has fewer than two top-level elements or any nested level is missing
    /// or malformed; a bad shape is "no new content this tick", never an
    /// error.
    pub fn snapshot(&self) -> Option<String> {
        if self.output.data.len() <= 1 {
            return None;
        }
        let conversations = self.output.data.get(1)?.as_array()?;
        let latest = conversations.last()?.as_array()?;
        latest.get(1)?.as_str().map(str::to_string)
    }
}

/// Handshake reply sent after `send_hash` is received.
#[derive(Debug, Clone, Serialize)]
pub struct JoinFrame {
    pub fn_index: u32,
    pub session_hash: String,
}

/// The inference request sent after `send_data` is received.
///
/// The `data` array's slot order is fixed by the upstream function
/// signature: `[null, max_tokens, model, query, "", 1, 1, history, null,
/// system_prompt, "", null]`.
#[derive(Debug, Clone, Serialize)]
pub struct PredictFrame {
    pub data: Value,
    pub event_data: Option<Value>,
    pub fn_index: u32,
    pub session_hash: String,
}

impl PredictFrame {
    pub fn new(
        fn_index: u32,
        session_hash: &str,
        max_tokens: u32,
        system_prompt: &str,
        model: &str,
        query: &str,
        history: &[ConversationTurn],
    ) -> Self {
        Self {
            data: serde_json::json!([
                null,
                max_tokens,
                model,
                query,
                "",
                1,
                1,
                history_payload(history),
                null,
                system_prompt,
                "",
                null,
            ]),
            event_data: None,
            fn_index,
            session_hash: session_hash.to_string(),
        }
    }
}

/// History as the upstream expects it: a list of `[user]` or
/// `[user, assistant]` string pairs.
fn history_payload(history: &[ConversationTurn]) -> Value {
    Value::Array(
        history
            .iter()
            .map(|turn| {
                let mut pair = vec![Value::String(turn.user_text.clone())];
                if let Some(assistant) = &turn.assistant_text {
                    pair.push(Value::String(assistant.clone()));
                }
                Value::Array(pair)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_frame_parses_without_output() {
        let event: QueueEvent = serde_json::from_str(r#"{"msg":"send_hash"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::SendHash);
        assert!(event.success);
        assert!(event.output.data.is_empty());
    }

    #[test]
    fn test_unrecognized_kind_is_unknown() {
        let event: QueueEvent =
            serde_json::from_str(r#"{"msg":"queue_full","success":true}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Unknown);
    }

    #[test]
    fn test_snapshot_extraction() {
        let event: QueueEvent = serde_json::from_value(json!({
            "msg": "process_generating",
            "success": true,
            "output": {
                "data": [null, [["q1", "a1"], ["q2", "<p>partial</p>"]]],
                "is_generating": true
            }
        }))
        .unwrap();

        assert_eq!(event.snapshot().as_deref(), Some("<p>partial</p>"));
    }

    #[test]
    fn test_snapshot_single_conversation() {
        let event: QueueEvent = serde_json::from_value(json!({
            "msg": "process_generating",
            "output": {"data": [null, [["q", "a"]]]}
        }))
        .unwrap();

        assert_eq!(event.snapshot().as_deref(), Some("a"));
    }

    #[test]
    fn test_snapshot_malformed_shapes() {
        // Fewer than two top-level elements.
        let event: QueueEvent = serde_json::from_value(json!({
            "msg": "process_generating",
            "output": {"data": [null]}
        }))
        .unwrap();
        assert_eq!(event.snapshot(), None);

        // Conversation list is not a list.
        let event: QueueEvent = serde_json::from_value(json!({
            "msg": "process_generating",
            "output": {"data": [null, "oops"]}
        }))
        .unwrap();
        assert_eq!(event.snapshot(), None);

        // Entry has no assistant slot.
        let event: QueueEvent = serde_json::from_value(json!({
            "msg": "process_generating",
            "output": {"data": [null, [["only-user"]]]}
        }))
        .unwrap();
        assert_eq!(event.snapshot(), None);

        // Assistant slot is not a string.
        let event: QueueEvent = serde_json::from_value(json!({
            "msg": "process_generating",
            "output": {"data": [null, [["q", 7]]]}
        }))
        .unwrap();
        assert_eq!(event.snapshot(), None);
    }

    #[test]
    fn test_join_frame_shape() {
        let frame = JoinFrame {
            fn_index: 18,
            session_hash: "abc123".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["fn_index"], 18);
        assert_eq!(json["session_hash"], "abc123");
    }

    #[test]
    fn test_predict_frame_slot_order() {
        let history = vec![
            ConversationTurn {
                user_text: "hi".to_string(),
                assistant_text: Some("hello".to_string()),
            },
            ConversationTurn {
                user_text: "pending".to_string(),
                assistant_text: None,
            },
        ];
        let frame = PredictFrame::new(18, "hash", 4096, "assist", "gpt-4o", "bye", &history);
        let json = serde_json::to_value(&frame).unwrap();

        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 12);
        assert_eq!(data[0], Value::Null);
        assert_eq!(data[1], 4096);
        assert_eq!(data[2], "gpt-4o");
        assert_eq!(data[3], "bye");
        assert_eq!(data[7], json!([["hi", "hello"], ["pending"]]));
        assert_eq!(data[9], "assist");
        assert_eq!(json["event_data"], Value::Null);
        assert_eq!(json["fn_index"], 18);
        assert_eq!(json["session_hash"], "hash");
    }
}
