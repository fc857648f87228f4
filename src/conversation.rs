//! Conversation pairing.
//!
//! The upstream service takes history as ordered (user, assistant) turn
//! pairs plus a separate active query, while callers send a flat ordered
//! message list. This module converts between the two shapes.

use thiserror::Error;

use crate::api::models::{ChatMessage, Role};

/// One paired conversation turn. A turn with no assistant text is a user
/// message that never received an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user_text: String,
    pub assistant_text: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("request contains no user message")]
    NoUserMessage,
}

/// Split a flat message list into the active query and the preceding history
/// turns.
///
/// Scans left to right: a `user` message immediately followed by an
/// `assistant` message becomes one answered turn; a `user` message followed
/// by anything else becomes an unanswered turn; `system` messages and
/// unpaired `assistant` messages are skipped. The final turn's user text is
/// the active query and is removed from the returned history.
pub fn split_messages(
    messages: &[ChatMessage],
) -> Result<(String, Vec<ConversationTurn>), ConversationError> {
    let mut turns = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        if messages[i].role != Role::User {
            i += 1;
            continue;
        }

        let user_text = messages[i].content.clone();
        if i + 1 < messages.len() && messages[i + 1].role == Role::Assistant {
            turns.push(ConversationTurn {
                user_text,
                assistant_text: Some(messages[i + 1].content.clone()),
            });
            i += 2;
        } else {
            turns.push(ConversationTurn {
                user_text,
                assistant_text: None,
            });
            i += 1;
        }
    }

    let active = turns.pop().ok_or(ConversationError::NoUserMessage)?;
    Ok((active.user_text, turns))
}
