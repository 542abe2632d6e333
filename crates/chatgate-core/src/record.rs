//! Persisted conversation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, OutboundMessage, Role};

/// The persisted unit of a conversation, keyed by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Unique session key
    pub session_id: String,
    /// Set once, when the first turn starts
    pub created: DateTime<Utc>,
    /// Set on every turn after the first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Token usage of the most recent turn
    #[serde(default)]
    pub total_tokens: u64,
    /// Conversation in insertion order
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ConversationRecord {
    /// Create an empty record for a session that has never been persisted.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created: Utc::now(),
            last_update: None,
            total_tokens: 0,
            messages: vec![],
        }
    }

    /// Record a turn timestamp. The first turn only owns `created`.
    pub fn touch(&mut self, at: DateTime<Utc>, first_turn: bool) {
        if !first_turn {
            self.last_update = Some(at);
        }
    }

    /// Append a user message and its assistant reply as one turn.
    pub fn push_turn(&mut self, user: ChatMessage, assistant: ChatMessage) {
        debug_assert_eq!(user.role, Role::User);
        debug_assert_eq!(assistant.role, Role::Assistant);
        self.messages.push(user);
        self.messages.push(assistant);
    }

    /// Drop the oldest `count` messages from the stored log.
    pub fn prune_oldest(&mut self, count: usize) {
        let count = count.min(self.messages.len());
        self.messages.drain(..count);
    }

    /// Outbound view of the full history.
    pub fn outbound(&self) -> Vec<OutboundMessage> {
        self.messages.iter().map(ChatMessage::outbound).collect()
    }

    /// Number of completed user/assistant pairs.
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }
}
