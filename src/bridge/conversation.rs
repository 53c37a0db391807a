//! Per-sender conversation history for unattended auto-replies.
//!
//! Histories are append-only and live for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message of a chat-style prompt. Serializes as `{role, content}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Shared store keyed by mesh sender id (`!a1b2c3d4`). Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    histories: Arc<Mutex<HashMap<String, Vec<ConversationTurn>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ConversationTurn>>> {
        self.histories.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append_user_turn(&self, sender_id: &str, text: &str) {
        self.append(sender_id, ConversationTurn::new(Role::User, text));
    }

    pub fn append_assistant_turn(&self, sender_id: &str, text: &str) {
        self.append(sender_id, ConversationTurn::new(Role::Assistant, text));
    }

    fn append(&self, sender_id: &str, turn: ConversationTurn) {
        self.lock().entry(sender_id.to_string()).or_default().push(turn);
    }

    /// Copy of the sender's turns, oldest first. Empty for unknown senders.
    pub fn history_for(&self, sender_id: &str) -> Vec<ConversationTurn> {
        self.lock().get(sender_id).cloned().unwrap_or_default()
    }

    pub fn sender_count(&self) -> usize {
        self.lock().len()
    }

    /// Total turns across all senders.
    pub fn turn_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }
}
