//! Remote conversation state
//!
//! A chat agent talks inside one remote conversation for its whole life. The
//! first successful exchange creates it; every reply moves the message-chain
//! pointer (`current_node`) forward so the next message is threaded after it.

use serde_json::{json, Value};
use uuid::Uuid;

/// Per-agent conversation
#[derive(Clone, Debug)]
pub struct Conversation {
    /// Remote id, absent until the first exchange
    conversation_id: Option<String>,
    /// Message the next message is threaded after
    current_node: String,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// A conversation that does not exist remotely yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversation_id: None,
            current_node: Uuid::new_v4().to_string(),
        }
    }

    /// Remote id, if the conversation exists
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Whether the first exchange has happened
    #[must_use]
    pub fn exists_remotely(&self) -> bool {
        self.conversation_id.is_some()
    }

    /// Current message-chain pointer
    #[must_use]
    pub fn current_node(&self) -> &str {
        &self.current_node
    }

    /// Record the id the backend assigned on the first exchange
    ///
    /// Later calls are ignored; the conversation never changes identity.
    pub fn bootstrap(&mut self, conversation_id: &str) -> bool {
        if self.conversation_id.is_some() {
            return false;
        }
        self.conversation_id = Some(conversation_id.to_string());
        true
    }

    /// Move the pointer to the latest reply
    pub fn advance(&mut self, message_id: &str) {
        self.current_node = message_id.to_string();
    }

    /// Body for posting `prompt` as the next user message
    #[must_use]
    pub fn next_message(
        &self,
        prompt: &str,
        model: &str,
        timezone_offset_min: i32,
        websocket_request_id: &str,
    ) -> Value {
        json!({
            "action": "next",
            "messages": [{
                "id": Uuid::new_v4().to_string(),
                "author": {"role": "user"},
                "content": {"content_type": "text", "parts": [prompt]},
                "metadata": {},
            }],
            "conversation_id": self.conversation_id,
            "parent_message_id": self.current_node,
            "model": model,
            "timezone_offset_min": timezone_offset_min,
            "history_and_training_disabled": false,
            "suggestions": [],
            "conversation_mode": {"kind": "primary_assistant", "plugin_ids": null},
            "force_paragen": false,
            "force_rate_limit": false,
            "websocket_request_id": websocket_request_id,
        })
    }
}
