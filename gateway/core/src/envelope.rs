//! Completion-style response envelope
//!
//! Callers of the gateway expect the shape of a chat-completions response, so
//! translated text is wrapped in one with fabricated id and usage fields.
//! Failures that reach the caller are reported as small sentinel objects
//! inside a 200 response rather than as HTTP errors.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Body returned when paragraph count could not be preserved
pub const UNEQUAL_PARAGRAPH_COUNT: &str = r#"{"ERROR":"UnequalParagraphCountError"}"#;

/// Body returned when every backend of a pool failed
pub const FATAL: &str = r#"{"ERROR":"FATAL"}"#;

/// Body returned when the inbound request could not be read
pub const INVALID_REQUEST: &str = r#"{"ERROR":"InvalidRequest"}"#;

/// A chat-completions response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    /// `chatcmpl-` followed by 30 random alphanumerics
    pub id: String,
    /// Always `chat.completion`
    pub object: String,
    /// Unix seconds
    pub created: i64,
    /// Exactly one choice
    pub choices: Vec<Choice>,
    /// Fixed, fabricated token counts
    pub usage: Usage,
}

/// One completion choice
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    /// Choice position
    pub index: u32,
    /// Assistant message
    pub message: Message,
    /// Always `stop`
    pub finish_reason: String,
}

/// A chat message, used both inbound and outbound
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

/// Token usage block
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Usage {
    #[allow(missing_docs)]
    pub prompt_tokens: u32,
    #[allow(missing_docs)]
    pub completion_tokens: u32,
    #[allow(missing_docs)]
    pub total_tokens: u32,
}

impl CompletionEnvelope {
    /// Wrap translated content
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        Self {
            id: format!("chatcmpl-{suffix}"),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: "assistant".to_string(),
                    content: content.into(),
                },
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 2048,
                completion_tokens: 8192,
                total_tokens: 10240,
            },
        }
    }

    /// Serialize without escaping non-ASCII text
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| FATAL.to_string())
    }
}

/// Inbound chat-completions request, reduced to what the gateway reads
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CompletionRequest {
    /// Conversation so far
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    /// Text to translate
    ///
    /// The last `user` message wins. Without one, the second message is used,
    /// then the last message of any role.
    #[must_use]
    pub fn text_to_translate(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .or_else(|| self.messages.get(1))
            .or_else(|| self.messages.last())
            .map(|m| m.content.as_str())
    }
}
