use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::ThreadId;

/// Role of the author of a thread message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

/// Text payload of a message content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text.
    pub value: String,

    /// Annotations attached to the text, kept verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<serde_json::Value>,
}

/// One content part of a thread message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text content.
    Text {
        /// The text payload.
        text: TextContent,
    },

    /// Any content type this crate does not render (images, files, ...).
    #[serde(other)]
    Unknown,
}

/// A message stored in a remote thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Unique identifier of the message.
    pub id: String,

    /// Thread the message belongs to.
    pub thread_id: ThreadId,

    /// Author role.
    pub role: MessageRole,

    /// Content parts in order.
    #[serde(default)]
    pub content: Vec<MessageContent>,

    /// When the message was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// The run that produced this message, for assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ThreadMessage {
    /// Returns the text of the message, or `None` if it has no text parts.
    ///
    /// Multiple text parts are concatenated in order.
    pub fn text(&self) -> Option<String> {
        let mut out: Option<String> = None;
        for part in &self.content {
            if let MessageContent::Text { text } = part {
                out.get_or_insert_with(String::new).push_str(&text.value);
            }
        }
        out
    }
}

/// Request body for adding a message to a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageParams {
    /// Author role; user messages are the only kind this crate sends.
    pub role: MessageRole,

    /// Message text.
    pub content: String,
}

impl CreateMessageParams {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}
