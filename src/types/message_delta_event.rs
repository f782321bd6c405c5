use serde::{Deserialize, Serialize};

use crate::types::{MessageRole, TextContent};

/// One content part of a streamed message delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageDeltaContent {
    /// A piece of text.
    Text {
        /// Position of the content part within the message.
        #[serde(default)]
        index: usize,

        /// The text fragment, absent on some bookkeeping deltas.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<TextContent>,
    },

    /// Any other content part.
    #[serde(other)]
    Unknown,
}

/// The changed portion of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    /// Role, sent on the first delta only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,

    /// Changed content parts.
    #[serde(default)]
    pub content: Vec<MessageDeltaContent>,
}

/// A `thread.message.delta` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaEvent {
    /// The message being streamed.
    pub id: String,

    /// What changed.
    pub delta: MessageDelta,
}

impl MessageDeltaEvent {
    /// Returns the text carried by this delta, if any.
    pub fn text(&self) -> Option<String> {
        let mut out: Option<String> = None;
        for part in &self.delta.content {
            if let MessageDeltaContent::Text {
                text: Some(text), ..
            } = part
            {
                out.get_or_insert_with(String::new).push_str(&text.value);
            }
        }
        out.filter(|text| !text.is_empty())
    }
}
