//! Conversation data model.
//!
//! These types are what the store hands out and what the client serializes
//! into the Send contract, so field names follow the wire (`snake_case`).

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{AttachmentId, ConversationId, MessageId};

/// Title given to a conversation before its first user message arrives.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Number of characters of the first user message kept in the title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Typed by the person using the client.
    User,
    /// Generated by the completion service.
    Assistant,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A file attached to a message, carried as a base64 data URL.
///
/// Serializes as `{ id, name, type, size, data }`, the shape a chat proxy
/// reads when it formats the upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    /// Attachment ID.
    pub id: AttachmentId,
    /// Original file name.
    pub name: String,
    /// MIME type, e.g. `image/png`.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Size of the decoded file in bytes.
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// `data:<mime>;base64,<payload>` URL.
    pub data: String,
}

impl FileAttachment {
    /// Encode raw file bytes into an attachment.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mime_type = mime_type.into();
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            id: AttachmentId::generate(),
            name: name.into(),
            data: format!("data:{mime_type};base64,{encoded}"),
            mime_type,
            size_bytes: bytes.len() as u64,
        }
    }

    /// Whether the attachment is an image (sent as an image block upstream).
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// One entry of a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text content. Only the last assistant message is ever rewritten.
    pub content: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Files sent along with a user message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<FileAttachment>>,
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>, attachments: Option<Vec<FileAttachment>>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
            attachments,
        }
    }

    /// Attachments as a slice, empty when there are none.
    #[must_use]
    pub fn attachments(&self) -> &[FileAttachment] {
        self.attachments.as_deref().unwrap_or_default()
    }
}

/// An ordered message timeline with a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID.
    pub id: ConversationId,
    /// Display title, frozen after the first user message.
    pub title: String,
    /// Whether `title` has been derived and must not change again.
    #[serde(default)]
    pub title_frozen: bool,
    /// Messages in insertion order.
    pub messages: Vec<Message>,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl Conversation {
    /// Create an empty conversation titled [`DEFAULT_TITLE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ConversationId::generate(),
            title: DEFAULT_TITLE.to_string(),
            title_frozen: false,
            messages: Vec::new(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Position of a message in the timeline.
    #[must_use]
    pub fn position_of(&self, message_id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == *message_id)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a conversation title from the first user message.
///
/// Keeps the first [`TITLE_MAX_CHARS`] characters and appends `...` when the
/// content was longer.
#[must_use]
pub fn derive_title(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
