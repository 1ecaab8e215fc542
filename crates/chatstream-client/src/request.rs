//! Request bodies.
//!
//! [`ChatRequest`] is the history sent for one turn. A chat proxy receives it
//! as is; an OpenAI-compatible endpoint receives the [`CompletionRequest`]
//! built from it, with attachments expanded into content blocks.

use chatstream_core::{FileAttachment, Message, Role};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

/// One message of the outgoing history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Author.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Attached files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<FileAttachment>>,
}

impl From<&Message> for OutgoingMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            attachments: message.attachments.clone(),
        }
    }
}

/// The history submitted for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Messages in conversation order.
    pub messages: Vec<OutgoingMessage>,
}

impl ChatRequest {
    /// Build a request from stored messages.
    #[must_use]
    pub fn from_history(history: &[Message]) -> Self {
        Self {
            messages: history.iter().map(OutgoingMessage::from).collect(),
        }
    }

    /// Build a request from stored messages plus a new user message.
    #[must_use]
    pub fn with_user_message(
        history: &[Message],
        content: &str,
        attachments: Option<Vec<FileAttachment>>,
    ) -> Self {
        let mut request = Self::from_history(history);
        request.messages.push(OutgoingMessage {
            role: Role::User,
            content: content.to_string(),
            attachments,
        });
        request
    }

    /// Convert into an OpenAI-compatible streaming request.
    #[must_use]
    pub fn to_completion_request(&self, config: &ClientConfig) -> CompletionRequest {
        let system = config
            .system_prompt
            .as_ref()
            .filter(|prompt| !prompt.trim().is_empty())
            .map(|prompt| CompletionMessage {
                role: "system".to_string(),
                content: MessageContent::Text(prompt.clone()),
            });

        let messages = system
            .into_iter()
            .chain(self.messages.iter().map(CompletionMessage::from))
            .collect();

        CompletionRequest {
            model: config.model.clone(),
            messages,
            stream: true,
            max_tokens: config.max_tokens,
        }
    }
}

// =============================================================================
// OpenAI-compatible body
// =============================================================================

/// Body of a streaming `chat/completions` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Model name.
    pub model: String,
    /// System prompt followed by the history.
    pub messages: Vec<CompletionMessage>,
    /// Always `true`.
    pub stream: bool,
    /// Completion token limit.
    pub max_tokens: u32,
}

/// A message in completion format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Plain text, or content blocks when files are attached.
    pub content: MessageContent,
}

impl From<&OutgoingMessage> for CompletionMessage {
    fn from(message: &OutgoingMessage) -> Self {
        let content = match message.attachments.as_deref() {
            None | Some([]) => MessageContent::Text(message.content.clone()),
            Some(attachments) => {
                let text = (!message.content.trim().is_empty()).then(|| ContentBlock::Text {
                    text: message.content.clone(),
                });
                MessageContent::Blocks(
                    text.into_iter()
                        .chain(attachments.iter().map(ContentBlock::from))
                        .collect(),
                )
            }
        };
        Self {
            role: message.role.as_str().to_string(),
            content,
        }
    }
}

/// Message content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Multimodal blocks.
    Blocks(Vec<ContentBlock>),
}

/// One multimodal content block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text.
    Text {
        /// Block text.
        text: String,
    },
    /// Image passed by data URL.
    ImageUrl {
        /// Image location.
        image_url: ImageUrl,
    },
}

/// Image reference of an [`ContentBlock::ImageUrl`] block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    /// `data:` URL.
    pub url: String,
}

impl From<&FileAttachment> for ContentBlock {
    fn from(attachment: &FileAttachment) -> Self {
        if attachment.is_image() {
            Self::ImageUrl {
                image_url: ImageUrl {
                    url: attachment.data.clone(),
                },
            }
        } else {
            Self::Text {
                text: format!(
                    "[Attached file: {} ({}, {} KB)]",
                    attachment.name,
                    attachment.mime_type,
                    kilobytes(attachment.size_bytes)
                ),
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn kilobytes(size_bytes: u64) -> String {
    format!("{:.1}", size_bytes as f64 / 1024.0)
}
