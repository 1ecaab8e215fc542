//! Terminal rendering of animator output and transcripts.

use std::fmt::Write as _;

use chatstream_client::AnimatorEvent;
use chatstream_core::{Conversation, Message, Role};

/// Turns successive animator snapshots into the text still to be printed.
#[derive(Debug, Default)]
pub struct Renderer {
    generation: Option<u64>,
    /// Bytes of the current reply already printed.
    printed: usize,
}

impl Renderer {
    /// Create a renderer with nothing printed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for `event`.
    ///
    /// A new generation starts a new reply. Updates are prefixes of each
    /// other, so only the unseen suffix is returned.
    pub fn apply<'a>(&mut self, event: &'a AnimatorEvent) -> &'a str {
        let text = event.text();
        if self.generation != Some(event.generation()) {
            self.generation = Some(event.generation());
            self.printed = 0;
        }
        if self.printed > text.len() || !text.is_char_boundary(self.printed) {
            tracing::debug!(printed = self.printed, len = text.len(), "Reply snapshot shrank");
            self.printed = text.len();
            return "";
        }
        let start = self.printed;
        self.printed = text.len();
        &text[start..]
    }
}

/// One line per message, numbered from 1.
#[must_use]
pub fn history(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "(no messages yet)".to_string();
    }
    messages
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let mut line = format!("[{}] {}: {}", i + 1, role_label(message.role), message.content);
            for attachment in message.attachments() {
                let _ = write!(line, "\n      📎 {} ({})", attachment.name, attachment.mime_type);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per conversation, the active one marked with `*`.
#[must_use]
pub fn conversation_list(conversations: &[Conversation], active: Option<&Conversation>) -> String {
    conversations
        .iter()
        .enumerate()
        .map(|(i, conversation)| {
            let marker = if active.is_some_and(|a| a.id == conversation.id) { '*' } else { ' ' };
            format!(
                "{marker} {}. {} ({} messages)",
                i + 1,
                conversation.title,
                conversation.messages.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt label for a role.
#[must_use]
pub const fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}
