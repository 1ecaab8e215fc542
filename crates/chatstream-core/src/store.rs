//! In-memory conversation store.
//!
//! The store owns every conversation of a session and tracks which one is
//! active. All message operations address the active conversation and are
//! plain transformations of its ordered message list:
//!
//! - [`ConversationStore::add_message`] appends.
//! - [`ConversationStore::update_last_message`] rewrites the content of a
//!   trailing assistant message (the streaming target).
//! - [`ConversationStore::truncate_messages_after`] and
//!   [`ConversationStore::remove_messages_from`] cut the timeline to create a
//!   branch point for retry and edit.
//!
//! Precondition failures (unknown message, wrong role) are no-ops that
//! return `false`; nothing here panics or errors mid-stream.

use crate::error::{CoreError, Result};
use crate::ids::{ConversationId, MessageId};
use crate::types::{derive_title, Conversation, FileAttachment, Message, Role};

/// Owns the conversations of one client session.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    /// Conversations, newest first.
    conversations: Vec<Conversation>,
    /// The conversation message operations apply to.
    current: Option<ConversationId>,
}

impl ConversationStore {
    /// Create an empty store with no conversations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one empty, active conversation.
    #[must_use]
    pub fn with_conversation() -> Self {
        let mut store = Self::new();
        store.create_conversation();
        store
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Start a new empty conversation and make it active.
    pub fn create_conversation(&mut self) -> ConversationId {
        let conversation = Conversation::new();
        let id = conversation.id;
        self.conversations.insert(0, conversation);
        self.current = Some(id);
        tracing::debug!(conversation_id = %id, "Conversation created");
        id
    }

    /// Make an existing conversation active.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConversationNotFound` if no conversation has the id.
    pub fn switch_conversation(&mut self, id: ConversationId) -> Result<()> {
        if !self.conversations.iter().any(|c| c.id == id) {
            return Err(CoreError::ConversationNotFound(id));
        }
        self.current = Some(id);
        Ok(())
    }

    /// All conversations, newest first.
    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// ID of the active conversation.
    #[must_use]
    pub const fn current_conversation_id(&self) -> Option<ConversationId> {
        self.current
    }

    /// The active conversation.
    #[must_use]
    pub fn current_conversation(&self) -> Option<&Conversation> {
        let id = self.current?;
        self.conversations.iter().find(|c| c.id == id)
    }

    fn current_index(&self) -> Option<usize> {
        let id = self.current?;
        self.conversations.iter().position(|c| c.id == id)
    }

    fn current_mut(&mut self) -> Option<&mut Conversation> {
        let index = self.current_index()?;
        self.conversations.get_mut(index)
    }

    /// Messages of the active conversation, in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.current_conversation()
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Append a message to the active conversation.
    ///
    /// A conversation is created first when none is active. A user message
    /// opening an empty conversation fixes its title, once.
    pub fn add_message(
        &mut self,
        content: impl Into<String>,
        role: Role,
        attachments: Option<Vec<FileAttachment>>,
    ) -> MessageId {
        let index = match self.current_index() {
            Some(index) => index,
            None => {
                self.create_conversation();
                0
            }
        };

        let message = Message::new(role, content, attachments);
        let message_id = message.id;
        let conversation = &mut self.conversations[index];
        let conversation_id = conversation.id;

        if role == Role::User && conversation.messages.is_empty() && !conversation.title_frozen {
            conversation.title = derive_title(&message.content);
            conversation.title_frozen = true;
        }
        conversation.messages.push(message);

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            role = role.as_str(),
            "Message added"
        );
        message_id
    }

    /// Replace the content of the last message if it is an assistant message.
    ///
    /// Returns `false` (and changes nothing) when the conversation is empty
    /// or ends with a user message.
    pub fn update_last_message(&mut self, content: impl Into<String>) -> bool {
        let Some(last) = self.current_mut().and_then(|c| c.messages.last_mut()) else {
            return false;
        };
        if last.role != Role::Assistant {
            return false;
        }
        last.content = content.into();
        true
    }

    /// Keep every message up to and including `message_id`, drop the rest.
    ///
    /// Returns `false` if the message is not in the active conversation.
    pub fn truncate_messages_after(&mut self, message_id: &MessageId) -> bool {
        self.cut(message_id, 1)
    }

    /// Keep every message strictly before `message_id`, drop it and the rest.
    ///
    /// Returns `false` if the message is not in the active conversation.
    pub fn remove_messages_from(&mut self, message_id: &MessageId) -> bool {
        self.cut(message_id, 0)
    }

    fn cut(&mut self, message_id: &MessageId, keep_extra: usize) -> bool {
        let Some(conversation) = self.current_mut() else {
            return false;
        };
        let Some(index) = conversation.position_of(message_id) else {
            tracing::debug!(message_id = %message_id, "Truncation target not found");
            return false;
        };
        let before = conversation.messages.len();
        conversation.messages.truncate(index + keep_extra);
        tracing::debug!(
            message_id = %message_id,
            removed = before - conversation.messages.len(),
            "Conversation truncated"
        );
        true
    }

    /// Look up a message of the active conversation.
    #[must_use]
    pub fn find_message(&self, message_id: &MessageId) -> Option<&Message> {
        self.messages().iter().find(|m| m.id == *message_id)
    }

    /// The closest user message before `message_id`.
    #[must_use]
    pub fn preceding_user_message(&self, message_id: &MessageId) -> Option<&Message> {
        let messages = self.messages();
        let index = messages.iter().position(|m| m.id == *message_id)?;
        messages[..index].iter().rev().find(|m| m.role == Role::User)
    }
}
