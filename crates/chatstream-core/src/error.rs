//! Error types shared by the chatstream crates.

use crate::ids::ConversationId;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the conversation store and input validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A conversation with the specified ID does not exist.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// User input was rejected before entering the store.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
}

/// Reasons a user message or its attachments are refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The message has no visible content.
    #[error("message is empty")]
    EmptyMessage,

    /// The message exceeds the character limit.
    #[error("message is {len} characters long, limit is {max}")]
    MessageTooLong {
        /// Length of the rejected message in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Too many files were attached.
    #[error("{count} attachments exceed the limit of {max}")]
    TooManyAttachments {
        /// Number of attachments supplied.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// A single file is too large.
    #[error("attachment {name} is {size} bytes, limit is {max}")]
    AttachmentTooLarge {
        /// File name.
        name: String,
        /// File size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        max: u64,
    },

    /// The file type is not on the allow list.
    #[error("attachment {name} has unsupported type {mime_type}")]
    UnsupportedFileType {
        /// File name.
        name: String,
        /// Rejected MIME type.
        mime_type: String,
    },
}
