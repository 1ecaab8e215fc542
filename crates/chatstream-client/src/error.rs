//! Error types for the streaming client.

use chatstream_core::{CoreError, MessageId};
use thiserror::Error;

/// Errors from the completion transport.
///
/// Any of these reaching the orchestrator mid-stream is fatal for the turn.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request or body read failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The byte stream broke for a reason other than HTTP.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The client configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors returned by [`ChatSession`](crate::orchestrator::ChatSession) operations.
///
/// These are precondition failures; a broken stream is reported as
/// [`TurnOutcome::Failed`](crate::orchestrator::TurnOutcome::Failed) instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The message is not in the active conversation.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    /// Only user messages can be edited.
    #[error("message {0} is not a user message")]
    NotAUserMessage(MessageId),

    /// Retrying an assistant message that has no question before it.
    #[error("no user message precedes {0}")]
    NoPrecedingUserMessage(MessageId),

    /// The animation task is gone.
    #[error("display animator has shut down")]
    AnimatorClosed,

    /// Store or validation failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<chatstream_core::ValidationError> for SessionError {
    fn from(err: chatstream_core::ValidationError) -> Self {
        Self::Core(CoreError::Validation(err))
    }
}

/// Why a streamed reply ended early.
#[derive(Debug, Error)]
pub enum StreamFailure {
    /// The caller aborted the stream.
    #[error("stream aborted")]
    Aborted,

    /// The transport failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}
