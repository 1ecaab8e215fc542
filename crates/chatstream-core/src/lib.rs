//! Conversation model for chatstream.
//!
//! This crate holds the parts of the client that have nothing to do with the
//! network:
//!
//! - **Identifiers**: UUID-backed ids for conversations, messages and attachments
//! - **Data model**: messages, attachments and conversations
//! - **Store**: the branchable, in-memory [`ConversationStore`]
//! - **Limits**: validation of user input before it is sent
//!
//! # Example
//!
//! ```
//! use chatstream_core::{ConversationStore, Role};
//!
//! let mut store = ConversationStore::with_conversation();
//! let q1 = store.add_message("Question 1", Role::User, None);
//! store.add_message("Response 1", Role::Assistant, None);
//! store.add_message("Question 2", Role::User, None);
//!
//! // Branch from the first question.
//! store.truncate_messages_after(&q1);
//! assert_eq!(store.messages().len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod limits;
pub mod store;
pub mod types;

pub use error::{CoreError, Result, ValidationError};
pub use ids::{AttachmentId, ConversationId, IdError, MessageId};
pub use store::ConversationStore;
pub use types::{Conversation, FileAttachment, Message, Role};
