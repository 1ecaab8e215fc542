//! Streaming side of chatstream.
//!
//! This crate turns a conversation into a streamed, typewriter-paced reply:
//!
//! - **SSE parsing**: [`sse::SseDecoder`] and [`sse::delta_stream`] turn a
//!   response body into content deltas
//! - **Animation**: [`animator::spawn_animator`] reveals text at a steady rate
//! - **Transport**: [`client::ProxyClient`] behind the [`CompletionBackend`] seam
//! - **Orchestration**: [`ChatSession`] runs send, retry and edit turns
//!
//! # Example
//!
//! ```no_run
//! use chatstream_client::{spawn_animator, AnimatorConfig, ChatSession, ClientConfig, ProxyClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ProxyClient::new(ClientConfig::default())?;
//! let (animator, mut events) = spawn_animator(AnimatorConfig::default());
//! let mut session = ChatSession::new(client, animator);
//!
//! let outcome = session.send_message("Hello!", None).await?;
//! while let Some(event) = events.try_recv() {
//!     println!("{}", event.text());
//! }
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod animator;
pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod sse;

pub use animator::{spawn_animator, AnimatorEvent, AnimatorEvents, AnimatorHandle, DisplayBuffer};
pub use client::{ByteStream, CompletionBackend, ProxyClient};
pub use config::{AnimatorConfig, ApiFormat, ClientConfig};
pub use error::{ClientError, SessionError, StreamFailure};
pub use orchestrator::{AbortHandle, ChatSession, TurnOutcome, FALLBACK_MESSAGE};
pub use request::{ChatRequest, OutgoingMessage};
