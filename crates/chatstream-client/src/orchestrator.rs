//! Chat session orchestration.
//!
//! [`ChatSession`] ties the pieces together for one turn: it records the user
//! message, opens the completion stream, writes deltas into the store and the
//! animator, and settles the turn as completed or failed. A broken stream is
//! not an error of the call; the turn ends with a fallback assistant message
//! and [`TurnOutcome::Failed`].

use std::sync::Arc;

use chatstream_core::limits::validate_message;
use chatstream_core::{ConversationStore, FileAttachment, MessageId, Role};
use futures::StreamExt;
use tokio::sync::watch;

use crate::animator::AnimatorHandle;
use crate::client::CompletionBackend;
use crate::error::{SessionError, StreamFailure};
use crate::request::ChatRequest;
use crate::sse::delta_stream;

/// Assistant message appended when a reply cannot be completed.
pub const FALLBACK_MESSAGE: &str =
    "Sorry, there was an error processing your request. Please try again.";

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The stream ended normally.
    Completed {
        /// The assistant message holding the reply.
        message_id: MessageId,
        /// Full reply text, possibly empty.
        content: String,
    },
    /// The stream failed or was aborted.
    Failed {
        /// The fallback assistant message.
        message_id: MessageId,
        /// Partial reply kept in the transcript, if any delta arrived.
        partial: Option<MessageId>,
        /// What went wrong.
        reason: StreamFailure,
    },
}

impl TurnOutcome {
    /// Whether the reply completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Cancels the in-flight stream of a [`ChatSession`].
#[derive(Debug, Clone)]
pub struct AbortHandle {
    signal: Arc<watch::Sender<u64>>,
}

impl AbortHandle {
    /// Stop the current stream. Has no effect when nothing is streaming.
    pub fn abort(&self) {
        self.signal.send_modify(|count| *count = count.wrapping_add(1));
    }
}

/// One client session: the conversations plus the streaming machinery.
pub struct ChatSession<B> {
    store: ConversationStore,
    backend: B,
    animator: AnimatorHandle,
    is_streaming: bool,
    abort: Arc<watch::Sender<u64>>,
}

impl<B: CompletionBackend> ChatSession<B> {
    /// Create a session with one empty conversation.
    #[must_use]
    pub fn new(backend: B, animator: AnimatorHandle) -> Self {
        Self::with_store(backend, animator, ConversationStore::with_conversation())
    }

    /// Create a session over an existing store.
    #[must_use]
    pub fn with_store(backend: B, animator: AnimatorHandle, store: ConversationStore) -> Self {
        let (abort, _) = watch::channel(0);
        Self {
            store,
            backend,
            animator,
            is_streaming: false,
            abort: Arc::new(abort),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The conversation store.
    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Mutable access for conversation management.
    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    /// The completion backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The animator fed by this session.
    #[must_use]
    pub fn animator(&self) -> &AnimatorHandle {
        &self.animator
    }

    /// Whether a reply is streaming.
    ///
    /// Stays set when a turn future is dropped before it finishes; the next
    /// turn settles the abandoned reply and clears it.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// A handle that aborts the in-flight stream.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal: Arc::clone(&self.abort),
        }
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Send a user message and stream the reply.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unsendable input, or `AnimatorClosed`.
    pub async fn send_message(
        &mut self,
        content: &str,
        attachments: Option<Vec<FileAttachment>>,
    ) -> Result<TurnOutcome, SessionError> {
        self.settle_interrupted_turn()?;
        validate_message(content, attachments.as_deref().unwrap_or_default())?;

        let request =
            ChatRequest::with_user_message(self.store.messages(), content, attachments.clone());
        self.store.add_message(content, Role::User, attachments);

        self.stream_reply(request).await
    }

    /// Regenerate the reply to a message.
    ///
    /// For a user message everything after it is dropped; for an assistant
    /// message everything after the nearest preceding user message is. The
    /// retained history is then resubmitted.
    ///
    /// # Errors
    ///
    /// Returns `MessageNotFound`, `NoPrecedingUserMessage`, or
    /// `AnimatorClosed`.
    pub async fn retry(&mut self, message_id: &MessageId) -> Result<TurnOutcome, SessionError> {
        self.settle_interrupted_turn()?;

        let message = self
            .store
            .find_message(message_id)
            .ok_or(SessionError::MessageNotFound(*message_id))?;
        let anchor = match message.role {
            Role::User => message.id,
            Role::Assistant => {
                self.store
                    .preceding_user_message(message_id)
                    .ok_or(SessionError::NoPrecedingUserMessage(*message_id))?
                    .id
            }
        };

        tracing::debug!(message_id = %message_id, anchor = %anchor, "Retrying turn");
        self.store.truncate_messages_after(&anchor);
        let request = ChatRequest::from_history(self.store.messages());

        self.stream_reply(request).await
    }

    /// Replace a user message and stream a new reply.
    ///
    /// The message and everything after it are dropped, the new content is
    /// appended with the original attachments, and the history is resent.
    ///
    /// # Errors
    ///
    /// Returns `MessageNotFound`, `NotAUserMessage`, a validation error, or
    /// `AnimatorClosed`.
    pub async fn edit(
        &mut self,
        message_id: &MessageId,
        new_content: &str,
    ) -> Result<TurnOutcome, SessionError> {
        self.settle_interrupted_turn()?;

        let message = self
            .store
            .find_message(message_id)
            .ok_or(SessionError::MessageNotFound(*message_id))?;
        if message.role != Role::User {
            return Err(SessionError::NotAUserMessage(*message_id));
        }
        validate_message(new_content, message.attachments())?;
        let attachments = message.attachments.clone();

        tracing::debug!(message_id = %message_id, "Editing message");
        self.store.remove_messages_from(message_id);
        let request =
            ChatRequest::with_user_message(self.store.messages(), new_content, attachments.clone());
        self.store.add_message(new_content, Role::User, attachments);

        self.stream_reply(request).await
    }

    /// Close out a turn whose future was dropped mid-stream.
    ///
    /// `&mut self` rules out two live turns, so a set flag here always
    /// belongs to an abandoned one. It is settled like an abort: the
    /// animator is reset and the fallback message follows whatever partial
    /// reply was stored.
    fn settle_interrupted_turn(&mut self) -> Result<(), SessionError> {
        if !self.is_streaming {
            return Ok(());
        }
        tracing::warn!("Previous reply was interrupted, settling it");
        self.is_streaming = false;
        self.animator.reset()?;
        self.store.add_message(FALLBACK_MESSAGE, Role::Assistant, None);
        Ok(())
    }

    async fn stream_reply(&mut self, request: ChatRequest) -> Result<TurnOutcome, SessionError> {
        self.animator.reset()?;
        self.is_streaming = true;
        let outcome = self.drive_stream(&request).await;
        self.is_streaming = false;
        outcome
    }

    async fn drive_stream(&mut self, request: &ChatRequest) -> Result<TurnOutcome, SessionError> {
        let mut abort = self.abort.subscribe();
        let mut reply = String::new();
        let mut reply_id: Option<MessageId> = None;

        let opened = tokio::select! {
            biased;
            _ = abort.changed() => Err(StreamFailure::Aborted),
            result = self.backend.open_stream(request) => result.map_err(StreamFailure::from),
        };

        let failure = match opened {
            Err(failure) => Some(failure),
            Ok(bytes) => {
                let mut deltas = Box::pin(delta_stream(bytes));
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = abort.changed() => break Some(StreamFailure::Aborted),
                        next = deltas.next() => next,
                    };
                    match next {
                        Some(Ok(delta)) => {
                            reply.push_str(&delta);
                            if reply_id.is_some() {
                                self.store.update_last_message(reply.as_str());
                            } else {
                                reply_id =
                                    Some(self.store.add_message(reply.as_str(), Role::Assistant, None));
                            }
                            self.animator.add_chunk(delta)?;
                        }
                        Some(Err(e)) => break Some(StreamFailure::Client(e)),
                        None => break None,
                    }
                }
            }
        };

        if let Some(reason) = failure {
            tracing::warn!(error = %reason, partial_chars = reply.chars().count(), "Reply failed");
            self.animator.reset()?;
            let message_id = self.store.add_message(FALLBACK_MESSAGE, Role::Assistant, None);
            return Ok(TurnOutcome::Failed {
                message_id,
                partial: reply_id,
                reason,
            });
        }

        let message_id = match reply_id {
            Some(id) => id,
            None => {
                tracing::debug!("Empty reply");
                self.store.add_message("", Role::Assistant, None)
            }
        };
        self.animator.finish_streaming()?;
        tracing::debug!(message_id = %message_id, chars = reply.chars().count(), "Reply complete");

        Ok(TurnOutcome::Completed {
            message_id,
            content: reply,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chatstream_core::ValidationError;
    use chatstream_core::CoreError;
    use futures::stream;

    use super::*;
    use crate::animator::{spawn_animator, AnimatorEvent, AnimatorEvents};
    use crate::client::ByteStream;
    use crate::config::AnimatorConfig;
    use crate::error::ClientError;

    enum Script {
        Reply(Vec<&'static str>),
        Broken(Vec<&'static str>),
        Hang(Vec<&'static str>),
        Reject,
    }

    #[derive(Default)]
    struct ScriptedBackend {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::default(),
            }
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn frames(deltas: &[&str]) -> Vec<Result<Bytes, ClientError>> {
        deltas
            .iter()
            .map(|d| {
                let line = format!(
                    "data: {}\n\n",
                    serde_json::json!({"choices": [{"delta": {"content": d}}]})
                );
                Ok(Bytes::from(line))
            })
            .collect()
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Reply(Vec::new()));
            match script {
                Script::Reply(deltas) => {
                    let mut items = frames(&deltas);
                    items.push(Ok(Bytes::from_static(b"data: [DONE]\n\n")));
                    Ok(stream::iter(items).boxed())
                }
                Script::Broken(deltas) => {
                    let mut items = frames(&deltas);
                    items.push(Err(ClientError::Transport("connection reset".to_string())));
                    Ok(stream::iter(items).boxed())
                }
                Script::Hang(deltas) => Ok(stream::iter(frames(&deltas)).chain(stream::pending()).boxed()),
                Script::Reject => Err(ClientError::Api {
                    status: 500,
                    message: "upstream down".to_string(),
                }),
            }
        }
    }

    fn session(scripts: Vec<Script>) -> (ChatSession<ScriptedBackend>, AnimatorEvents) {
        let (animator, events) = spawn_animator(AnimatorConfig::with_rate(1000.0));
        (ChatSession::new(ScriptedBackend::new(scripts), animator), events)
    }

    fn transcript<B: CompletionBackend>(session: &ChatSession<B>) -> Vec<(Role, String)> {
        session
            .store()
            .messages()
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    fn sent(request: &ChatRequest) -> Vec<(Role, &str)> {
        request
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect()
    }

    async fn complete_event(events: &mut AnimatorEvents) -> AnimatorEvent {
        loop {
            let event = events.recv().await.unwrap();
            if event.is_complete() {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn send_message_streams_reply_into_store() {
        let (mut session, mut events) = session(vec![Script::Reply(vec!["Hel", "lo"])]);

        let outcome = session.send_message("Hi", None).await.unwrap();

        match outcome {
            TurnOutcome::Completed { content, .. } => assert_eq!(content, "Hello"),
            TurnOutcome::Failed { reason, .. } => panic!("unexpected failure: {reason}"),
        }
        assert_eq!(
            transcript(&session),
            [(Role::User, "Hi".to_string()), (Role::Assistant, "Hello".to_string())]
        );
        assert!(!session.is_streaming());
        assert_eq!(sent(&session.backend().requests()[0]), [(Role::User, "Hi")]);
        assert_eq!(complete_event(&mut events).await.text(), "Hello");
    }

    #[tokio::test]
    async fn empty_reply_still_adds_assistant_message() {
        let (mut session, mut events) = session(vec![Script::Reply(Vec::new())]);

        let outcome = session.send_message("Hi", None).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(
            transcript(&session),
            [(Role::User, "Hi".to_string()), (Role::Assistant, String::new())]
        );
        assert_eq!(complete_event(&mut events).await.text(), "");
    }

    #[tokio::test]
    async fn transport_failure_keeps_partial_and_appends_fallback() {
        let (mut session, _events) = session(vec![Script::Broken(vec!["Partial"])]);

        let outcome = session.send_message("Hi", None).await.unwrap();

        match outcome {
            TurnOutcome::Failed { partial, reason, .. } => {
                assert!(partial.is_some());
                assert!(matches!(reason, StreamFailure::Client(ClientError::Transport(_))));
            }
            TurnOutcome::Completed { .. } => panic!("expected failure"),
        }
        assert_eq!(
            transcript(&session),
            [
                (Role::User, "Hi".to_string()),
                (Role::Assistant, "Partial".to_string()),
                (Role::Assistant, FALLBACK_MESSAGE.to_string()),
            ]
        );
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn rejected_request_appends_only_fallback() {
        let (mut session, _events) = session(vec![Script::Reject]);

        let outcome = session.send_message("Hi", None).await.unwrap();

        assert!(matches!(
            outcome,
            TurnOutcome::Failed { partial: None, reason: StreamFailure::Client(ClientError::Api { status: 500, .. }), .. }
        ));
        assert_eq!(
            transcript(&session),
            [(Role::User, "Hi".to_string()), (Role::Assistant, FALLBACK_MESSAGE.to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_hanging_stream() {
        let (mut session, _events) = session(vec![Script::Hang(vec!["Thinking"])]);
        let abort = session.abort_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            abort.abort();
        });

        let outcome = session.send_message("Hi", None).await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Failed { reason: StreamFailure::Aborted, .. }));
        assert_eq!(
            transcript(&session),
            [
                (Role::User, "Hi".to_string()),
                (Role::Assistant, "Thinking".to_string()),
                (Role::Assistant, FALLBACK_MESSAGE.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn abort_while_idle_does_not_affect_next_turn() {
        let (mut session, _events) = session(vec![Script::Reply(vec!["ok"])]);
        session.abort_handle().abort();

        let outcome = session.send_message("Hi", None).await.unwrap();

        assert!(outcome.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_turn_does_not_block_next_message() {
        let (mut session, mut events) = session(vec![
            Script::Hang(vec!["Thinking"]),
            Script::Reply(vec!["Fresh answer"]),
        ]);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            session.send_message("Hi", None),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(session.is_streaming());

        let outcome = session.send_message("Hello again", None).await.unwrap();

        assert!(outcome.is_completed());
        assert!(!session.is_streaming());
        assert_eq!(
            transcript(&session),
            [
                (Role::User, "Hi".to_string()),
                (Role::Assistant, "Thinking".to_string()),
                (Role::Assistant, FALLBACK_MESSAGE.to_string()),
                (Role::User, "Hello again".to_string()),
                (Role::Assistant, "Fresh answer".to_string()),
            ]
        );
        assert_eq!(complete_event(&mut events).await.text(), "Fresh answer");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_dropped_turn_regenerates_reply() {
        let (mut session, mut events) = session(vec![
            Script::Hang(vec!["Stuck"]),
            Script::Reply(vec!["Recovered"]),
        ]);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            session.send_message("Question", None),
        )
        .await;
        assert!(timed_out.is_err());
        let question = session.store().messages()[0].id;

        let outcome = session.retry(&question).await.unwrap();

        assert!(outcome.is_completed());
        assert!(!session.is_streaming());
        assert_eq!(
            transcript(&session),
            [
                (Role::User, "Question".to_string()),
                (Role::Assistant, "Recovered".to_string()),
            ]
        );
        let requests = session.backend().requests();
        assert_eq!(sent(&requests[1]), [(Role::User, "Question")]);
        assert_eq!(complete_event(&mut events).await.text(), "Recovered");
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_anything_is_stored() {
        let (mut session, _events) = session(Vec::new());

        let err = session.send_message("   ", None).await.unwrap_err();

        assert!(matches!(err, SessionError::Core(CoreError::Validation(ValidationError::EmptyMessage))));
        assert!(session.store().messages().is_empty());
        assert!(session.backend().requests().is_empty());
    }

    #[tokio::test]
    async fn retry_assistant_message_resends_preceding_question() {
        let (mut session, _events) = session(vec![
            Script::Reply(vec!["Response 1"]),
            Script::Reply(vec!["Response 2"]),
            Script::Reply(vec!["Better response 1"]),
        ]);
        session.send_message("Question 1", None).await.unwrap();
        session.send_message("Question 2", None).await.unwrap();
        let first_reply = session.store().messages()[1].id;

        session.retry(&first_reply).await.unwrap();

        assert_eq!(
            transcript(&session),
            [
                (Role::User, "Question 1".to_string()),
                (Role::Assistant, "Better response 1".to_string()),
            ]
        );
        let requests = session.backend().requests();
        assert_eq!(sent(&requests[2]), [(Role::User, "Question 1")]);
    }

    #[tokio::test]
    async fn retry_last_reply_resends_original_question() {
        let (mut session, _events) = session(vec![
            Script::Reply(vec!["Response 1"]),
            Script::Reply(vec!["Response 1b"]),
        ]);
        session.send_message("Question 1", None).await.unwrap();
        let reply = session.store().messages()[1].id;

        session.retry(&reply).await.unwrap();

        let requests = session.backend().requests();
        assert_eq!(requests[1], requests[0]);
        assert_eq!(sent(&requests[1]), [(Role::User, "Question 1")]);
        assert_eq!(
            transcript(&session),
            [(Role::User, "Question 1".to_string()), (Role::Assistant, "Response 1b".to_string())]
        );
    }

    #[tokio::test]
    async fn retry_user_message_keeps_it() {
        let (mut session, _events) = session(vec![
            Script::Reply(vec!["Response 1"]),
            Script::Reply(vec!["Again"]),
        ]);
        session.send_message("Question 1", None).await.unwrap();
        let question = session.store().messages()[0].id;

        session.retry(&question).await.unwrap();

        assert_eq!(
            transcript(&session),
            [(Role::User, "Question 1".to_string()), (Role::Assistant, "Again".to_string())]
        );
    }

    #[tokio::test]
    async fn retry_unknown_message_fails() {
        let (mut session, _events) = session(Vec::new());
        let missing = MessageId::generate();

        let err = session.retry(&missing).await.unwrap_err();

        assert!(matches!(err, SessionError::MessageNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn retry_assistant_without_question_fails() {
        let (mut session, _events) = session(Vec::new());
        let greeting = session.store_mut().add_message("Welcome", Role::Assistant, None);

        let err = session.retry(&greeting).await.unwrap_err();

        assert!(matches!(err, SessionError::NoPrecedingUserMessage(_)));
    }

    #[tokio::test]
    async fn edit_replaces_question_and_reply() {
        let (mut session, _events) = session(vec![
            Script::Reply(vec!["Response 1"]),
            Script::Reply(vec!["Response 2"]),
            Script::Reply(vec!["Edited response"]),
        ]);
        let image = FileAttachment::from_bytes("cat.png", "image/png", b"png");
        session.send_message("Question 1", None).await.unwrap();
        session.send_message("Question 2", Some(vec![image.clone()])).await.unwrap();
        let second_question = session.store().messages()[2].id;

        session.edit(&second_question, "Question 2, rephrased").await.unwrap();

        assert_eq!(
            transcript(&session),
            [
                (Role::User, "Question 1".to_string()),
                (Role::Assistant, "Response 1".to_string()),
                (Role::User, "Question 2, rephrased".to_string()),
                (Role::Assistant, "Edited response".to_string()),
            ]
        );
        let edited = &session.store().messages()[2];
        assert_ne!(edited.id, second_question);
        assert_eq!(edited.attachments(), [image]);

        let requests = session.backend().requests();
        assert_eq!(
            sent(&requests[2]),
            [
                (Role::User, "Question 1"),
                (Role::Assistant, "Response 1"),
                (Role::User, "Question 2, rephrased"),
            ]
        );
    }

    #[tokio::test]
    async fn edit_assistant_message_fails() {
        let (mut session, _events) = session(vec![Script::Reply(vec!["Response"])]);
        session.send_message("Question", None).await.unwrap();
        let reply = session.store().messages()[1].id;

        let err = session.edit(&reply, "nope").await.unwrap_err();

        assert!(matches!(err, SessionError::NotAUserMessage(_)));
        assert_eq!(session.store().messages().len(), 2);
    }
}
