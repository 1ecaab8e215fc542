//! Interactive shell state and command handling.

use std::future::Future;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use chatstream_client::{
    AbortHandle, AnimatorEvent, AnimatorEvents, AnimatorHandle, ChatSession, CompletionBackend,
    SessionError, TurnOutcome, FALLBACK_MESSAGE,
};
use chatstream_core::limits::{mime_type_for_extension, validate_attachment, MAX_ATTACHMENTS};
use chatstream_core::{FileAttachment, MessageId};
use tokio::io::{AsyncBufRead, Lines};

use crate::commands::{Command, HELP};
use crate::render::{self, Renderer};

/// Whether the shell keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Exit.
    Quit,
}

/// The interactive shell.
pub struct App<B> {
    session: ChatSession<B>,
    events: AnimatorEvents,
    renderer: Renderer,
    /// Files attached to the next message.
    pending: Vec<FileAttachment>,
}

impl<B: CompletionBackend> App<B> {
    /// Create a shell over a session and its animator events.
    pub fn new(session: ChatSession<B>, events: AnimatorEvents) -> Self {
        Self {
            session,
            events,
            renderer: Renderer::new(),
            pending: Vec::new(),
        }
    }

    /// Run one command.
    ///
    /// `input` is read while a reply streams so `/skip` works mid-turn.
    ///
    /// # Errors
    ///
    /// Returns an error for commands that cannot be carried out; the shell
    /// reports it and keeps running.
    pub async fn handle<R>(&mut self, command: Command, input: &mut Lines<R>) -> anyhow::Result<Flow>
    where
        R: AsyncBufRead + Unpin,
    {
        match command {
            Command::Say(text) => {
                let attachments = (!self.pending.is_empty()).then(|| std::mem::take(&mut self.pending));
                let animator = self.session.animator().clone();
                let abort = self.session.abort_handle();
                let turn = self.session.send_message(&text, attachments);
                drive_turn(turn, &mut self.events, &mut self.renderer, &animator, &abort, input).await?;
            }
            Command::Retry(index) => {
                let id = self.message_id(index)?;
                let animator = self.session.animator().clone();
                let abort = self.session.abort_handle();
                let turn = self.session.retry(&id);
                drive_turn(turn, &mut self.events, &mut self.renderer, &animator, &abort, input).await?;
            }
            Command::Edit { index, text } => {
                let id = self.message_id(index)?;
                let animator = self.session.animator().clone();
                let abort = self.session.abort_handle();
                let turn = self.session.edit(&id, &text);
                drive_turn(turn, &mut self.events, &mut self.renderer, &animator, &abort, input).await?;
            }
            Command::New => {
                self.session.store_mut().create_conversation();
                println!("Started a new conversation.");
            }
            Command::Switch(index) => {
                let id = self
                    .session
                    .store()
                    .conversations()
                    .get(index - 1)
                    .map(|c| c.id)
                    .with_context(|| format!("no conversation {index}"))?;
                self.session.store_mut().switch_conversation(id)?;
                println!("{}", render::history(self.session.store().messages()));
            }
            Command::List => {
                let store = self.session.store();
                println!(
                    "{}",
                    render::conversation_list(store.conversations(), store.current_conversation())
                );
            }
            Command::History => println!("{}", render::history(self.session.store().messages())),
            Command::Attach(path) => self.attach(&path).await?,
            Command::Detach => {
                self.pending.clear();
                println!("Attachments cleared.");
            }
            Command::Skip => println!("Nothing is being typed."),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Id of message number `index` in the active conversation.
    fn message_id(&self, index: usize) -> anyhow::Result<MessageId> {
        self.session
            .store()
            .messages()
            .get(index - 1)
            .map(|m| m.id)
            .with_context(|| format!("no message {index} (see /history)"))
    }

    async fn attach(&mut self, path: &Path) -> anyhow::Result<()> {
        if self.pending.len() >= MAX_ATTACHMENTS {
            bail!("at most {MAX_ATTACHMENTS} files can be attached");
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("not a file path: {}", path.display()))?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let mime_type = mime_type_for_extension(extension)
            .with_context(|| format!("unsupported file type: {name}"))?;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let attachment = FileAttachment::from_bytes(name, mime_type, &bytes);
        validate_attachment(&attachment)?;

        tracing::debug!(name = %attachment.name, size = attachment.size_bytes, "File attached");
        println!(
            "Attached {} ({}, {} bytes). It will be sent with your next message.",
            attachment.name, attachment.mime_type, attachment.size_bytes
        );
        self.pending.push(attachment);
        Ok(())
    }
}

/// Run a turn while rendering the animation.
///
/// While the reply streams, Ctrl-C aborts it and a `/skip` line reveals the
/// text received so far. Once the stream has ended, the animation is played
/// out; Ctrl-C or `/skip` then jump to the end.
async fn drive_turn<F, R>(
    turn: F,
    events: &mut AnimatorEvents,
    renderer: &mut Renderer,
    animator: &AnimatorHandle,
    abort: &AbortHandle,
    input: &mut Lines<R>,
) -> anyhow::Result<()>
where
    F: Future<Output = Result<TurnOutcome, SessionError>>,
    R: AsyncBufRead + Unpin,
{
    tokio::pin!(turn);
    print!("{}: ", render::role_label(chatstream_core::Role::Assistant));
    flush();

    // Cleared at end of input so a closed stdin is not polled again.
    let mut input_open = true;
    let mut revealed = false;

    // Input and animator failures are logged; the turn is always polled to
    // completion.
    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome?,
            Some(event) = events.recv() => revealed |= show(renderer, &event),
            line = input.next_line(), if input_open => match line {
                Ok(Some(line)) if line.trim() == "/skip" => skip(animator),
                Ok(Some(_)) => eprintln!("(still replying: /skip to reveal, Ctrl-C to stop)"),
                Ok(None) => input_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read input");
                    input_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => abort.abort(),
        }
    };

    match outcome {
        TurnOutcome::Completed { .. } if revealed => {}
        TurnOutcome::Completed { .. } => loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if show(renderer, &event) {
                            break;
                        }
                    }
                    None => break,
                },
                line = input.next_line(), if input_open => match line {
                    Ok(Some(line)) if line.trim() == "/skip" => skip(animator),
                    Ok(Some(_)) => {}
                    Ok(None) => input_open = false,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read input");
                        input_open = false;
                    }
                },
                _ = tokio::signal::ctrl_c() => skip(animator),
            }
        },
        TurnOutcome::Failed { reason, .. } => {
            tracing::warn!(error = %reason, "Reply failed");
            println!("\n{FALLBACK_MESSAGE}");
        }
    }
    Ok(())
}

fn skip(animator: &AnimatorHandle) {
    if let Err(e) = animator.skip_to_end() {
        tracing::warn!(error = %e, "Could not skip animation");
    }
}

/// Print an animator event. Returns `true` on completion.
fn show(renderer: &mut Renderer, event: &AnimatorEvent) -> bool {
    print!("{}", renderer.apply(event));
    if event.is_complete() {
        println!();
        true
    } else {
        flush();
        false
    }
}

fn flush() {
    let _ = std::io::stdout().flush();
}
