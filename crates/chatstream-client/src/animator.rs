//! Typewriter display animator.
//!
//! Text arrives in bursts from the network; the animator reveals it at a
//! steady rate so the reply appears to be typed. [`DisplayBuffer`] is the
//! synchronous state machine. [`spawn_animator`] runs one inside a tokio task
//! driven by a frame interval and exposes it through an [`AnimatorHandle`]
//! (producer side) and [`AnimatorEvents`] (consumer side).
//!
//! Every event carries the buffer generation. [`AnimatorHandle::reset`]
//! bumps the generation before the task sees the reset, and
//! [`AnimatorEvents`] drops events of older generations, so nothing from a
//! previous reply is delivered once `reset` has returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::AnimatorConfig;
use crate::error::SessionError;

/// Fewest characters revealed by one frame.
pub const MIN_CHARS_PER_FRAME: usize = 1;

/// Most characters revealed by one frame.
pub const MAX_CHARS_PER_FRAME: usize = 5;

// =============================================================================
// Events
// =============================================================================

/// Notification from the animator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimatorEvent {
    /// The visible text changed.
    Update {
        /// Buffer generation.
        generation: u64,
        /// Visible prefix of the reply.
        text: String,
    },
    /// The whole reply is visible and the stream has finished.
    Complete {
        /// Buffer generation.
        generation: u64,
        /// Full reply text.
        text: String,
    },
}

impl AnimatorEvent {
    /// Generation the event belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Update { generation, .. } | Self::Complete { generation, .. } => *generation,
        }
    }

    /// Text carried by the event.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Update { text, .. } | Self::Complete { text, .. } => text,
        }
    }

    /// Whether this is a completion event.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

// =============================================================================
// Display buffer
// =============================================================================

/// Received-versus-shown text of one streamed reply.
///
/// `full_text` only grows until [`reset`](Self::reset). The display index
/// counts characters and never decreases within a generation.
#[derive(Debug, Clone)]
pub struct DisplayBuffer {
    chars_per_second: f64,
    full_text: String,
    /// Byte offset of the end of the visible prefix.
    display_bytes: usize,
    display_chars: usize,
    total_chars: usize,
    is_complete: bool,
    is_active: bool,
    /// Completion already delivered for this generation.
    completed: bool,
    last_tick: Option<Instant>,
    generation: u64,
}

impl DisplayBuffer {
    /// Create an empty buffer revealing `chars_per_second` characters per second.
    #[must_use]
    pub fn new(chars_per_second: f64) -> Self {
        Self {
            chars_per_second,
            full_text: String::new(),
            display_bytes: 0,
            display_chars: 0,
            total_chars: 0,
            is_complete: false,
            is_active: false,
            completed: false,
            last_tick: None,
            generation: 0,
        }
    }

    /// Everything received so far.
    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// The currently visible prefix.
    #[must_use]
    pub fn display_text(&self) -> &str {
        &self.full_text[..self.display_bytes]
    }

    /// Whether the reveal loop is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Whether the producer has finished.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Append received text.
    ///
    /// Returns `true` when this started the reveal loop.
    pub fn add_chunk(&mut self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.full_text.push_str(text);
        self.total_chars += text.chars().count();

        if self.is_active {
            return false;
        }
        self.is_active = true;
        self.last_tick = None;
        true
    }

    /// Advance the reveal by one frame.
    pub fn tick(&mut self, now: Instant) -> Vec<AnimatorEvent> {
        let mut events = Vec::new();
        if !self.is_active {
            return events;
        }

        let elapsed = self
            .last_tick
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_tick = Some(now);

        if self.advance(chars_for_frame(elapsed, self.chars_per_second)) {
            events.push(self.update());
        }

        if self.display_chars >= self.total_chars && self.is_complete {
            self.is_active = false;
            events.extend(self.complete());
        }
        events
    }

    /// Mark the producer as finished.
    ///
    /// With the loop stopped the full text is shown and completion fires
    /// immediately; otherwise the loop completes once it catches up.
    pub fn finish_streaming(&mut self) -> Vec<AnimatorEvent> {
        self.is_complete = true;
        if self.is_active || self.completed {
            return Vec::new();
        }

        self.show_all();
        let mut events = vec![self.update()];
        events.extend(self.complete());
        events
    }

    /// Show everything received so far and stop the loop.
    pub fn skip_to_end(&mut self) -> Vec<AnimatorEvent> {
        self.is_active = false;
        self.show_all();

        let mut events = vec![self.update()];
        if self.is_complete {
            events.extend(self.complete());
        }
        events
    }

    /// Clear all state and start a new generation.
    pub fn reset(&mut self) -> u64 {
        let generation = self.generation + 1;
        *self = Self {
            generation,
            ..Self::new(self.chars_per_second)
        };
        generation
    }

    /// Move the display index forward by up to `chars` characters.
    fn advance(&mut self, chars: usize) -> bool {
        let remaining = &self.full_text[self.display_bytes..];
        let (bytes, count) = match remaining.char_indices().nth(chars) {
            Some((offset, _)) => (offset, chars),
            None => (remaining.len(), self.total_chars - self.display_chars),
        };
        if count == 0 {
            return false;
        }
        self.display_bytes += bytes;
        self.display_chars += count;
        true
    }

    fn show_all(&mut self) {
        self.display_bytes = self.full_text.len();
        self.display_chars = self.total_chars;
    }

    fn update(&self) -> AnimatorEvent {
        AnimatorEvent::Update {
            generation: self.generation,
            text: self.display_text().to_string(),
        }
    }

    fn complete(&mut self) -> Option<AnimatorEvent> {
        if self.completed {
            return None;
        }
        self.completed = true;
        Some(AnimatorEvent::Complete {
            generation: self.generation,
            text: self.full_text.clone(),
        })
    }
}

/// Characters to reveal for a frame that took `elapsed`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn chars_for_frame(elapsed: Duration, chars_per_second: f64) -> usize {
    let raw = (elapsed.as_secs_f64() * chars_per_second).floor();
    if raw.is_finite() && raw > 0.0 {
        (raw.min(MAX_CHARS_PER_FRAME as f64) as usize).max(MIN_CHARS_PER_FRAME)
    } else {
        MIN_CHARS_PER_FRAME
    }
}

// =============================================================================
// Runtime
// =============================================================================

#[derive(Debug)]
enum Command {
    Chunk(String),
    Finish,
    Skip,
    Reset,
}

/// Producer side of a running animator.
#[derive(Debug, Clone)]
pub struct AnimatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    generation: Arc<AtomicU64>,
}

impl AnimatorHandle {
    /// Append received text. Empty text is ignored.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AnimatorClosed` if the task has stopped.
    pub fn add_chunk(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }
        self.send(Command::Chunk(text))
    }

    /// Mark the producer as finished.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AnimatorClosed` if the task has stopped.
    pub fn finish_streaming(&self) -> Result<(), SessionError> {
        self.send(Command::Finish)
    }

    /// Reveal everything received so far.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AnimatorClosed` if the task has stopped.
    pub fn skip_to_end(&self) -> Result<(), SessionError> {
        self.send(Command::Skip)
    }

    /// Discard the current reply and start a new generation.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AnimatorClosed` if the task has stopped.
    pub fn reset(&self) -> Result<(), SessionError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(generation, "Animator reset");
        self.send(Command::Reset)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::AnimatorClosed)
    }
}

/// Consumer side of a running animator.
#[derive(Debug)]
pub struct AnimatorEvents {
    events: mpsc::UnboundedReceiver<AnimatorEvent>,
    generation: Arc<AtomicU64>,
}

impl AnimatorEvents {
    /// Wait for the next event of the current generation.
    ///
    /// Returns `None` once the animator task has stopped.
    pub async fn recv(&mut self) -> Option<AnimatorEvent> {
        loop {
            let event = self.events.recv().await?;
            if self.is_current(&event) {
                return Some(event);
            }
        }
    }

    /// Take the next pending event of the current generation, if any.
    pub fn try_recv(&mut self) -> Option<AnimatorEvent> {
        while let Ok(event) = self.events.try_recv() {
            if self.is_current(&event) {
                return Some(event);
            }
        }
        None
    }

    fn is_current(&self, event: &AnimatorEvent) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        if event.generation() == current {
            true
        } else {
            tracing::trace!(
                event_generation = event.generation(),
                current,
                "Dropping stale animator event"
            );
            false
        }
    }
}

/// Spawn an animator task.
///
/// The task runs until every [`AnimatorHandle`] clone is dropped. Must be
/// called from within a tokio runtime.
#[must_use]
pub fn spawn_animator(config: AnimatorConfig) -> (AnimatorHandle, AnimatorEvents) {
    let config = config.sanitized();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let generation = Arc::new(AtomicU64::new(0));

    tokio::spawn(run_animator(
        DisplayBuffer::new(config.chars_per_second),
        config.frame_interval(),
        command_rx,
        event_tx,
    ));

    (
        AnimatorHandle {
            commands: command_tx,
            generation: Arc::clone(&generation),
        },
        AnimatorEvents {
            events: event_rx,
            generation,
        },
    )
}

/// Task that owns the buffer and paces the reveal.
async fn run_animator(
    mut buffer: DisplayBuffer,
    frame_interval: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<AnimatorEvent>,
) {
    let mut frames = tokio::time::interval(frame_interval);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let emitted = tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Chunk(text)) => {
                    if buffer.add_chunk(&text) {
                        frames.reset_immediately();
                    }
                    Vec::new()
                }
                Some(Command::Finish) => buffer.finish_streaming(),
                Some(Command::Skip) => buffer.skip_to_end(),
                Some(Command::Reset) => {
                    buffer.reset();
                    Vec::new()
                }
                None => break,
            },
            now = frames.tick(), if buffer.is_active() => buffer.tick(now),
        };

        for event in emitted {
            if event.is_complete() {
                tracing::debug!(
                    generation = event.generation(),
                    chars = event.text().chars().count(),
                    "Animation complete"
                );
            }
            // A dropped receiver only means nobody is watching.
            let _ = events.send(event);
        }
    }

    tracing::debug!("Animator task stopped");
}
