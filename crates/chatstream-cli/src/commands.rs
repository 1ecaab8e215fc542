//! Shell input parsing.
//!
//! Lines starting with `/` are commands; anything else is sent as a message.
//! Message numbers are 1-based, as printed by `/history`.

use std::path::PathBuf;

use thiserror::Error;

/// A parsed line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a message.
    Say(String),
    /// Regenerate the reply to message `n`.
    Retry(usize),
    /// Replace user message `index` with `text`.
    Edit {
        /// Message number.
        index: usize,
        /// New content.
        text: String,
    },
    /// Start a new conversation.
    New,
    /// Activate conversation `n` from `/list`.
    Switch(usize),
    /// List conversations.
    List,
    /// Print the active conversation.
    History,
    /// Attach a file to the next message.
    Attach(PathBuf),
    /// Drop pending attachments.
    Detach,
    /// Reveal the rest of the current reply.
    Skip,
    /// Print help.
    Help,
    /// Exit.
    Quit,
}

/// Input that is not a valid command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The command name is not known.
    #[error("unknown command: /{0} (try /help)")]
    UnknownCommand(String),

    /// A required argument is missing.
    #[error("/{command} needs {argument}")]
    MissingArgument {
        /// Command name.
        command: &'static str,
        /// Description of the argument.
        argument: &'static str,
    },

    /// A message or conversation number is not a positive integer.
    #[error("not a valid number: {0}")]
    InvalidIndex(String),
}

/// Help text printed by `/help`.
pub const HELP: &str = "\
Type a message and press Enter to send it.

  /retry <n>         regenerate the reply to message n
  /edit <n> <text>   replace user message n and regenerate
  /new               start a new conversation
  /list              list conversations
  /switch <n>        switch to conversation n
  /history           show the active conversation
  /attach <path>     attach a file to the next message
  /detach            drop pending attachments
  /skip              reveal the rest of the reply being typed
  /help              show this help
  /quit              exit

Ctrl-C stops a reply that is still streaming.";

/// Parse one line of input. Blank lines yield `None`.
///
/// # Errors
///
/// Returns a `ParseError` for unknown commands or bad arguments.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "retry" => Command::Retry(index("retry", args)?),
        "edit" => {
            let (number, text) = args.split_once(char::is_whitespace).ok_or(
                ParseError::MissingArgument {
                    command: "edit",
                    argument: "a message number and the new text",
                },
            )?;
            Command::Edit {
                index: index("edit", number)?,
                text: text.trim().to_string(),
            }
        }
        "new" => Command::New,
        "switch" => Command::Switch(index("switch", args)?),
        "list" => Command::List,
        "history" => Command::History,
        "attach" => {
            if args.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "attach",
                    argument: "a file path",
                });
            }
            Command::Attach(PathBuf::from(args))
        }
        "detach" => Command::Detach,
        "skip" => Command::Skip,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn index(command: &'static str, arg: &str) -> Result<usize, ParseError> {
    if arg.is_empty() {
        return Err(ParseError::MissingArgument {
            command,
            argument: "a number",
        });
    }
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::InvalidIndex(arg.to_string())),
    }
}
