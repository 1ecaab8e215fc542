//! chatstream - a terminal chat client with typewriter-paced streaming.
//!
//! This is the entry point for the `chatstream` binary.

mod app;
mod commands;
mod render;

use std::io::Write;

use chatstream_client::{spawn_animator, AnimatorConfig, ApiFormat, ChatSession, ClientConfig, ProxyClient};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use app::{App, Flow};

/// chatstream - chat with a streaming completion endpoint.
#[derive(Parser, Debug)]
#[command(name = "chatstream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL requests are posted to.
    #[arg(
        long,
        env = "CHATSTREAM_ENDPOINT",
        default_value = "https://openrouter.ai/api/v1/chat/completions"
    )]
    endpoint: String,

    /// Bearer token for the endpoint.
    #[arg(long, env = "CHATSTREAM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name (openai format).
    #[arg(long, env = "CHATSTREAM_MODEL", default_value = "anthropic/claude-3-haiku")]
    model: String,

    /// Completion token limit (openai format).
    #[arg(long, env = "CHATSTREAM_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: u32,

    /// System prompt (openai format).
    #[arg(long, env = "CHATSTREAM_SYSTEM_PROMPT")]
    system_prompt: Option<String>,

    /// Request body shape.
    #[arg(long, env = "CHATSTREAM_FORMAT", value_enum, default_value_t = Format::Openai)]
    format: Format,

    /// Typing speed in characters per second.
    #[arg(long, env = "CHATSTREAM_CHARS_PER_SECOND", default_value_t = 80.0)]
    chars_per_second: f64,

    /// Whole-request timeout in seconds.
    #[arg(long, env = "CHATSTREAM_TIMEOUT")]
    timeout: Option<u64>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,
}

/// Request body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// `{ "messages": [...] }` for a chat proxy.
    Proxy,
    /// OpenAI-compatible `chat/completions`.
    Openai,
}

impl From<Format> for ApiFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Proxy => Self::Proxy,
            Format::Openai => Self::OpenAi,
        }
    }
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone(),
            format: self.format.into(),
            request_timeout_seconds: self.timeout,
            ..ClientConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        EnvFilter::new("chatstream_cli=debug,chatstream_client=debug,chatstream_core=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Create session
    let client = ProxyClient::new(args.client_config())?;
    tracing::debug!(
        endpoint = %client.config().endpoint,
        format = ?client.config().format,
        model = %client.config().model,
        "Starting chat shell"
    );
    let (animator, events) = spawn_animator(AnimatorConfig::with_rate(args.chars_per_second));
    let session = ChatSession::new(client, animator);
    let mut app = App::new(session, events);

    println!("chatstream - type /help for commands, /quit to exit.");

    // Run the shell
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you: ");
        let _ = std::io::stdout().flush();

        let Some(line) = input.next_line().await? else {
            println!();
            break;
        };

        let command = match commands::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match app.handle(command, &mut input).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => eprintln!("error: {e:#}"),
        }
    }

    Ok(())
}
