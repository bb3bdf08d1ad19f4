//! Chat Conductor - Command-Line Runner
//!
//! Answers one streaming request against an OpenAI-style upstream and prints
//! every downstream event as a JSON line on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Request from a file
//! chat-conductor --request turn.json
//!
//! # Request on stdin, custom upstream
//! echo '{"userId":"...","userMessage":"hi","sessionId":"s","messageId":"m"}' \
//!     | chat-conductor --base-url http://localhost:11434/v1 --model llama3.1
//!
//! # Quick one-off message
//! chat-conductor --message "I felt proud today" --user-id 7c9e6679-7425-40de-944b-e07fc1f90ae7
//!
//! # Verbose logging
//! RUST_LOG=debug chat-conductor --request turn.json
//! ```
//!
//! Ctrl-C while a response is streaming cancels the session.

mod journal;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use chat_conductor_core::{
    load_config_from_path, default_config_path, Conductor, ConfigOverrides, FallbackFailurePolicy,
    MessageId, OpenAiBackend, SessionId, SessionOutcome, StreamingRequest, ToolRegistry,
};
use journal::{default_journal_path, Journal, JournalContextBuilder, LogMoodTool, StoreInsightTool};

/// Chat Conductor - streaming tool-call orchestration
#[derive(Parser, Debug)]
#[command(name = "chat-conductor")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CONDUCTOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON request file (reads stdin when neither this nor --message is given)
    #[arg(short = 'r', long, value_name = "FILE", conflicts_with = "message")]
    request: Option<PathBuf>,

    /// Plain user message to send instead of a JSON request
    #[arg(short = 'm', long)]
    message: Option<String>,

    /// User id for --message
    #[arg(long, env = "CONDUCTOR_USER_ID", default_value = "local-user-00000000")]
    user_id: String,

    /// Override the upstream model
    #[arg(long)]
    model: Option<String>,

    /// Override the upstream base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Override the post-stream tool failure policy (fail_fast, isolate)
    #[arg(long, value_name = "POLICY")]
    fallback_policy: Option<FallbackFailurePolicy>,

    /// Journal file (JSON lines); defaults to the user data directory
    #[arg(long, env = "CONDUCTOR_JOURNAL", value_name = "FILE")]
    journal: Option<PathBuf>,

    /// Keep the journal in memory only
    #[arg(long, conflicts_with = "journal")]
    no_journal_file: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CONDUCTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "chat_conductor={level},chat_conductor_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Read the request from --message, --request or stdin
fn read_request(args: &Args) -> Result<StreamingRequest> {
    if let Some(ref message) = args.message {
        return Ok(StreamingRequest::new(
            args.user_id.clone(),
            message.clone(),
            SessionId::new(),
            MessageId::new(),
        ));
    }

    let raw = match args.request {
        Some(ref path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {path:?}"))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read request from stdin")?;
            raw
        }
    };

    serde_json::from_str(&raw).context("Request is not a valid streaming request")
}

async fn open_journal(args: &Args) -> Result<Journal> {
    if args.no_journal_file {
        return Ok(Journal::new());
    }
    match args.journal.clone().or_else(default_journal_path) {
        Some(path) => Journal::open(&path).await,
        None => {
            warn!("No data directory found, journal kept in memory");
            Ok(Journal::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Chat Conductor starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref model) = args.model {
        overrides = overrides.with_model(model.clone());
    }
    if let Some(ref url) = args.base_url {
        overrides = overrides.with_base_url(url.clone());
    }
    if let Some(policy) = args.fallback_policy {
        overrides = overrides.with_fallback_failure_policy(policy);
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        base_url = %config.upstream.base_url,
        model = %config.upstream.model,
        source = ?config.source(),
        "Configuration loaded"
    );

    let request = read_request(&args)?;
    let journal = open_journal(&args).await?;

    let mut registry = ToolRegistry::new();
    registry
        .register(StoreInsightTool::new(journal.clone()))
        .register(LogMoodTool::new(journal.clone()));

    let backend = OpenAiBackend::from_config(&config.upstream)
        .context("Failed to create upstream client")?;
    let conductor = Conductor::new(backend, registry, config)
        .context("Failed to initialize tools")?
        .with_context_builder(JournalContextBuilder::new(journal));

    let (rx, handle) = conductor.handle_request(request);
    let mut events = ReceiverStream::new(rx);
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            next = events.next() => {
                let Some(envelope) = next else { break };
                let mut line = serde_json::to_vec(&envelope)?;
                line.push(b'\n');
                stdout.write_all(&line).await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling session");
                // Dropping the receiver cancels the session
                break;
            }
        }
    }
    drop(events);

    let outcome = handle.await.context("Session task failed")?;
    match outcome {
        SessionOutcome::Done { total_chunks } => {
            info!(total_chunks, "Session complete");
            Ok(())
        }
        SessionOutcome::Error { message } => {
            error!(message = %message, "Session ended with an error");
            std::process::exit(1);
        }
        SessionOutcome::Cancelled => {
            warn!("Session cancelled");
            std::process::exit(130);
        }
    }
}
