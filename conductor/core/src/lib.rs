//! Chat Conductor Core - Streaming Tool-Call Orchestration
//!
//! This crate sits between a chat client and an OpenAI-style completion API
//! that streams its output and may request tool invocations mid-stream. It
//! turns the raw server-sent event stream into one ordered sequence of
//! downstream events: text tokens interleaved with tool results.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Transport layer                           │
//! │          StreamingRequest (in)        EventEnvelope (out)         │
//! └──────────────────┬──────────────────────────────▲────────────────┘
//!                    │                              │ bounded mpsc
//! ┌──────────────────┼──────────────────────────────┼────────────────┐
//! │                  ▼          CONDUCTOR CORE      │                │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                    StreamingSession                         │  │
//! │  │  ┌─────────────┐  ┌──────────────────┐  ┌───────────────┐  │  │
//! │  │  │StreamDecoder│─▶│ToolCallAccumulator│─▶│RealTimeTool   │  │  │
//! │  │  │ (SSE lines) │  │ (per-index bufs)  │  │Executor       │  │  │
//! │  │  └──────▲──────┘  └──────────────────┘  └──────┬────────┘  │  │
//! │  └─────────┼──────────────────────────────────────┼───────────┘  │
//! │            │ bytes                                 │ dispatch     │
//! │   ┌────────┴─────────┐                    ┌───────▼────────┐     │
//! │   │CompletionBackend │                    │  ToolRegistry  │     │
//! │   │ (OpenAI-style)   │                    │ (shared, Arc)  │     │
//! │   └──────────────────┘                    └────────────────┘     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use chat_conductor_core::{Conductor, OpenAiBackend, StreamingRequest, ToolRegistry};
//!
//! let config = chat_conductor_core::load_config()?;
//! let backend = OpenAiBackend::from_config(&config.upstream)?;
//! let mut registry = ToolRegistry::new();
//! registry.register(MyInsightTool::default());
//!
//! let conductor = Conductor::new(backend, registry, config)?;
//! let (mut rx, handle) = conductor.handle_request(request);
//! while let Some(envelope) = rx.recv().await {
//!     // forward to the client
//! }
//! let outcome = handle.await?;
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: upstream completion API abstraction and the OpenAI-style client
//! - [`conductor`]: shared per-process state, spawns one session per request
//! - [`config`]: TOML / environment / CLI configuration
//! - [`context`]: prompt builder and mode classifier collaborators
//! - [`messages`]: downstream event protocol
//! - [`request`]: inbound request model
//! - [`streaming`]: decoder, accumulator, executor and the session state machine
//! - [`tools`]: tool registry and handler contract

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod context;
pub mod messages;
pub mod request;
pub mod streaming;
pub mod tools;

// Re-exports for convenience
pub use backend::{
    BackendError, ChatMessage, CompletionBackend, CompletionRequest, CompletionResponse,
    OpenAiBackend,
};
pub use conductor::Conductor;
pub use config::{
    default_config_path, load_config, load_config_from_path, ConductorConfig, ConductorToml,
    ConfigError, ConfigOverrides, ConfigSource, FallbackFailurePolicy, RetryConfig,
    StreamingConfig, UpstreamConfig,
};
pub use context::{
    ContextBuilder, KeywordModeClassifier, ModeClassifier, TemplateContextBuilder, UserContext,
};
pub use messages::{DownstreamEvent, EventEnvelope, MessageId, MessageRole, SessionId};
pub use request::{HistoryEntry, RequestContext, StreamingRequest};
pub use streaming::{
    ConsumedSet, PreparedCall, RealTimeToolExecutor, RemainingCalls, SessionConfig, SessionDeps,
    SessionError, SessionOutcome, SessionState, StreamDecoder, StreamingSession,
    ToolCallAccumulator, ToolCallBuffer, ToolCallDelta, ToolExecutionResult, UpstreamEvent,
};
pub use tools::{ToolError, ToolHandler, ToolRegistry, ToolSchema};
