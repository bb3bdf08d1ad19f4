//! Upstream Completion Backend
//!
//! Abstracted access to the completion API through a common trait.
//!
//! # Available Backends
//!
//! - **OpenAI-style**: any server exposing `POST /chat/completions` with
//!   server-sent-event streaming (OpenAI, vLLM, llama.cpp server, Ollama's
//!   OpenAI endpoint)
//!
//! # Usage
//!
//! ```ignore
//! use chat_conductor_core::backend::{CompletionBackend, CompletionRequest, OpenAiBackend};
//!
//! let backend = OpenAiBackend::new("https://api.openai.com/v1", Some(key))?;
//! let mut body = backend.open_stream(&request).await?;
//! while let Some(chunk) = body.next().await { /* feed the decoder */ }
//! ```

mod openai;
mod traits;

pub use openai::OpenAiBackend;
pub use traits::{
    BackendError, ByteStream, ChatMessage, CompletionBackend, CompletionRequest,
    CompletionResponse, FunctionCall, ToolCallRecord, ToolDefinition,
};
