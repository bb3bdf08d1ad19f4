//! Completion Backend Traits
//!
//! Trait definitions for the upstream completion API. The session only needs
//! two calls: open a streaming completion (raw bytes, decoded by the session)
//! and run a one-shot completion for the post-tool follow-up.
//!
//! The request types mirror the OpenAI chat-completions wire format so they
//! can be serialized straight into the HTTP body.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::ToolSchema;

/// Raw body of a streaming completion
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// Errors talking to the upstream completion API
#[derive(Debug, Error)]
pub enum BackendError {
    /// Upstream answered with a non-2xx status
    #[error("upstream returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (for logs only)
        body: String,
    },

    /// Connection or transfer failure
    #[error("network error: {0}")]
    Network(String),

    /// Request did not finish within its budget
    #[error("upstream request timed out")]
    Timeout,

    /// Response body was not what we expected
    #[error("could not decode upstream response: {0}")]
    Decode(String),

    /// Client could not be built (bad base URL, TLS setup, ...)
    #[error("backend configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// HTTP status, if the upstream answered at all
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure happened before any HTTP status was received
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// One message in a completion request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant` or `tool`
    pub role: String,
    /// Text content (absent on assistant turns that only call tools)
    pub content: Option<String>,
    /// Tool calls made by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Which call a `tool` message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Plain text message
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// System prompt
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// User turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Assistant turn carrying tool calls (and any text streamed before them)
    #[must_use]
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRecord>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Result of one tool call
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool call as recorded in an assistant message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Call id
    pub id: String,
    /// Always `function`
    #[serde(rename = "type")]
    pub kind: String,
    /// Function name and arguments
    pub function: FunctionCall,
}

impl ToolCallRecord {
    /// Function call record
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function name and JSON argument string
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Tool name
    pub name: String,
    /// Arguments as a JSON string
    pub arguments: String,
}

/// Tool advertised to the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always `function`
    #[serde(rename = "type")]
    pub kind: String,
    /// Schema of the function
    pub function: ToolSchema,
}

impl From<ToolSchema> for ToolDefinition {
    fn from(schema: ToolSchema) -> Self {
        Self {
            kind: "function".to_string(),
            function: schema,
        }
    }
}

/// Body of a chat-completions request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// Conversation, system prompt first
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// `auto` when tools are present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Whether to stream
    pub stream: bool,
}

impl CompletionRequest {
    /// Request with no tools, non-streaming
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            temperature: crate::request::DEFAULT_TEMPERATURE,
            stream: false,
        }
    }

    /// Advertise tools (sets `tool_choice` to `auto` when non-empty)
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tool_choice = if tools.is_empty() {
            None
        } else {
            Some("auto".to_string())
        };
        self.tools = tools.into_iter().map(ToolDefinition::from).collect();
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Response from a non-streaming completion
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionResponse {
    /// Assistant text (empty if the model returned none)
    pub content: String,
    /// Model that answered
    pub model: Option<String>,
    /// Why generation stopped
    pub finish_reason: Option<String>,
}

/// Upstream completion API
///
/// Implement this trait to talk to a different provider, or to script
/// responses in tests.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Open a streaming completion
    ///
    /// Returns once the response status is known. Non-2xx statuses are
    /// returned as [`BackendError::Status`]; the body is streamed otherwise.
    async fn open_stream(&self, request: &CompletionRequest) -> Result<ByteStream, BackendError>;

    /// Run a non-streaming completion
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, BackendError>;
}
