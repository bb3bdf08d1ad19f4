//! Downstream Messages
//!
//! Events sent from a streaming session to the connected client. These are the
//! only things the transport layer ever forwards: the session decides what the
//! client sees and in which order.
//!
//! # Wire Shape
//!
//! Every event travels inside an [`EventEnvelope`] carrying the session and
//! message identifiers plus a millisecond timestamp. The event itself is
//! flattened into the envelope under a `type` tag:
//!
//! ```json
//! {"sessionId":"s-1","messageId":"m-1","timestamp":1700000000000,
//!  "type":"token","chunkIndex":1,"text":"Hello"}
//! ```
//!
//! Every request produces `start` first and exactly one terminal event
//! (`done` or `error`) last.

use serde::{Deserialize, Serialize};

/// Events from a streaming session to the client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DownstreamEvent {
    /// The session accepted the request and is about to call the model
    Start,

    /// A text token
    Token {
        /// Per-request sequence number, starting at 1
        chunk_index: u32,
        /// The token text
        text: String,
    },

    /// A tool is about to run with these (already resolved) arguments
    ToolCall {
        /// Registered tool name
        tool_name: String,
        /// Arguments as a JSON object string
        args_json: String,
    },

    /// A tool finished successfully
    ToolResult {
        /// Registered tool name
        tool_name: String,
        /// Value returned by the handler
        result: serde_json::Value,
    },

    /// A tool could not run or failed while running
    ToolError {
        /// Tool name as requested by the model
        tool_name: String,
        /// Short description safe to show to the user
        error: String,
    },

    /// The request failed (terminal)
    Error {
        /// Short, non-technical message suitable for direct display
        message: String,
    },

    /// The request completed (terminal)
    Done {
        /// Number of token events emitted for this request
        total_chunks: u32,
    },
}

impl DownstreamEvent {
    /// Whether this event ends the request
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Short name of the event kind (matches the serialized `type` tag)
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Token { .. } => "token",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

/// A downstream event tagged with its request identity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Conversation session the event belongs to
    pub session_id: SessionId,
    /// Message (request) the event belongs to
    pub message_id: MessageId,
    /// Emission time (Unix timestamp ms)
    pub timestamp: i64,
    /// The event
    #[serde(flatten)]
    pub event: DownstreamEvent,
}

impl EventEnvelope {
    /// Wrap an event, stamping it with the current time
    #[must_use]
    pub fn new(session_id: SessionId, message_id: MessageId, event: DownstreamEvent) -> Self {
        Self {
            session_id,
            message_id,
            timestamp: now_ms(),
            event,
        }
    }
}

/// Message identifier (one per client request)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    ///
    /// Uses an atomic counter combined with timestamp to ensure uniqueness
    /// even when multiple sessions are created in the same millisecond.
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("session_{}_{count}", now_ms()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a conversation message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt
    System,
    /// End user
    User,
    /// The model
    Assistant,
    /// Result of a tool invocation
    Tool,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Current Unix time in milliseconds
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
