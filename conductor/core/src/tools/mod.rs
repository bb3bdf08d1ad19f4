//! Tool Registry and Handler Contract
//!
//! Tools are developer-defined side-effecting functions the model can ask for
//! mid-stream ("store an insight", "log a mood score"). This module owns the
//! set of registered tools, their argument schemas, and dispatch by name.
//!
//! # Usage
//!
//! ```ignore
//! use chat_conductor_core::tools::{ToolRegistry, ToolHandler, ToolSchema};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(StoreInsight::new(store.clone()));
//! registry.initialize()?;
//!
//! let registry = Arc::new(registry); // shared read-only across requests
//! let value = registry.dispatch("storeInsight", r#"{"text":"..."}"#, user_id).await?;
//! ```

mod registry;
mod user_id;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registry::ToolRegistry;
pub use user_id::{is_placeholder_user_id, resolve_user_id, MIN_USER_ID_LEN, USER_ID_FIELD};

/// Name, description and JSON schema of a tool's arguments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Name the model uses to call the tool
    pub name: String,
    /// What the tool does, shown to the model
    pub description: String,
    /// JSON schema for the argument object
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Create a schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool implementation
///
/// Handlers are opaque to the core: they may perform I/O and may fail. The
/// argument object always carries a `userId` field matching `user_id`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Schema advertised to the model and used to validate arguments
    fn schema(&self) -> ToolSchema;

    /// Run the tool
    async fn call(&self, args: serde_json::Value, user_id: &str)
        -> anyhow::Result<serde_json::Value>;
}

/// Errors raised by [`ToolRegistry`]
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under this name
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments are not a JSON object or violate the tool's schema
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments {
        /// Tool name
        tool: String,
        /// What was wrong
        reason: String,
    },

    /// The handler itself returned an error
    #[error("tool {tool} failed: {message}")]
    HandlerFailed {
        /// Tool name
        tool: String,
        /// Handler error, including its cause chain
        message: String,
    },

    /// A registered schema could not be compiled
    #[error("invalid schema for tool {tool}: {reason}")]
    InvalidSchema {
        /// Tool name
        tool: String,
        /// Compiler error
        reason: String,
    },

    /// `dispatch` was called before `initialize`
    #[error("tool registry not initialized (tool {0})")]
    NotInitialized(String),
}

impl ToolError {
    /// Kind of failure, for policy decisions
    #[must_use]
    pub fn kind(&self) -> ToolFailureKind {
        match self {
            Self::UnknownTool(_) => ToolFailureKind::UnknownTool,
            Self::InvalidArguments { .. } => ToolFailureKind::InvalidArguments,
            Self::HandlerFailed { .. } => ToolFailureKind::Handler,
            Self::InvalidSchema { .. } | Self::NotInitialized(_) => ToolFailureKind::Registry,
        }
    }

    /// Message that may be shown to the end user
    ///
    /// Handler and registry internals stay in the logs.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::UnknownTool(name) => format!("Unknown tool '{name}'"),
            Self::InvalidArguments { reason, .. } => format!("Invalid arguments: {reason}"),
            Self::HandlerFailed { .. } => "The tool could not complete this action".to_string(),
            Self::InvalidSchema { .. } | Self::NotInitialized(_) => {
                "This tool is not available right now".to_string()
            }
        }
    }
}

/// Coarse classification of a tool failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolFailureKind {
    /// Name not registered
    UnknownTool,
    /// Arguments rejected before the handler ran
    InvalidArguments,
    /// Handler ran and failed
    Handler,
    /// Registry misconfiguration
    Registry,
}
