//! Tool registry
//!
//! An explicit, owned registry. Build it once at startup, call
//! [`ToolRegistry::initialize`], then share it behind an `Arc`; after that it
//! is only read.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{ToolError, ToolHandler, ToolSchema};

struct RegisteredTool {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
    validator: Option<jsonschema::Validator>,
}

/// Set of invocable tools with schema validation and dispatch by name
#[derive(Default)]
pub struct ToolRegistry {
    /// Registration order (also the order schemas are sent upstream)
    tools: Vec<RegisteredTool>,
    /// Name -> position in `tools`
    by_name: HashMap<String, usize>,
    initialized: bool,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its schema name
    ///
    /// Registering a name twice replaces the earlier handler. The registry
    /// must be (re)initialized before the new tool can be dispatched.
    pub fn register<H: ToolHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.register_arc(Arc::new(handler))
    }

    /// Register a shared handler
    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) -> &mut Self {
        let schema = handler.schema();
        let entry = RegisteredTool {
            schema,
            handler,
            validator: None,
        };

        if let Some(&pos) = self.by_name.get(&entry.schema.name) {
            tracing::debug!(tool = %entry.schema.name, "Replacing registered tool");
            self.tools[pos] = entry;
        } else {
            self.by_name
                .insert(entry.schema.name.clone(), self.tools.len());
            self.tools.push(entry);
        }
        self.initialized = false;
        self
    }

    /// Compile argument validators for every registered tool
    ///
    /// Idempotent: tools compiled by an earlier call are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidSchema`] if a tool's parameter schema is not
    /// a valid JSON schema.
    pub fn initialize(&mut self) -> Result<(), ToolError> {
        if self.initialized {
            return Ok(());
        }

        for tool in &mut self.tools {
            if tool.validator.is_some() {
                continue;
            }
            let validator = jsonschema::validator_for(&tool.schema.parameters).map_err(|e| {
                ToolError::InvalidSchema {
                    tool: tool.schema.name.clone(),
                    reason: e.to_string(),
                }
            })?;
            tool.validator = Some(validator);
        }

        self.initialized = true;
        tracing::info!(tools = self.tools.len(), "Tool registry initialized");
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has completed for all tools
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether a tool with this name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Schemas of all tools, in registration order
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    /// Parse, validate and run a tool call
    ///
    /// # Errors
    ///
    /// - [`ToolError::UnknownTool`] if `name` is not registered
    /// - [`ToolError::InvalidArguments`] if `args_json` is not a JSON object or
    ///   fails schema validation (the handler is not run)
    /// - [`ToolError::HandlerFailed`] if the handler returns an error
    pub async fn dispatch(
        &self,
        name: &str,
        args_json: &str,
        user_id: &str,
    ) -> Result<Value, ToolError> {
        let args: Value =
            serde_json::from_str(args_json).map_err(|e| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: format!("not valid JSON ({e})"),
            })?;
        self.dispatch_value(name, args, user_id).await
    }

    /// Like [`dispatch`](Self::dispatch) with already-parsed arguments
    ///
    /// # Errors
    ///
    /// Same as [`dispatch`](Self::dispatch).
    pub async fn dispatch_value(
        &self,
        name: &str,
        args: Value,
        user_id: &str,
    ) -> Result<Value, ToolError> {
        let tool = self
            .by_name
            .get(name)
            .map(|&pos| &self.tools[pos])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        if !args.is_object() {
            return Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: "arguments must be a JSON object".to_string(),
            });
        }

        let validator = tool
            .validator
            .as_ref()
            .ok_or_else(|| ToolError::NotInitialized(name.to_string()))?;

        let violations: Vec<String> = validator.iter_errors(&args).map(|e| e.to_string()).collect();
        if !violations.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: violations.join("; "),
            });
        }

        tracing::debug!(tool = %name, "Dispatching tool");
        tool.handler
            .call(args, user_id)
            .await
            .map_err(|e| ToolError::HandlerFailed {
                tool: name.to_string(),
                message: format!("{e:#}"),
            })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self.tools.iter().map(|t| &t.schema.name).collect::<Vec<_>>(),
            )
            .field("initialized", &self.initialized)
            .finish()
    }
}
