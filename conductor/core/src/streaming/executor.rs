//! Real-time tool execution
//!
//! Wraps the accumulator with a consumed set so every tool call runs at most
//! once, whether it completed mid-stream or is picked up after the stream
//! ended. Built fresh for every request.
//!
//! Execution is split into two steps so the session can announce a call
//! (with the resolved `userId`) before it runs:
//!
//! ```ignore
//! executor.apply_deltas(&deltas);
//! for call in executor.prepare_ready() {   // marks consumed
//!     emit(tool_call(&call));
//!     let result = executor.execute(&call).await;
//!     emit(tool_result_or_error(&result));
//! }
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};

use super::accumulator::{ConsumedSet, ToolCallAccumulator, ToolCallBuffer};
use super::types::ToolCallDelta;
use crate::messages::now_ms;
use crate::tools::{resolve_user_id, ToolFailureKind, ToolRegistry};

/// A tool call whose arguments parsed and whose `userId` is resolved
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedCall {
    /// Position in the tool-call array
    pub index: usize,
    /// Upstream id, or a generated one if the upstream never sent it
    pub call_id: String,
    /// Tool name
    pub tool_name: String,
    /// Arguments with the authenticated `userId`
    pub arguments: Map<String, Value>,
}

impl PreparedCall {
    /// Arguments serialized as a JSON object string
    #[must_use]
    pub fn args_json(&self) -> String {
        Value::Object(self.arguments.clone()).to_string()
    }
}

/// Outcome of one tool execution
#[derive(Clone, Debug, PartialEq)]
pub struct ToolExecutionResult {
    /// Call id echoed in the follow-up request
    pub tool_call_id: String,
    /// Tool name
    pub tool_name: String,
    /// Arguments the tool ran with
    pub arguments: Value,
    /// Whether the handler returned a value
    pub success: bool,
    /// Handler result when successful
    pub result: Option<Value>,
    /// User-safe error message when not
    pub error: Option<String>,
    /// Failure classification when not successful
    pub failure: Option<ToolFailureKind>,
    /// Completion time (Unix timestamp ms)
    pub timestamp_ms: i64,
}

impl ToolExecutionResult {
    /// Whether the handler itself failed (as opposed to the call being rejected)
    #[must_use]
    pub fn is_handler_failure(&self) -> bool {
        matches!(
            self.failure,
            Some(ToolFailureKind::Handler | ToolFailureKind::Registry)
        )
    }

    /// Content of the `tool` message sent back to the model
    #[must_use]
    pub fn tool_message_content(&self) -> String {
        match (&self.result, &self.error) {
            (Some(result), _) if self.success => result.to_string(),
            (_, Some(error)) => serde_json::json!({ "error": error }).to_string(),
            _ => serde_json::json!({ "error": "tool failed" }).to_string(),
        }
    }
}

/// Calls left over when the stream ended
#[derive(Debug, Default)]
pub struct RemainingCalls {
    /// Calls with valid arguments, already marked consumed
    pub ready: Vec<PreparedCall>,
    /// Calls whose arguments never became a JSON object (or had no name)
    pub malformed: Vec<ToolCallBuffer>,
}

/// Per-request at-most-once tool executor
pub struct RealTimeToolExecutor {
    registry: Arc<ToolRegistry>,
    user_id: String,
    accumulator: ToolCallAccumulator,
    consumed: ConsumedSet,
    executed: Vec<ToolExecutionResult>,
}

impl RealTimeToolExecutor {
    /// Executor for one request
    pub fn new(registry: Arc<ToolRegistry>, user_id: impl Into<String>) -> Self {
        Self {
            registry,
            user_id: user_id.into(),
            accumulator: ToolCallAccumulator::new(),
            consumed: ConsumedSet::new(),
            executed: Vec::new(),
        }
    }

    /// Fold fragments into the accumulator
    pub fn apply_deltas(&mut self, deltas: &[ToolCallDelta]) {
        for delta in deltas {
            self.accumulator.apply_delta(delta);
        }
    }

    /// Newly complete calls, marked consumed before they are returned
    pub fn prepare_ready(&mut self) -> Vec<PreparedCall> {
        let mut ready = Vec::new();
        for buffer in self.accumulator.drain_complete(&self.consumed) {
            if !self.consumed.insert(&buffer) {
                continue;
            }
            match self.prepare(&buffer) {
                Some(call) => ready.push(call),
                None => {
                    tracing::warn!(index = buffer.index, "Complete tool call failed to prepare");
                }
            }
        }
        ready
    }

    /// Run a prepared call and record the outcome
    pub async fn execute(&mut self, call: &PreparedCall) -> ToolExecutionResult {
        let arguments = Value::Object(call.arguments.clone());
        tracing::info!(
            tool = %call.tool_name,
            call_id = %call.call_id,
            index = call.index,
            "Executing tool"
        );

        let outcome = self
            .registry
            .dispatch_value(&call.tool_name, arguments.clone(), &self.user_id)
            .await;

        let result = match outcome {
            Ok(value) => ToolExecutionResult {
                tool_call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments,
                success: true,
                result: Some(value),
                error: None,
                failure: None,
                timestamp_ms: now_ms(),
            },
            Err(err) => {
                tracing::warn!(
                    tool = %call.tool_name,
                    call_id = %call.call_id,
                    error = %err,
                    "Tool execution failed"
                );
                ToolExecutionResult {
                    tool_call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments,
                    success: false,
                    result: None,
                    error: Some(err.client_message()),
                    failure: Some(err.kind()),
                    timestamp_ms: now_ms(),
                }
            }
        };

        self.executed.push(result.clone());
        result
    }

    /// Apply fragments and run every call they complete, in index order
    pub async fn on_delta_batch(&mut self, deltas: &[ToolCallDelta]) -> Vec<ToolExecutionResult> {
        self.apply_deltas(deltas);
        let mut results = Vec::new();
        for call in self.prepare_ready() {
            results.push(self.execute(&call).await);
        }
        results
    }

    /// Buffers not yet consumed, in index order
    #[must_use]
    pub fn remaining_after_stream_end(&self) -> Vec<ToolCallBuffer> {
        self.accumulator.unconsumed(&self.consumed)
    }

    /// Validate leftover buffers and mark the valid ones consumed
    pub fn prepare_remaining(&mut self) -> RemainingCalls {
        let mut remaining = RemainingCalls::default();
        for buffer in self.remaining_after_stream_end() {
            let prepared = if buffer.name.is_empty() {
                None
            } else {
                self.prepare(&buffer)
            };
            match prepared {
                Some(call) => {
                    self.consumed.insert(&buffer);
                    remaining.ready.push(call);
                }
                None => {
                    tracing::warn!(
                        index = buffer.index,
                        tool = %buffer.name,
                        bytes = buffer.arguments.len(),
                        "Dropping tool call with malformed arguments"
                    );
                    remaining.malformed.push(buffer);
                }
            }
        }
        remaining
    }

    /// Whether the response contained any tool call at all
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.accumulator.is_empty()
    }

    /// Every execution so far, in execution order
    #[must_use]
    pub fn executed(&self) -> &[ToolExecutionResult] {
        &self.executed
    }

    /// Number of consumed calls
    #[must_use]
    pub fn consumed_count(&self) -> usize {
        self.consumed.len()
    }

    fn prepare(&self, buffer: &ToolCallBuffer) -> Option<PreparedCall> {
        let mut arguments = buffer.parsed_arguments()?;
        if resolve_user_id(&mut arguments, &self.user_id) {
            tracing::debug!(tool = %buffer.name, "Replaced placeholder userId");
        }
        let call_id = if buffer.id.is_empty() {
            format!("call_{}_{}", buffer.index, uuid::Uuid::new_v4().simple())
        } else {
            buffer.id.clone()
        };
        Some(PreparedCall {
            index: buffer.index,
            call_id,
            tool_name: buffer.name.clone(),
            arguments,
        })
    }
}

impl std::fmt::Debug for RealTimeToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealTimeToolExecutor")
            .field("user_id", &self.user_id)
            .field("tool_calls", &self.accumulator.len())
            .field("consumed", &self.consumed.len())
            .field("executed", &self.executed.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolHandler, ToolSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const USER: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for CountingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(
                "logMood",
                "Log mood",
                json!({
                    "type": "object",
                    "properties": {"moodScore": {"type": "integer"}},
                    "required": ["moodScore"]
                }),
            )
        }

        async fn call(&self, args: Value, _user_id: &str) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true, "userId": args["userId"]}))
        }
    }

    fn executor() -> (RealTimeToolExecutor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool {
            calls: calls.clone(),
        });
        registry.initialize().unwrap();
        (RealTimeToolExecutor::new(Arc::new(registry), USER), calls)
    }

    #[tokio::test]
    async fn test_executes_once_when_complete() {
        let (mut executor, calls) = executor();

        let results = executor
            .on_delta_batch(&[
                ToolCallDelta::start(0, "call_1", "logMood"),
                ToolCallDelta::arguments(0, "{\"moodScore\":"),
            ])
            .await;
        assert!(results.is_empty());

        let results = executor
            .on_delta_batch(&[ToolCallDelta::arguments(0, "7}")])
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].tool_call_id, "call_1");

        // Trailing whitespace keeps the call complete but must not re-run it
        let results = executor
            .on_delta_batch(&[ToolCallDelta::arguments(0, " ")])
            .await;
        assert!(results.is_empty());
        assert!(executor.remaining_after_stream_end().is_empty());
        assert!(executor.prepare_remaining().ready.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_placeholder_user_id_resolved() {
        let (mut executor, _) = executor();
        executor.apply_deltas(&[
            ToolCallDelta::start(0, "call_1", "logMood"),
            ToolCallDelta::arguments(0, r#"{"userId":"uuid","moodScore":7}"#),
        ]);

        let ready = executor.prepare_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].arguments["userId"], USER);
        assert!(ready[0].args_json().contains(USER));

        let result = executor.execute(&ready[0]).await;
        assert_eq!(result.result.unwrap()["userId"], USER);
    }

    #[tokio::test]
    async fn test_remaining_split_into_ready_and_malformed() {
        let (mut executor, calls) = executor();
        executor.apply_deltas(&[
            ToolCallDelta::start(0, "a", "logMood"),
            ToolCallDelta::arguments(0, "{\"moodScore\":4"),
            ToolCallDelta::start(1, "b", "logMood"),
            ToolCallDelta::arguments(1, "{\"text\":\"partial"),
        ]);
        assert!(executor.prepare_ready().is_empty());

        let remaining = executor.prepare_remaining();
        assert!(remaining.ready.is_empty());
        assert_eq!(remaining.malformed.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_not_panicking() {
        let (mut executor, _) = executor();
        let results = executor
            .on_delta_batch(&[
                ToolCallDelta::start(0, "x", "deleteEverything"),
                ToolCallDelta::arguments(0, "{}"),
            ])
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].failure, Some(ToolFailureKind::UnknownTool));
        assert!(!results[0].is_handler_failure());
        assert!(results[0].tool_message_content().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_call_without_argument_fragments_is_malformed() {
        let (mut executor, calls) = executor();
        executor.apply_deltas(&[ToolCallDelta::start(0, "call_1", "logMood")]);
        assert!(executor.prepare_ready().is_empty());

        let remaining = executor.prepare_remaining();
        assert!(remaining.ready.is_empty());
        assert_eq!(remaining.malformed.len(), 1);
        assert_eq!(remaining.malformed[0].name, "logMood");
        assert!(executor.executed().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deferred_calls_run_from_remaining() {
        let (mut executor, calls) = executor();
        executor.apply_deltas(&[
            ToolCallDelta::start(0, "a", "logMood"),
            ToolCallDelta::arguments(0, "{\"moodScore\":3}"),
            ToolCallDelta::start(1, "b", "logMood"),
            ToolCallDelta::arguments(1, "{\"moodScore\":"),
        ]);

        // Nothing drained inline, so the complete call is picked up at the end
        let remaining = executor.prepare_remaining();
        assert_eq!(remaining.ready.len(), 1);
        assert_eq!(remaining.ready[0].call_id, "a");
        assert_eq!(remaining.malformed.len(), 1);

        let result = executor.execute(&remaining.ready[0]).await;
        assert!(result.success);
        assert!(executor.prepare_ready().is_empty());
        assert!(executor.prepare_remaining().ready.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_generated_call_id_when_missing() {
        let (mut executor, _) = executor();
        executor.apply_deltas(&[
            ToolCallDelta {
                index: 3,
                name: Some("logMood".to_string()),
                ..Default::default()
            },
            ToolCallDelta::arguments(3, "{\"moodScore\":1}"),
        ]);
        let ready = executor.prepare_ready();
        assert!(ready[0].call_id.starts_with("call_3_"));
        assert_eq!(executor.consumed_count(), 1);
    }
}
