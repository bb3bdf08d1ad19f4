//! Streaming session state machine
//!
//! One [`StreamingSession`] answers one [`StreamingRequest`]. It runs a
//! single cooperative read loop: read a chunk, decode it, emit tokens, run any
//! tool call the chunk completed, then read again. A slow tool therefore holds
//! back the next token instead of racing it.
//!
//! ```text
//! Init ──▶ Streaming ──▶ Done
//!              │
//!              └──▶ ToolsPending ──▶ ToolsExecuting ──▶ FollowupStreaming ──▶ Done
//!
//! (any non-terminal state) ──▶ Error
//! ```
//!
//! Every run sends `start` first and exactly one of `done` / `error` last,
//! unless the client went away, in which case nothing more is sent.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;

use super::decoder::StreamDecoder;
use super::executor::{PreparedCall, RealTimeToolExecutor, ToolExecutionResult};
use super::types::{ToolCallDelta, UpstreamEvent};
use crate::backend::{
    BackendError, ByteStream, ChatMessage, CompletionBackend, CompletionRequest, ToolCallRecord,
};
use crate::config::{ConductorConfig, FallbackFailurePolicy, RetryConfig, StreamingConfig};
use crate::context::{ContextBuilder, ModeClassifier};
use crate::messages::{DownstreamEvent, EventEnvelope};
use crate::request::StreamingRequest;
use crate::tools::ToolRegistry;

// =============================================================================
// State and Outcome
// =============================================================================

/// Where a session is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Building the prompt and opening the upstream stream
    Init,
    /// Reading the upstream stream
    Streaming,
    /// Stream ended with tool calls left to validate
    ToolsPending,
    /// Running leftover tool calls sequentially
    ToolsExecuting,
    /// Waiting for the follow-up completion
    FollowupStreaming,
    /// Finished successfully (terminal)
    Done,
    /// Finished with an error (terminal)
    Error,
}

impl SessionState {
    /// Whether no further transitions are possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Name for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Streaming => "streaming",
            Self::ToolsPending => "tools_pending",
            Self::ToolsExecuting => "tools_executing",
            Self::FollowupStreaming => "followup_streaming",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `done` was sent
    Done {
        /// Token events emitted
        total_chunks: u32,
    },
    /// `error` was sent
    Error {
        /// The user-safe message that was sent
        message: String,
    },
    /// The client disconnected; no terminal event was delivered
    Cancelled,
}

impl SessionOutcome {
    /// Whether the request completed with `done`
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Reasons a session ends in `error` (or stops early)
#[derive(Debug, Error)]
pub enum SessionError {
    /// Upstream refused or could not be reached
    #[error("upstream transport error: {0}")]
    UpstreamTransport(#[from] BackendError),

    /// Every leftover tool call had unusable arguments
    #[error("{count} pending tool call(s) had malformed arguments")]
    MalformedToolArguments {
        /// Number of dropped calls
        count: usize,
    },

    /// A tool handler failed after the stream ended
    #[error("tool {tool} failed after the stream ended: {message}")]
    ToolHandler {
        /// Tool name
        tool: String,
        /// Failure description
        message: String,
    },

    /// The follow-up completion failed
    #[error("follow-up completion failed: {0}")]
    Followup(String),

    /// The overall request budget ran out
    #[error("request exceeded its overall time budget")]
    DeadlineExceeded,

    /// The downstream receiver was dropped
    #[error("client disconnected")]
    Cancelled,
}

impl SessionError {
    /// Short, non-technical message for the `error` event
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::UpstreamTransport(_) => {
                "I'm having trouble reaching the assistant right now. Please try again in a moment."
            }
            Self::MalformedToolArguments { .. } => {
                "Something went wrong while handling that. Please try again."
            }
            Self::ToolHandler { .. } => "I couldn't finish saving that. Please try again.",
            Self::Followup(_) => "I couldn't finish my reply. Please try again.",
            Self::DeadlineExceeded => "That took too long to answer. Please try again.",
            Self::Cancelled => "The request was cancelled.",
        }
        .to_string()
    }
}

// =============================================================================
// Configuration and Collaborators
// =============================================================================

/// Settings a session needs, shared across requests
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Upstream model identifier
    pub model: String,
    /// Budgets, channel size, failure policy
    pub streaming: StreamingConfig,
    /// Retry policy for opening the stream
    pub retry: RetryConfig,
}

impl From<&ConductorConfig> for SessionConfig {
    fn from(config: &ConductorConfig) -> Self {
        Self {
            model: config.upstream.model.clone(),
            streaming: config.streaming.clone(),
            retry: config.retry.clone(),
        }
    }
}

/// Shared, read-only collaborators of a session
#[derive(Clone)]
pub struct SessionDeps {
    /// Upstream completion API
    pub backend: Arc<dyn CompletionBackend>,
    /// Initialized tool registry
    pub registry: Arc<ToolRegistry>,
    /// System prompt builder
    pub context_builder: Arc<dyn ContextBuilder>,
    /// Mode classifier (used when the request has no mode)
    pub mode_classifier: Arc<dyn ModeClassifier>,
    /// Session settings
    pub config: Arc<SessionConfig>,
}

// =============================================================================
// StreamingSession
// =============================================================================

/// Orchestrates one request from prompt to terminal event
pub struct StreamingSession {
    deps: SessionDeps,
    request: StreamingRequest,
    tx: mpsc::Sender<EventEnvelope>,
    state: SessionState,
    /// Last `chunkIndex` emitted
    chunk_index: u32,
    /// Text streamed before the tool calls, replayed in the follow-up
    assistant_text: String,
    executor: RealTimeToolExecutor,
}

impl StreamingSession {
    /// Session for one request, emitting into `tx`
    #[must_use]
    pub fn new(
        deps: SessionDeps,
        request: StreamingRequest,
        tx: mpsc::Sender<EventEnvelope>,
    ) -> Self {
        let executor = RealTimeToolExecutor::new(deps.registry.clone(), request.user_id.clone());
        Self {
            deps,
            request,
            tx,
            state: SessionState::Init,
            chunk_index: 0,
            assistant_text: String::new(),
            executor,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run to completion
    pub async fn run(self) -> SessionOutcome {
        let span = tracing::info_span!(
            "session",
            session_id = %self.request.session_id,
            message_id = %self.request.message_id,
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> SessionOutcome {
        let started = Instant::now();
        let streaming = &self.deps.config.streaming;
        let overall_deadline = started + streaming.overall_timeout;
        let read_deadline = (started + streaming.stream_read_timeout).min(overall_deadline);

        tracing::info!(user_id = %self.request.user_id, "Session started");

        match self.drive(read_deadline, overall_deadline).await {
            Ok(()) => {
                self.transition(SessionState::Done);
                let total_chunks = self.chunk_index;
                if self
                    .emit(DownstreamEvent::Done { total_chunks })
                    .await
                    .is_err()
                {
                    return SessionOutcome::Cancelled;
                }
                tracing::info!(
                    total_chunks,
                    tools = self.executor.executed().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Session done"
                );
                SessionOutcome::Done { total_chunks }
            }
            Err(SessionError::Cancelled) => {
                tracing::info!(state = %self.state, "Client disconnected, session cancelled");
                SessionOutcome::Cancelled
            }
            Err(err) => {
                tracing::error!(state = %self.state, error = %err, "Session failed");
                self.transition(SessionState::Error);
                let message = err.user_message();
                if self
                    .emit(DownstreamEvent::Error {
                        message: message.clone(),
                    })
                    .await
                    .is_err()
                {
                    return SessionOutcome::Cancelled;
                }
                SessionOutcome::Error { message }
            }
        }
    }

    async fn drive(
        &mut self,
        read_deadline: Instant,
        overall_deadline: Instant,
    ) -> Result<(), SessionError> {
        self.emit(DownstreamEvent::Start).await?;

        let upstream_request = self.build_upstream_request();

        match self
            .open_stream_with_retry(&upstream_request, read_deadline)
            .await?
        {
            Some(body) => {
                self.transition(SessionState::Streaming);
                self.consume_stream(body, read_deadline).await?;
            }
            None => {
                tracing::warn!("Upstream did not answer within the stream budget");
                self.transition(SessionState::Streaming);
            }
        }

        self.finish_stream(&upstream_request, overall_deadline).await
    }

    // =========================================================================
    // Init
    // =========================================================================

    fn build_upstream_request(&self) -> CompletionRequest {
        let request = &self.request;
        let user_context = self
            .deps
            .context_builder
            .build_context(&request.user_id, &request.current_context);

        let mode = match request.mode.as_deref().map(str::trim) {
            Some(mode) if !mode.is_empty() => mode.to_string(),
            _ => self
                .deps
                .mode_classifier
                .classify(&request.user_message, &user_context),
        };
        let system_prompt = self
            .deps
            .context_builder
            .build_system_prompt(&user_context, &mode);

        let conversation = request.conversation();
        tracing::debug!(
            mode = %mode,
            history = request.conversation_history.len(),
            forwarded = conversation.len(),
            "Built upstream request"
        );

        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(
            conversation
                .into_iter()
                .map(|entry| ChatMessage::new(entry.role.as_str(), entry.content)),
        );

        CompletionRequest::new(self.deps.config.model.clone(), messages)
            .with_tools(self.deps.registry.schemas())
            .with_temperature(request.temperature)
            .with_stream(true)
    }

    /// Open the stream, retrying retryable failures with backoff
    ///
    /// `Ok(None)` means the deadline passed before the upstream answered.
    async fn open_stream_with_retry(
        &self,
        request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<Option<ByteStream>, SessionError> {
        let retry = &self.deps.config.retry;
        let mut attempt: u32 = 0;

        loop {
            let opened = tokio::select! {
                biased;
                () = self.tx.closed() => return Err(SessionError::Cancelled),
                opened = tokio::time::timeout_at(deadline, self.deps.backend.open_stream(request)) => opened,
            };

            let err = match opened {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(body)) => return Ok(Some(body)),
                Ok(Err(err)) => err,
            };

            if attempt >= retry.max_retries || !retry.should_retry(&err) {
                return Err(SessionError::UpstreamTransport(err));
            }
            let backoff = retry.backoff_for_attempt(attempt);
            if Instant::now() + backoff >= deadline {
                return Err(SessionError::UpstreamTransport(err));
            }

            attempt += 1;
            tracing::warn!(
                attempt,
                max_retries = retry.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retrying upstream request"
            );

            tokio::select! {
                biased;
                () = self.tx.closed() => return Err(SessionError::Cancelled),
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    async fn consume_stream(
        &mut self,
        mut body: ByteStream,
        deadline: Instant,
    ) -> Result<(), SessionError> {
        let mut decoder = StreamDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                () = self.tx.closed() => return Err(SessionError::Cancelled),
                next = tokio::time::timeout_at(deadline, body.next()) => next,
            };

            match next {
                Err(_elapsed) => {
                    tracing::warn!(
                        chunks = self.chunk_index,
                        "Upstream stream exceeded its read budget, ending early"
                    );
                    return Ok(());
                }
                Ok(None) => {
                    let events = decoder.finish();
                    self.process_events(events).await?;
                    if !decoder.is_finished() {
                        tracing::warn!("Upstream closed without a terminator");
                    }
                    return Ok(());
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(error = %err, "Upstream stream broke mid-response, treating as truncated");
                    return Ok(());
                }
                Ok(Some(Ok(bytes))) => {
                    let events = decoder.feed(&bytes);
                    self.process_events(events).await?;
                    if decoder.is_finished() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn process_events(&mut self, events: Vec<UpstreamEvent>) -> Result<(), SessionError> {
        let mut batch: Vec<ToolCallDelta> = Vec::new();
        for event in events {
            match event {
                UpstreamEvent::ContentDelta { text } => {
                    self.flush_tool_batch(&mut batch).await?;
                    self.assistant_text.push_str(&text);
                    self.emit_token(text).await?;
                }
                UpstreamEvent::ToolCallDelta(delta) => batch.push(delta),
                UpstreamEvent::StreamEnd => {}
            }
        }
        self.flush_tool_batch(&mut batch).await
    }

    /// Feed tool-call fragments and run whatever they complete
    ///
    /// Failures here are reported as `tool_error` and never end the request.
    async fn flush_tool_batch(&mut self, batch: &mut Vec<ToolCallDelta>) -> Result<(), SessionError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.executor.apply_deltas(batch);
        batch.clear();
        if !self.deps.config.streaming.inline_tool_execution {
            return Ok(());
        }

        for call in self.executor.prepare_ready() {
            self.run_tool(&call).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Stream End, Tools and Follow-up
    // =========================================================================

    async fn finish_stream(
        &mut self,
        upstream_request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<(), SessionError> {
        if !self.executor.has_tool_calls() {
            if self.chunk_index == 0 {
                tracing::warn!("Upstream returned no content and no tool calls, sending fallback");
                let fallback = self.deps.config.streaming.fallback_message.clone();
                self.emit_token(fallback).await?;
            }
            return Ok(());
        }

        self.transition(SessionState::ToolsPending);
        let remaining = self.executor.prepare_remaining();
        if remaining.ready.is_empty() && !remaining.malformed.is_empty() {
            return Err(SessionError::MalformedToolArguments {
                count: remaining.malformed.len(),
            });
        }

        self.transition(SessionState::ToolsExecuting);
        let policy = self.deps.config.streaming.fallback_failure_policy;
        for call in &remaining.ready {
            if Instant::now() >= deadline {
                tracing::warn!(
                    tool = %call.tool_name,
                    "Overall budget spent before every tool call could run"
                );
                return Err(SessionError::DeadlineExceeded);
            }
            let result = self.run_tool(call).await?;
            if result.is_handler_failure() && policy == FallbackFailurePolicy::FailFast {
                return Err(SessionError::ToolHandler {
                    tool: result.tool_name,
                    message: result.error.unwrap_or_default(),
                });
            }
        }

        if self.executor.executed().is_empty() {
            return Ok(());
        }

        self.transition(SessionState::FollowupStreaming);
        self.followup(upstream_request, deadline).await
    }

    async fn followup(
        &mut self,
        upstream_request: &CompletionRequest,
        deadline: Instant,
    ) -> Result<(), SessionError> {
        let executed = self.executor.executed();

        let mut messages = upstream_request.messages.clone();
        let records = executed
            .iter()
            .map(|r| ToolCallRecord::function(&r.tool_call_id, &r.tool_name, r.arguments.to_string()))
            .collect();
        let content = (!self.assistant_text.is_empty()).then(|| self.assistant_text.clone());
        messages.push(ChatMessage::assistant_tool_calls(content, records));
        messages.extend(
            executed
                .iter()
                .map(|r| ChatMessage::tool_result(&r.tool_call_id, r.tool_message_content())),
        );

        let request = CompletionRequest::new(upstream_request.model.clone(), messages)
            .with_temperature(upstream_request.temperature);

        tracing::debug!(tool_results = executed.len(), "Requesting follow-up completion");

        let response = tokio::select! {
            biased;
            () = self.tx.closed() => return Err(SessionError::Cancelled),
            response = tokio::time::timeout_at(deadline, self.deps.backend.complete(&request)) => response,
        };

        let response = match response {
            Err(_elapsed) => return Err(SessionError::DeadlineExceeded),
            Ok(Err(err)) => return Err(SessionError::Followup(err.to_string())),
            Ok(Ok(response)) => response,
        };

        if response.content.trim().is_empty() {
            tracing::debug!("Follow-up completion returned no text");
        } else {
            self.emit_token(response.content).await?;
        }
        Ok(())
    }

    /// Announce, execute and report one tool call
    async fn run_tool(&mut self, call: &PreparedCall) -> Result<ToolExecutionResult, SessionError> {
        self.emit(DownstreamEvent::ToolCall {
            tool_name: call.tool_name.clone(),
            args_json: call.args_json(),
        })
        .await?;

        let result = self.executor.execute(call).await;

        let event = if result.success {
            DownstreamEvent::ToolResult {
                tool_name: result.tool_name.clone(),
                result: result.result.clone().unwrap_or(serde_json::Value::Null),
            }
        } else {
            DownstreamEvent::ToolError {
                tool_name: result.tool_name.clone(),
                error: result.error.clone().unwrap_or_default(),
            }
        };
        self.emit(event).await?;
        Ok(result)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    async fn emit_token(&mut self, text: String) -> Result<(), SessionError> {
        self.chunk_index += 1;
        let chunk_index = self.chunk_index;
        self.emit(DownstreamEvent::Token { chunk_index, text }).await
    }

    async fn emit(&self, event: DownstreamEvent) -> Result<(), SessionError> {
        tracing::trace!(kind = event.kind(), "Emitting event");
        let envelope = EventEnvelope::new(
            self.request.session_id.clone(),
            self.request.message_id.clone(),
            event,
        );
        self.tx
            .send(envelope)
            .await
            .map_err(|_| SessionError::Cancelled)
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "Session state change");
        self.state = next;
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("session_id", &self.request.session_id)
            .field("message_id", &self.request.message_id)
            .field("state", &self.state)
            .field("chunk_index", &self.chunk_index)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Done.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(!SessionState::ToolsPending.is_terminal());
        assert_eq!(SessionState::FollowupStreaming.to_string(), "followup_streaming");
    }

    #[test]
    fn test_user_messages_hide_internals() {
        let err = SessionError::UpstreamTransport(BackendError::Status {
            status: 500,
            body: "Traceback (most recent call last): secret".to_string(),
        });
        assert!(err.to_string().contains("Traceback"));
        assert!(!err.user_message().contains("Traceback"));
        assert!(!err.user_message().contains("500"));

        let err = SessionError::Followup("connection reset by peer".to_string());
        assert!(!err.user_message().contains("reset"));
    }

    #[test]
    fn test_session_config_from_conductor_config() {
        let mut config = ConductorConfig::default();
        config.upstream.model = "local-model".to_string();
        let session_config = SessionConfig::from(&config);
        assert_eq!(session_config.model, "local-model");
        assert_eq!(session_config.retry, config.retry);
    }
}
