//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chat_conductor_core::backend::ByteStream;
use chat_conductor_core::{
    BackendError, CompletionBackend, CompletionRequest, CompletionResponse, ConductorConfig,
    DownstreamEvent, EventEnvelope, MessageId, SessionId, StreamingRequest, ToolHandler,
    ToolSchema,
};
use futures::StreamExt;
use serde_json::{json, Value};

pub const USER_ID: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";

// =============================================================================
// SSE helpers
// =============================================================================

/// One `data:` frame
pub fn frame(payload: &str) -> String {
    format!("data: {payload}\n\n")
}

pub fn content_frame(text: &str) -> String {
    frame(&json!({"choices": [{"delta": {"content": text}}]}).to_string())
}

pub fn tool_start_frame(index: usize, id: &str, name: &str) -> String {
    frame(
        &json!({"choices": [{"delta": {"tool_calls": [
            {"index": index, "id": id, "type": "function", "function": {"name": name, "arguments": ""}}
        ]}}]})
        .to_string(),
    )
}

pub fn tool_args_frame(index: usize, fragment: &str) -> String {
    frame(
        &json!({"choices": [{"delta": {"tool_calls": [
            {"index": index, "function": {"arguments": fragment}}
        ]}}]})
        .to_string(),
    )
}

pub fn done_frame() -> String {
    frame("[DONE]")
}

// =============================================================================
// ScriptedBackend
// =============================================================================

/// What one `open_stream` call does
pub enum StreamScript {
    /// Yield these chunks, then close
    Chunks(Vec<String>),
    /// Yield these chunks with a pause before each
    Delayed(Vec<String>, Duration),
    /// Yield these chunks, then stay open forever
    ChunksThenHang(Vec<String>),
    /// Fail with this HTTP status
    Status(u16),
    /// Never answer
    Hang,
}

/// Backend that replays scripted streams and follow-up replies
#[derive(Default)]
pub struct ScriptedBackend {
    streams: Mutex<VecDeque<StreamScript>>,
    followups: Mutex<VecDeque<Result<String, BackendError>>>,
    stream_requests: Mutex<Vec<CompletionRequest>>,
    followup_requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn with_chunks(self, chunks: Vec<String>) -> Self {
        self.with_stream(StreamScript::Chunks(chunks))
    }

    pub fn with_followup(self, text: &str) -> Self {
        self.followups
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn with_followup_error(self, err: BackendError) -> Self {
        self.followups.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn stream_requests(&self) -> Vec<CompletionRequest> {
        self.stream_requests.lock().unwrap().clone()
    }

    pub fn followup_requests(&self) -> Vec<CompletionRequest> {
        self.followup_requests.lock().unwrap().clone()
    }
}

fn chunk_stream(chunks: Vec<String>) -> impl futures::Stream<Item = Result<Bytes, BackendError>> {
    futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn open_stream(&self, request: &CompletionRequest) -> Result<ByteStream, BackendError> {
        self.stream_requests.lock().unwrap().push(request.clone());
        let script = self.streams.lock().unwrap().pop_front();

        match script {
            Some(StreamScript::Chunks(chunks)) => Ok(Box::pin(chunk_stream(chunks))),
            Some(StreamScript::Delayed(chunks, delay)) => Ok(Box::pin(
                chunk_stream(chunks).then(move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    chunk
                }),
            )),
            Some(StreamScript::ChunksThenHang(chunks)) => Ok(Box::pin(
                chunk_stream(chunks).chain(futures::stream::pending()),
            )),
            Some(StreamScript::Status(status)) => Err(BackendError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            Some(StreamScript::Hang) => std::future::pending().await,
            None => Err(BackendError::Config("no scripted stream left".to_string())),
        }
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        self.followup_requests.lock().unwrap().push(request.clone());
        let reply = self.followups.lock().unwrap().pop_front();
        match reply {
            Some(Ok(content)) => Ok(CompletionResponse {
                content,
                model: Some("scripted".to_string()),
                finish_reason: Some("stop".to_string()),
            }),
            Some(Err(err)) => Err(err),
            None => Err(BackendError::Config("no scripted follow-up left".to_string())),
        }
    }
}

// =============================================================================
// Tools
// =============================================================================

/// Tool that records its calls and answers `{"saved": true}`
pub struct RecordingTool {
    name: &'static str,
    parameters: Value,
    fail: bool,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(Value, String)>>>,
}

impl RecordingTool {
    pub fn store_insight() -> Self {
        Self::new(
            "storeInsight",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}, "userId": {"type": "string"}},
                "required": ["text"]
            }),
        )
    }

    pub fn log_mood() -> Self {
        Self::new(
            "logMood",
            json!({
                "type": "object",
                "properties": {
                    "moodScore": {"type": "integer", "minimum": 1, "maximum": 10},
                    "userId": {"type": "string"}
                },
                "required": ["moodScore"]
            }),
        )
    }

    pub fn new(name: &'static str, parameters: Value) -> Self {
        Self {
            name,
            parameters,
            fail: false,
            delay: None,
            calls: Arc::default(),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Sleep this long inside every call
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle to the recorded `(args, user_id)` pairs
    pub fn calls(&self) -> Arc<Mutex<Vec<(Value, String)>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl ToolHandler for RecordingTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(self.name, format!("Test tool {}", self.name), self.parameters.clone())
    }

    async fn call(&self, args: Value, user_id: &str) -> anyhow::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((args, user_id.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("database unavailable at 10.0.0.7:5432");
        }
        Ok(json!({"saved": true}))
    }
}

// =============================================================================
// Requests and event collection
// =============================================================================

pub fn request(message: &str) -> StreamingRequest {
    StreamingRequest::new(
        USER_ID,
        message,
        SessionId::from("session-1"),
        MessageId::from("message-1"),
    )
}

/// Config with fast retries and short budgets
pub fn test_config() -> ConductorConfig {
    let mut config = ConductorConfig::default();
    config.retry.initial_backoff_ms = 5;
    config.retry.max_backoff_ms = 20;
    config.retry.use_jitter = false;
    config.streaming.stream_read_timeout = Duration::from_secs(5);
    config.streaming.overall_timeout = Duration::from_secs(10);
    config
}

pub async fn collect(mut rx: tokio::sync::mpsc::Receiver<EventEnvelope>) -> Vec<DownstreamEvent> {
    let mut events = Vec::new();
    while let Some(envelope) = rx.recv().await {
        events.push(envelope.event);
    }
    events
}

pub fn kinds(events: &[DownstreamEvent]) -> Vec<&'static str> {
    events.iter().map(DownstreamEvent::kind).collect()
}

pub fn token(chunk_index: u32, text: &str) -> DownstreamEvent {
    DownstreamEvent::Token {
        chunk_index,
        text: text.to_string(),
    }
}
