//! Conductor - The Orchestration Core
//!
//! The Conductor owns everything that is shared across requests:
//! - The upstream completion backend
//! - The initialized tool registry
//! - The prompt builder and mode classifier
//! - Session settings (budgets, retry policy, failure policy)
//!
//! Each request gets its own [`StreamingSession`] with fresh accumulator,
//! consumed-set and counters. Nothing mutable is shared between sessions, so
//! concurrent requests cannot observe each other.
//!
//! # Design Philosophy
//!
//! The Conductor is transport-agnostic. It doesn't know whether the events it
//! produces go to a WebSocket, a CLI or a test harness. It communicates through:
//! - [`StreamingRequest`]: one user turn coming in
//! - [`EventEnvelope`]: ordered events going out on a bounded channel

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::CompletionBackend;
use crate::config::ConductorConfig;
use crate::context::{ContextBuilder, KeywordModeClassifier, ModeClassifier, TemplateContextBuilder};
use crate::messages::EventEnvelope;
use crate::request::StreamingRequest;
use crate::streaming::{SessionConfig, SessionDeps, SessionOutcome, StreamingSession};
use crate::tools::{ToolError, ToolRegistry};

/// The Conductor - shared state for answering streaming requests
pub struct Conductor<B: CompletionBackend> {
    /// Upstream completion API
    backend: Arc<B>,
    /// Tool registry (initialized, read-only from here on)
    registry: Arc<ToolRegistry>,
    /// System prompt builder
    context_builder: Arc<dyn ContextBuilder>,
    /// Mode classifier
    mode_classifier: Arc<dyn ModeClassifier>,
    /// Session settings
    config: Arc<SessionConfig>,
}

impl<B: CompletionBackend + 'static> Conductor<B> {
    /// Create a new Conductor with the given backend and tools
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] if a tool schema fails to compile.
    pub fn new(
        backend: B,
        mut registry: ToolRegistry,
        config: ConductorConfig,
    ) -> Result<Self, ToolError> {
        registry.initialize()?;
        tracing::info!(
            backend = backend.name(),
            model = %config.upstream.model,
            tools = registry.len(),
            "Conductor ready"
        );

        Ok(Self {
            backend: Arc::new(backend),
            registry: Arc::new(registry),
            context_builder: Arc::new(TemplateContextBuilder::default()),
            mode_classifier: Arc::new(KeywordModeClassifier::default()),
            config: Arc::new(SessionConfig::from(&config)),
        })
    }

    /// Replace the prompt builder
    #[must_use]
    pub fn with_context_builder(mut self, builder: impl ContextBuilder + 'static) -> Self {
        self.context_builder = Arc::new(builder);
        self
    }

    /// Replace the mode classifier
    #[must_use]
    pub fn with_mode_classifier(mut self, classifier: impl ModeClassifier + 'static) -> Self {
        self.mode_classifier = Arc::new(classifier);
        self
    }

    /// Get the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get the tool registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Get the session settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build a session that emits into `tx`
    ///
    /// The caller drives it with [`StreamingSession::run`]. Dropping the
    /// receiving side of `tx` cancels the session.
    pub fn session(
        &self,
        request: StreamingRequest,
        tx: mpsc::Sender<EventEnvelope>,
    ) -> StreamingSession {
        StreamingSession::new(self.deps(), request, tx)
    }

    /// Spawn a session for `request`
    ///
    /// Returns the event receiver and a handle resolving to the outcome.
    pub fn handle_request(
        &self,
        request: StreamingRequest,
    ) -> (mpsc::Receiver<EventEnvelope>, JoinHandle<SessionOutcome>) {
        let capacity = self.config.streaming.event_channel_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let session = self.session(request, tx);
        let handle = tokio::spawn(session.run());
        (rx, handle)
    }

    fn deps(&self) -> SessionDeps {
        SessionDeps {
            backend: self.backend.clone(),
            registry: self.registry.clone(),
            context_builder: self.context_builder.clone(),
            mode_classifier: self.mode_classifier.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: CompletionBackend> std::fmt::Debug for Conductor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("backend", &self.backend.name())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ByteStream, CompletionRequest, CompletionResponse};
    use crate::messages::{DownstreamEvent, MessageId, SessionId};
    use bytes::Bytes;

    // Mock backend for testing
    struct MockBackend;

    #[async_trait::async_trait]
    impl CompletionBackend for MockBackend {
        fn name(&self) -> &str {
            "Mock"
        }

        async fn open_stream(
            &self,
            _request: &CompletionRequest,
        ) -> Result<ByteStream, BackendError> {
            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello \"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"world!\"}}]}\n\n",
                "data: [DONE]\n\n",
            );
            let chunks: Vec<Result<Bytes, BackendError>> = vec![Ok(Bytes::from_static(body.as_bytes()))];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, BackendError> {
            Ok(CompletionResponse {
                content: "Hello!".to_string(),
                model: Some("mock".to_string()),
                finish_reason: None,
            })
        }
    }

    fn request() -> StreamingRequest {
        StreamingRequest::new(
            "7c9e6679-7425-40de-944b-e07fc1f90ae7",
            "hi",
            SessionId::from("s-1"),
            MessageId::from("m-1"),
        )
    }

    #[tokio::test]
    async fn test_conductor_creation() {
        let conductor =
            Conductor::new(MockBackend, ToolRegistry::new(), ConductorConfig::default()).unwrap();

        assert_eq!(conductor.backend().name(), "Mock");
        assert!(conductor.registry().is_initialized());
        assert_eq!(conductor.config().model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_handle_request_streams_tokens() {
        let conductor =
            Conductor::new(MockBackend, ToolRegistry::new(), ConductorConfig::default()).unwrap();

        let (mut rx, handle) = conductor.handle_request(request());
        let mut kinds = Vec::new();
        while let Some(envelope) = rx.recv().await {
            assert_eq!(envelope.session_id, SessionId::from("s-1"));
            kinds.push(envelope.event.kind());
        }

        assert_eq!(kinds, vec!["start", "token", "token", "done"]);
        assert_eq!(
            handle.await.unwrap(),
            SessionOutcome::Done { total_chunks: 2 }
        );
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let conductor =
            Conductor::new(MockBackend, ToolRegistry::new(), ConductorConfig::default()).unwrap();

        let (mut rx_a, a) = conductor.handle_request(request());
        let (mut rx_b, b) = conductor.handle_request(request());

        for rx in [&mut rx_a, &mut rx_b] {
            let mut last_index = 0;
            while let Some(envelope) = rx.recv().await {
                if let DownstreamEvent::Token { chunk_index, .. } = envelope.event {
                    assert_eq!(chunk_index, last_index + 1);
                    last_index = chunk_index;
                }
            }
            assert_eq!(last_index, 2);
        }
        assert!(a.await.unwrap().is_done());
        assert!(b.await.unwrap().is_done());
    }
}
