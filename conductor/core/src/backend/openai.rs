//! OpenAI-Style Backend Implementation
//!
//! Backend for servers exposing the chat-completions API.
//!
//! # API
//!
//! - `POST {base_url}/chat/completions` with `stream: true` answers with a
//!   `text/event-stream` body of `data: {...}` lines ending in `data: [DONE]`.
//!   The raw bytes are handed to the session, which owns decoding.
//! - The same endpoint with `stream: false` answers with one JSON document.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;

use super::traits::{
    BackendError, ByteStream, CompletionBackend, CompletionRequest, CompletionResponse,
};
use crate::config::UpstreamConfig;

/// Upper bound on how much of an error body is kept for logs
const MAX_ERROR_BODY: usize = 2048;

/// Chat-completions client
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Base URL without trailing slash (e.g. `https://api.openai.com/v1`)
    base_url: String,
    /// Bearer token
    api_key: Option<String>,
    /// Budget for non-streaming calls
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Create a backend
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, BackendError> {
        Self::with_timeouts(
            base_url,
            api_key,
            Duration::from_secs(10),
            Duration::from_secs(60),
        )
    }

    /// Create a backend with explicit connect and request timeouts
    ///
    /// Streaming calls only get the connect timeout; their total duration is
    /// bounded by the session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if the HTTP client cannot be built.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            request_timeout,
            http_client,
        })
    }

    /// Create from the `[upstream]` config section
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`; a missing key is allowed (local servers rarely need one).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if the HTTP client cannot be built.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, BackendError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::debug!(env = %config.api_key_env, "No upstream API key set");
        }
        Self::with_timeouts(
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Base URL in use
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat-completions endpoint URL
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn post(&self, request: &CompletionRequest) -> reqwest::RequestBuilder {
        let builder = self.http_client.post(self.completions_url()).json(request);
        match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Deserialize)]
struct CompletionWire {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChoiceWire>,
}

#[derive(Deserialize)]
struct ChoiceWire {
    #[serde(default)]
    message: Option<MessageWire>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct MessageWire {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn open_stream(&self, request: &CompletionRequest) -> Result<ByteStream, BackendError> {
        let mut request = request.clone();
        request.stream = true;

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Opening upstream stream"
        );

        let response = self
            .post(&request)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        Ok(Box::pin(response.bytes_stream().map_err(BackendError::from)))
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        let mut request = request.clone();
        request.stream = false;

        let response = self
            .post(&request)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let wire: CompletionWire = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let choice = wire.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            model: wire.model,
            finish_reason,
        })
    }
}
