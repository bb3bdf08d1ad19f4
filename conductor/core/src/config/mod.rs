//! TOML Configuration File Support
//!
//! Centralized configuration loading for the conductor, supporting a TOML
//! file at `~/.config/chat-conductor/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`CONDUCTOR_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/chat-conductor/conductor.toml`
//!   (typically `~/.config/chat-conductor/conductor.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [upstream]
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//! model = "gpt-4o-mini"
//! request_timeout_secs = 60
//!
//! [streaming]
//! stream_read_timeout_secs = 120
//! overall_timeout_secs = 300
//! event_channel_capacity = 64
//! fallback_failure_policy = "fail_fast"
//! inline_tool_execution = true
//!
//! [retry]
//! max_retries = 3
//! initial_backoff_ms = 100
//! retry_status_codes = [429, 500, 502, 503, 504]
//! ```

mod retry;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use retry::RetryConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Policies
// =============================================================================

/// What a tool handler failure does after the stream has ended
///
/// Failures while the stream is still running are always reported as
/// `tool_error` and the response continues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackFailurePolicy {
    /// Report `tool_error`, then end the whole request with `error`
    #[default]
    FailFast,
    /// Report `tool_error` and keep going with the remaining calls
    Isolate,
}

impl FromStr for FallbackFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" | "failfast" => Ok(Self::FailFast),
            "isolate" => Ok(Self::Isolate),
            other => Err(ConfigError::ValidationError(format!(
                "unknown fallback failure policy '{other}' (expected fail_fast or isolate)"
            ))),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Upstream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Base URL of the chat-completions API
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,

    /// Timeout for non-streaming calls in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Streaming section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Budget for reading the initial stream, in seconds
    pub stream_read_timeout_secs: Option<u64>,

    /// Budget for the whole request, in seconds
    pub overall_timeout_secs: Option<u64>,

    /// Capacity of the downstream event channel
    pub event_channel_capacity: Option<usize>,

    /// Handler failure policy after the stream ends
    pub fallback_failure_policy: Option<FallbackFailurePolicy>,

    /// Run tool calls as soon as their arguments complete
    pub inline_tool_execution: Option<bool>,

    /// Text sent when the model returns nothing at all
    pub fallback_message: Option<String>,
}

/// Retry section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Maximum number of retries
    pub max_retries: Option<u32>,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: Option<u64>,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: Option<u64>,

    /// Backoff multiplier
    pub backoff_multiplier: Option<f32>,

    /// Add jitter to backoff
    pub use_jitter: Option<bool>,

    /// Statuses that trigger a retry
    pub retry_status_codes: Option<Vec<u16>>,

    /// Retry on connection errors
    pub retry_on_connection_error: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Upstream configuration section
    pub upstream: UpstreamToml,

    /// Streaming configuration section
    pub streaming: StreamingToml,

    /// Retry configuration section
    pub retry: RetryToml,
}

// =============================================================================
// Main Configuration Structs
// =============================================================================

/// Upstream completion API settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Base URL of the chat-completions API
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Model identifier
    pub model: String,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Timeout for non-streaming calls in seconds
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

/// Per-session streaming settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Budget for reading the initial stream
    pub stream_read_timeout: Duration,
    /// Budget for the whole request (including tools and follow-up)
    pub overall_timeout: Duration,
    /// Capacity of the downstream event channel
    pub event_channel_capacity: usize,
    /// Handler failure policy after the stream ends
    pub fallback_failure_policy: FallbackFailurePolicy,
    /// Run tool calls mid-stream; when off every call waits for the stream end
    pub inline_tool_execution: bool,
    /// Text sent when the model returns nothing at all
    pub fallback_message: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            stream_read_timeout: Duration::from_secs(120),
            overall_timeout: Duration::from_secs(300),
            event_channel_capacity: 64,
            fallback_failure_policy: FallbackFailurePolicy::FailFast,
            inline_tool_execution: true,
            fallback_message: "Sorry, I couldn't put a reply together just now. \
                               Could you try sending that again?"
                .to_string(),
        }
    }
}

/// Centralized configuration for the conductor
///
/// Consolidates all configuration from multiple sources and tracks where it
/// came from. Use [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct ConductorConfig {
    /// Upstream completion API
    pub upstream: UpstreamConfig,

    /// Streaming session behaviour
    pub streaming: StreamingConfig,

    /// Retry policy for opening the stream
    pub retry: RetryConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl ConductorConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "upstream.base_url must not be empty".to_string(),
            ));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "upstream.model must not be empty".to_string(),
            ));
        }
        if self.streaming.stream_read_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "streaming.stream_read_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.streaming.overall_timeout < self.streaming.stream_read_timeout {
            return Err(ConfigError::ValidationError(format!(
                "streaming.overall_timeout_secs ({}) must be >= stream_read_timeout_secs ({})",
                self.streaming.overall_timeout.as_secs(),
                self.streaming.stream_read_timeout.as_secs()
            )));
        }
        if self.streaming.event_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.event_channel_capacity must be > 0".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-conductor/conductor.toml` or
/// `~/.config/chat-conductor/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-conductor").join("conductor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// merged configuration is invalid. A missing config file is not an error.
pub fn load_config() -> Result<ConductorConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the merged configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ConductorConfig, ConfigError> {
    let mut config = ConductorConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConductorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config)?;
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ConductorConfig, toml: &ConductorToml) {
    // Upstream
    if let Some(ref url) = toml.upstream.base_url {
        config.upstream.base_url.clone_from(url);
    }
    if let Some(ref env) = toml.upstream.api_key_env {
        config.upstream.api_key_env.clone_from(env);
    }
    if let Some(ref model) = toml.upstream.model {
        config.upstream.model.clone_from(model);
    }
    if let Some(secs) = toml.upstream.connect_timeout_secs {
        config.upstream.connect_timeout_secs = secs;
    }
    if let Some(secs) = toml.upstream.request_timeout_secs {
        config.upstream.request_timeout_secs = secs;
    }

    // Streaming
    if let Some(secs) = toml.streaming.stream_read_timeout_secs {
        config.streaming.stream_read_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.streaming.overall_timeout_secs {
        config.streaming.overall_timeout = Duration::from_secs(secs);
    }
    if let Some(capacity) = toml.streaming.event_channel_capacity {
        config.streaming.event_channel_capacity = capacity;
    }
    if let Some(policy) = toml.streaming.fallback_failure_policy {
        config.streaming.fallback_failure_policy = policy;
    }
    if let Some(inline) = toml.streaming.inline_tool_execution {
        config.streaming.inline_tool_execution = inline;
    }
    if let Some(ref message) = toml.streaming.fallback_message {
        config.streaming.fallback_message.clone_from(message);
    }

    // Retry
    if let Some(n) = toml.retry.max_retries {
        config.retry.max_retries = n;
    }
    if let Some(ms) = toml.retry.initial_backoff_ms {
        config.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = toml.retry.max_backoff_ms {
        config.retry.max_backoff_ms = ms;
    }
    if let Some(multiplier) = toml.retry.backoff_multiplier {
        config.retry.backoff_multiplier = multiplier;
    }
    if let Some(jitter) = toml.retry.use_jitter {
        config.retry.use_jitter = jitter;
    }
    if let Some(ref codes) = toml.retry.retry_status_codes {
        config.retry.retry_status_codes.clone_from(codes);
    }
    if let Some(retry) = toml.retry.retry_on_connection_error {
        config.retry.retry_on_connection_error = retry;
    }
}

/// Apply environment variable overrides to the config
///
/// Unparseable numeric values are ignored with a warning; an unknown policy
/// name is an error.
fn apply_env_config(config: &mut ConductorConfig) -> Result<(), ConfigError> {
    fn parse_env<T: FromStr>(name: &str) -> Option<T> {
        let raw = std::env::var(name).ok()?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment value");
                None
            }
        }
    }

    if let Ok(url) = std::env::var("CONDUCTOR_BASE_URL") {
        config.upstream.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("CONDUCTOR_MODEL") {
        config.upstream.model = model;
        config.source = ConfigSource::Env;
    }
    if let Ok(env) = std::env::var("CONDUCTOR_API_KEY_ENV") {
        config.upstream.api_key_env = env;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parse_env::<u64>("CONDUCTOR_STREAM_TIMEOUT") {
        config.streaming.stream_read_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parse_env::<u64>("CONDUCTOR_OVERALL_TIMEOUT") {
        config.streaming.overall_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parse_env::<u32>("CONDUCTOR_MAX_RETRIES") {
        config.retry.max_retries = n;
        config.source = ConfigSource::Env;
    }
    if let Ok(policy) = std::env::var("CONDUCTOR_FALLBACK_POLICY") {
        config.streaming.fallback_failure_policy = policy.parse()?;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides,
/// then call [`ConductorConfig::validate`].
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// Model override
    pub model: Option<String>,

    /// Stream read timeout override (seconds)
    pub stream_read_timeout_secs: Option<u64>,

    /// Overall timeout override (seconds)
    pub overall_timeout_secs: Option<u64>,

    /// Fallback failure policy override
    pub fallback_failure_policy: Option<FallbackFailurePolicy>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set stream read timeout override
    #[must_use]
    pub fn with_stream_read_timeout_secs(mut self, secs: u64) -> Self {
        self.stream_read_timeout_secs = Some(secs);
        self
    }

    /// Set overall timeout override
    #[must_use]
    pub fn with_overall_timeout_secs(mut self, secs: u64) -> Self {
        self.overall_timeout_secs = Some(secs);
        self
    }

    /// Set fallback failure policy override
    #[must_use]
    pub fn with_fallback_failure_policy(mut self, policy: FallbackFailurePolicy) -> Self {
        self.fallback_failure_policy = Some(policy);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ConductorConfig) {
        if self.base_url.is_some()
            || self.model.is_some()
            || self.stream_read_timeout_secs.is_some()
            || self.overall_timeout_secs.is_some()
            || self.fallback_failure_policy.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.upstream.base_url.clone_from(url);
        }
        if let Some(ref model) = self.model {
            config.upstream.model.clone_from(model);
        }
        if let Some(secs) = self.stream_read_timeout_secs {
            config.streaming.stream_read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.overall_timeout_secs {
            config.streaming.overall_timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = self.fallback_failure_policy {
            config.streaming.fallback_failure_policy = policy;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
