//! Upstream retry policy
//!
//! Retries only ever wrap opening the stream. Once the first byte of a
//! response body has been read, a retry would duplicate output, so the session
//! never retries past that point.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendError;

/// Retry configuration for opening the upstream stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries (0 disables retrying)
    pub max_retries: u32,

    /// Initial backoff delay
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f32,

    /// Add jitter to backoff
    pub use_jitter: bool,

    /// Retry on these status codes
    pub retry_status_codes: Vec<u16>,

    /// Retry on connection errors and connect timeouts
    pub retry_on_connection_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            retry_status_codes: vec![429, 500, 502, 503, 504],
            retry_on_connection_error: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for attempt N (0-indexed)
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base = self.initial_backoff_ms as f64 * f64::from(self.backoff_multiplier).powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let duration_ms = if self.use_jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            (capped * (1.0 + jitter)) as u64
        } else {
            capped as u64
        };

        Duration::from_millis(duration_ms)
    }

    /// Check if a status code should trigger a retry
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }

    /// Whether a failed attempt to open the stream may be retried
    #[must_use]
    pub fn should_retry(&self, error: &BackendError) -> bool {
        match error {
            BackendError::Status { status, .. } => self.should_retry_status(*status),
            BackendError::Network(_) | BackendError::Timeout => self.retry_on_connection_error,
            BackendError::Decode(_) | BackendError::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            use_jitter: false,
            ..RetryConfig::default()
        };

        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.backoff_for_attempt(20), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_bounded() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let backoff = config.backoff_for_attempt(1);
            assert!(backoff >= Duration::from_millis(200));
            assert!(backoff <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::default();
        let status = |status| BackendError::Status {
            status,
            body: String::new(),
        };

        assert!(config.should_retry(&status(503)));
        assert!(config.should_retry(&status(429)));
        assert!(!config.should_retry(&status(400)));
        assert!(!config.should_retry(&status(401)));
        assert!(config.should_retry(&BackendError::Network("reset".to_string())));
        assert!(!config.should_retry(&BackendError::Decode("bad".to_string())));

        let no_conn = RetryConfig {
            retry_on_connection_error: false,
            ..RetryConfig::default()
        };
        assert!(!no_conn.should_retry(&BackendError::Timeout));
    }
}
