//! Per-item retry budget and timeout backoff.

use std::time::Duration;

use crate::error::DispatchError;

/// Retry contract consulted by network workers on transient failures.
pub trait RetryPolicy: Send {
    /// Timeout for the next attempt.
    fn current_timeout(&self) -> Duration;

    /// Number of retries prepared so far.
    fn current_attempt_count(&self) -> u32;

    /// Prepare another attempt, or hand `error` back unchanged when the
    /// budget is spent.
    fn retry(&mut self, error: DispatchError) -> Result<(), DispatchError>;
}

/// Parameters of [`DefaultRetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct RetryConfig {
    pub initial_timeout: Duration,
    pub max_retries: u32,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(2500),
            max_retries: 1,
            backoff_multiplier: 1.0,
        }
    }
}

/// Fixed attempt budget; each retry grows the timeout by
/// `timeout * backoff_multiplier`, saturating at `Duration::MAX`.
///
/// A negative multiplier is treated as zero and a non-finite one as 1.0.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    current_timeout: Duration,
    current_retry_count: u32,
    max_retries: u32,
    backoff_multiplier: f32,
}

impl DefaultRetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        let backoff_multiplier = if config.backoff_multiplier.is_finite() {
            config.backoff_multiplier.max(0.0)
        } else {
            tracing::warn!(
                multiplier = %config.backoff_multiplier,
                "non-finite backoff multiplier; using 1.0"
            );
            1.0
        };
        Self {
            current_timeout: config.initial_timeout,
            current_retry_count: 0,
            max_retries: config.max_retries,
            backoff_multiplier,
        }
    }

    pub fn backoff_multiplier(&self) -> f32 {
        self.backoff_multiplier
    }

    fn grown_timeout(&self) -> Duration {
        let secs = self.current_timeout.as_secs_f64() * f64::from(self.backoff_multiplier);
        let growth = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        self.current_timeout.saturating_add(growth)
    }

    fn has_attempt_remaining(&self) -> bool {
        self.current_retry_count <= self.max_retries
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    fn current_attempt_count(&self) -> u32 {
        self.current_retry_count
    }

    fn retry(&mut self, error: DispatchError) -> Result<(), DispatchError> {
        self.current_retry_count = self.current_retry_count.saturating_add(1);
        self.current_timeout = self.grown_timeout();
        if self.has_attempt_remaining() {
            Ok(())
        } else {
            Err(error)
        }
    }
}
