//! Failure classification and exponential backoff
//!
//! Attempt 0 runs immediately. After a retryable failure the turn loop waits
//! `initial_delay * 2^(attempt-1)` before the next attempt, up to the
//! configured retry count; exhausting retries re-raises the last error as
//! terminal. The backoff wait is cancellable and a cancelled wait is
//! distinguishable from a completed one, so no further network call is
//! issued after cancellation.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after backoff
    Retryable,
    /// Stops the turn immediately
    Terminal,
}

/// Exponential backoff policy for API calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    /// Policy with the given base delay and retry budget
    pub fn new(initial_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            max_retries,
        }
    }

    /// Policy from engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_retry_delay_ms),
            config.max_retries,
        )
    }

    /// Maximum retry attempts after the initial call
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Classifies a failure
    ///
    /// Network-level failures and server errors are retryable; client
    /// errors, blocked content, stream failures, loop-limit trips, and
    /// cancellation are terminal. Errors that are not [`EngineError`] carry
    /// no classification hint and are treated as terminal.
    pub fn classify(err: &anyhow::Error) -> ErrorClass {
        match err.downcast_ref::<EngineError>() {
            Some(engine_err) if engine_err.is_retryable() => ErrorClass::Retryable,
            _ => ErrorClass::Terminal,
        }
    }

    /// Backoff delay before attempt `attempt + 1`, for `attempt >= 1`
    ///
    /// `delay_for_attempt(n) = initial_delay * 2^(n-1)`, so with a 100ms
    /// base the sequence is 100, 200, 400, ...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1);
        self.initial_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Suspends for the backoff delay before the given attempt
    ///
    /// Resolves `Ok(())` when the delay completes. If the cancellation
    /// token fires first, the wait aborts immediately with
    /// [`EngineError::Cancelled`] without completing the delay.
    pub async fn wait_before_retry(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        let delay = self.delay_for_attempt(attempt);
        debug!(attempt, ?delay, "backing off before retry");

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled.into()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
