//! # Retry Policy
//!
//! Two retry loops wrap every step:
//!
//! - **Inner**: [`RetryPolicy::run_inner`] repeats a single remote call a few
//!   times with a fixed delay, smoothing over transient network and 5xx
//!   failures while the worker keeps the message.
//! - **Outer**: [`RetryPolicy::decide`] runs after a step fails and chooses
//!   between re-submitting the step with a backoff delay and escalating to
//!   the failure compensator. The attempt counter travels with the queued
//!   message, so the worker is released while the step waits.
//!
//! Classification is read from [`StepError::kind`]; the policy never looks at
//! message text.

use crate::config::RetryConfig;
use crate::error::{ErrorKind, StepError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-submit the step after `delay`
    Retry { delay: Duration },
    /// Stop retrying and hand the failure to the compensator
    Escalate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    backoff_multiplier: f64,
    max_backoff: Duration,
    inner_attempts: u32,
    inner_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_secs(config.backoff_seconds),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_backoff: Duration::from_secs(config.max_backoff_seconds),
            inner_attempts: config.inner_attempts.max(1),
            inner_delay: Duration::from_millis(config.inner_delay_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn inner_attempts(&self) -> u32 {
        self.inner_attempts
    }

    pub fn inner_delay(&self) -> Duration {
        self.inner_delay
    }

    pub fn classify(error: &StepError) -> ErrorKind {
        error.kind()
    }

    /// Outer decision for a step that failed on `attempt` (1-based)
    pub fn decide(&self, error: &StepError, attempt: u32) -> RetryDecision {
        if Self::classify(error).is_retryable() && attempt < self.max_attempts {
            RetryDecision::Retry {
                delay: self.backoff_for(attempt),
            }
        } else {
            RetryDecision::Escalate
        }
    }

    /// Delay before attempt `attempt + 1`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let seconds = self.backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // capped in f64 first; Duration::from_secs_f64 panics on overflow
        Duration::from_secs_f64(seconds.min(self.max_backoff.as_secs_f64()))
    }

    /// Run `op` up to `inner_attempts` times, retrying only transient failures
    pub async fn run_inner<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind() == ErrorKind::Transient && attempt < self.inner_attempts => {
                    debug!(
                        operation = operation,
                        attempt = attempt,
                        error = %err,
                        "Transient failure, retrying remote call"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.inner_delay).await;
                }
                Err(err) => {
                    if err.kind() == ErrorKind::Transient {
                        warn!(
                            operation = operation,
                            attempts = attempt,
                            error = %err,
                            "Remote call still failing after inner retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
