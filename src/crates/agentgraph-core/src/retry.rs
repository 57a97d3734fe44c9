//! Retry with exponential backoff
//!
//! [`RetryPolicy`] describes how often and how patiently a failing
//! operation is retried. It is used in two places:
//!
//! - per node, via [`StateGraph::add_node_with_retry`](crate::StateGraph::add_node_with_retry):
//!   a node that returns an error is re-run with a fresh context
//! - around LLM calls, via [`retry_async`]: structured-output parsing and
//!   transient provider errors
//!
//! Delay before retry `n` (0-based) is
//! `min(initial_interval * backoff_factor^n, max_interval)`, multiplied by a
//! random factor in `[0.5, 1.5]` when jitter is on.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: usize,

    /// Seconds before the first retry
    pub initial_interval: f64,

    pub backoff_factor: f64,

    /// Upper bound on any single delay, in seconds
    pub max_interval: f64,

    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// Retry immediately, without delay
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts)
            .with_initial_interval(0.0)
            .with_jitter(false)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_interval * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_interval).max(0.0);

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Run `op` until it succeeds, the error is not retryable, or the policy is
/// exhausted; the last error is returned in the latter two cases
pub async fn retry_async<T, E, F, Fut, P>(policy: &RetryPolicy, is_retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !is_retryable(&err) || !policy.should_retry(attempt) {
                    return Err(err);
                }
                let delay = policy.calculate_delay(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
