//! Deadlines and bounded exponential backoff for external calls.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// How external calls are retried.
///
/// Every attempt runs under `timeout`; a timeout counts as a retryable
/// failure. Only errors for which [`RagError::is_retryable`] holds are
/// retried. The delay before attempt `n + 1` is `initial_backoff * 2^(n - 1)`,
/// capped at ten seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Deadline for each attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}

impl RetryPolicy {
    /// Derive the policy from pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_backoff: config.initial_backoff,
            timeout: config.request_timeout,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RagError::Timeout {
                    operation: operation.to_string(),
                    after: self.timeout,
                }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(operation, attempt, error = %e, ?delay, "retrying after failure");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a long-running
/// ingestion.
///
/// Cancellation stops new embedding and upsert calls from being issued;
/// calls already in flight are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
