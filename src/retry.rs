//! Retry-with-backoff executor for arbitrary asynchronous operations.
//!
//! Backoff is exponential with a cap and a uniform jitter window; a
//! server-supplied Retry-After hint on the failing error overrides the
//! computed delay entirely. This policy is deliberately distinct from the
//! linear per-job retry delay inside [`JobQueue`](crate::queue::JobQueue) -
//! callers depend on both behaviors.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::RetryableError;

/// Configuration for [`RetryExecutor`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt (total invocations = retries + 1).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Ceiling on any computed delay.
    pub max_delay: Duration,

    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,

    /// Half-width of the jitter window as a fraction of the computed delay:
    /// the delay is drawn uniformly from `[d*(1-j), d*(1+j)]`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Repeatedly invokes an operation until it succeeds, a non-retryable error
/// occurs, or attempts are exhausted - at which point the last error is
/// returned.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create an executor with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute with the error type's own retryable classification.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        self.execute_with(op, E::is_retryable).await
    }

    /// Execute with an explicit retryable predicate, overriding the error
    /// type's default classification (e.g. to refuse retrying through an
    /// open circuit).
    pub async fn execute_with<T, E, F, Fut, P>(&self, mut op: F, retry_on: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !retry_on(&err) {
                        debug!(error = %err, "non-retryable error, aborting");
                        return Err(err);
                    }
                    if attempt >= self.config.max_retries {
                        warn!(
                            error = %err,
                            attempts = attempt + 1,
                            "retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = match err.retry_after() {
                        Some(hint) => {
                            debug!(delay_ms = hint.as_millis() as u64, "honoring retry-after hint");
                            hint
                        }
                        None => self.backoff_delay(attempt),
                    };
                    warn!(
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Computed delay before retry number `attempt + 1` (attempt is 0-indexed):
    /// `min(base * multiplier^attempt, max)` widened by the jitter window.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_millis() as f64);
        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Duration::from_millis(capped as u64);
        }
        let low = capped * (1.0 - jitter);
        let high = capped * (1.0 + jitter);
        let sampled = rand::thread_rng().gen_range(low..=high);
        Duration::from_millis(sampled as u64)
    }
}
