//! Circuit breaker guarding a single downstream operation.
//!
//! Admission is checked synchronously before the guarded call runs; an open
//! circuit rejects with a dedicated [`BreakerError::Open`] without invoking
//! the operation and without counting as a failure attempt. The
//! `Open → HalfOpen` transition happens lazily, on the first admission check
//! (or [`CircuitBreaker::state`] call) after the reset timeout has elapsed.

pub mod registry;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::RetryableError;

pub use registry::CircuitBreakerRegistry;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,

    /// All calls are rejected until the reset timeout elapses.
    Open,

    /// A bounded number of probe calls test whether the downstream recovered.
    HalfOpen,
}

impl CircuitState {
    /// Get the state name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive guarded failures that trip `Closed → Open`.
    pub failure_threshold: u32,

    /// Cooldown before an open circuit admits probe calls.
    pub reset_timeout: Duration,

    /// Hard ceiling on concurrently admitted calls while `HalfOpen`.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }
    }
}

/// Point-in-time counters for a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub half_open_in_flight: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Error returned by [`CircuitBreaker::execute`].
///
/// `Open` is raised when the call was never admitted; it is distinct from a
/// guarded-call failure so callers can fall back (e.g. serve stale cached
/// data) instead of treating it as a generic error.
#[derive(Error, Debug)]
pub enum BreakerError<E: std::error::Error> {
    /// The circuit rejected the call before it ran.
    #[error("Circuit '{name}' is open; retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    /// The guarded operation ran and failed.
    #[error(transparent)]
    Service(E),
}

impl<E: std::error::Error> BreakerError<E> {
    /// Whether this is an open-circuit rejection (the operation never ran).
    pub fn is_open_rejection(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

// An open-circuit rejection is transient by construction and carries the
// remaining cooldown, which doubles as a Retry-After hint for RetryExecutor.
// Callers that must not retry through an open circuit use `execute_with`.
impl<E: std::error::Error + RetryableError> RetryableError for BreakerError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Open { .. } => true,
            Self::Service(err) => err.is_retryable(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Open { retry_in, .. } => Some(*retry_in),
            Self::Service(err) => err.retry_after(),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            half_open_in_flight: 0,
            opened_at: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

/// Circuit breaker protecting one guarded operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Create a breaker with default configuration.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Get the breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation through the breaker.
    ///
    /// If admission is denied the operation is not invoked and
    /// [`BreakerError::Open`] is returned immediately; otherwise the outcome
    /// is recorded and drives the state machine.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        if let Err(retry_in) = self.try_acquire() {
            debug!(breaker = %self.name, retry_in_ms = retry_in.as_millis() as u64, "call rejected, circuit open");
            return Err(BreakerError::Open {
                name: self.name.clone(),
                retry_in,
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Service(err))
            }
        }
    }

    /// Current state, after the lazy `Open → HalfOpen` check.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Force the breaker back to `Closed` and clear the failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(breaker = %self.name, "reset to closed");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_in_flight = 0;
        inner.opened_at = None;
    }

    /// Force the breaker to `Open`, starting a fresh cooldown.
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        warn!(breaker = %self.name, "tripped open");
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_in_flight = 0;
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            half_open_in_flight: inner.half_open_in_flight,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
        }
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed >= self.config.reset_timeout {
            info!(breaker = %self.name, "cooldown elapsed, probing half-open");
            inner.state = CircuitState::HalfOpen;
            inner.half_open_in_flight = 0;
        }
    }

    fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => {
                inner.total_requests += 1;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_requests {
                    inner.half_open_in_flight += 1;
                    inner.total_requests += 1;
                    Ok(())
                } else {
                    // Probe slots are taken; a slot may free at any moment.
                    Err(Duration::ZERO)
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                Err(self.config.reset_timeout.saturating_sub(elapsed))
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        inner.last_success_at = Some(Utc::now());
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.name, "probe succeeded, closing circuit");
            inner.state = CircuitState::Closed;
            inner.half_open_in_flight = 0;
            inner.opened_at = None;
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, re-opening circuit");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_in_flight = 0;
            }
            CircuitState::Closed
                if inner.consecutive_failures >= self.config.failure_threshold =>
            {
                warn!(
                    breaker = %self.name,
                    failures = inner.consecutive_failures,
                    "failure threshold reached, opening circuit"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(100),
            half_open_max_requests: 1,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let result: Result<(), _> = breaker
            .execute(|| async { Err(CallError::http(503, "unavailable")) })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn opens_on_third_consecutive_failure() {
        let breaker = CircuitBreaker::new("meta-api", quick_config());

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Rejected without invoking the operation.
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), BreakerError<CallError>> = breaker
            .execute(|| async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_resets_consecutive_count() {
        let breaker = CircuitBreaker::new("meta-api", quick_config());

        fail(&breaker).await;
        fail(&breaker).await;
        let ok: Result<(), BreakerError<CallError>> = breaker.execute(|| async { Ok(()) }).await;
        assert!(ok.is_ok());
        assert_eq!(breaker.stats().consecutive_failures, 0);

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_after_cooldown_then_closes_on_success() {
        let breaker = CircuitBreaker::new("tiktok-api", quick_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let ok: Result<(), BreakerError<CallError>> = breaker.execute(|| async { Ok(()) }).await;
        assert!(ok.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("tiktok-api", quick_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().half_open_in_flight, 0);
    }

    #[tokio::test]
    async fn half_open_admission_is_a_hard_ceiling() {
        let breaker = Arc::new(CircuitBreaker::new("youtube-api", quick_config()));
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        let slow = breaker.execute(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<(), CallError>(())
        });
        let contender = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            breaker
                .execute(|| async { Ok::<(), CallError>(()) })
                .await
        };

        let (slow_result, contender_result) = tokio::join!(slow, contender);
        assert!(slow_result.is_ok());
        assert!(matches!(contender_result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn trip_and_reset() {
        let breaker = CircuitBreaker::with_defaults("stripe-api");
        breaker.trip();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        let ok: Result<(), BreakerError<CallError>> = breaker.execute(|| async { Ok(()) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn open_rejection_carries_retry_hint() {
        let breaker = CircuitBreaker::new("meta-api", quick_config());
        breaker.trip();
        let result: Result<(), BreakerError<CallError>> =
            breaker.execute(|| async { Ok(()) }).await;
        let err = result.unwrap_err();
        assert!(err.is_open_rejection());
        assert!(err.is_retryable());
        assert!(err.retry_after().unwrap() <= Duration::from_millis(100));
    }
}
