//! # flux-queue: Resilient In-Process Job Execution
//!
//! The asynchronous substrate behind integration-heavy automation services:
//! platform publishers, content-pipeline stages, analytics aggregation, and
//! cleanup tasks all hand their work to this crate instead of re-inventing
//! failure handling per integration.
//!
//! ## Components
//!
//! - **[`JobQueue`]** - priority-ordered, concurrency-limited dispatcher with
//!   per-job linear retry and a broadcast lifecycle-event protocol
//! - **[`JobScheduler`]** - fires named handlers on recurring intervals
//!   (hourly/daily/weekly/monthly or an explicit period)
//! - **[`CircuitBreaker`]** - gates admission to a failing downstream
//!   operation, with a named [`CircuitBreakerRegistry`]
//! - **[`RetryExecutor`]** - bounded retry with exponential backoff, jitter,
//!   and Retry-After hints
//! - **[`DeadLetterQueue`]** - bounded store of permanently-failed work items
//!   for manual or bulk reprocessing
//!
//! Each component owns only its own escalation boundary; composition is the
//! caller's: a queue handler typically calls through a [`RetryExecutor`],
//! which may wrap a [`CircuitBreaker`]-guarded call, and a subscriber forwards
//! terminally-failed jobs into a [`DeadLetterQueue`]. Nothing here persists
//! across a process restart; durability, if wanted, hangs off the dead-letter
//! snapshot hook.
//!
//! ## Quick Start
//!
//! ```no_run
//! use flux_queue::prelude::*;
//! use serde_json::json;
//!
//! async fn publish(payload: serde_json::Value) -> Result<(), CallError> {
//!     let _ = payload;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = JobQueue::new("publish", QueueConfig::default());
//!     let breakers = CircuitBreakerRegistry::default();
//!     let retry = RetryExecutor::with_defaults();
//!
//!     let breaker = breakers.get_or_create("meta-api");
//!     queue.process(move |job| {
//!         let breaker = breaker.clone();
//!         let retry = retry.clone();
//!         async move {
//!             retry
//!                 .execute(|| breaker.execute(|| publish(job.payload.clone())))
//!                 .await
//!                 .map_err(|err| JobError::retryable(err.to_string()))?;
//!             Ok(None)
//!         }
//!         .boxed()
//!     });
//!
//!     queue
//!         .add(
//!             json!({"post": "launch"}),
//!             JobOptions::default().with_priority(JobPriority::High),
//!         )
//!         .unwrap();
//!     queue.drain().await;
//! }
//! ```

pub mod breaker;
pub mod dlq;
pub mod error;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod types;

// Core API exports
pub use breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use dlq::{
    DeadLetterConfig, DeadLetterEntry, DeadLetterQueue, DeadLetterSnapshot, DeadLetterStats,
    FailureDetail, RetryReport,
};
pub use error::{CallError, JobError, QueueError, QueueResult, RetryableError};
pub use queue::{JobHandler, JobQueue, QueueConfig, QueueStats};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{IntervalSpec, JobScheduler, ScheduleHandler, ScheduledJob};
pub use types::{BoxStream, Job, JobId, JobOptions, JobPriority, JobStatus, QueueEvent};

/// Everything a job-producing or job-handling module needs.
pub mod prelude {
    // Queue and work items
    pub use crate::{
        Job, JobId, JobOptions, JobPriority, JobQueue, JobStatus, QueueConfig, QueueEvent,
    };

    // Failure handling
    pub use crate::{
        CallError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
        DeadLetterQueue, FailureDetail, JobError, QueueError, QueueResult, RetryConfig,
        RetryExecutor, RetryableError,
    };

    // Scheduling
    pub use crate::{IntervalSpec, JobScheduler};

    // Boxed-future plumbing for handlers
    pub use futures::future::BoxFuture;
    pub use futures::FutureExt;
}
