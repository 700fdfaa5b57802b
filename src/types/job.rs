use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{JobId, JobPriority};

/// Job status lifecycle.
///
/// Transitions only move forward: `Pending`/`Delayed` → `Active` →
/// `Completed`, back to `Pending` for a retry, or `Failed` once attempts are
/// exhausted. `Paused` marks a waiting job while its queue is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be dispatched.
    Pending,

    /// Waiting for a submission delay to elapse.
    Delayed,

    /// Handler invocation in flight.
    Active,

    /// Handler returned successfully.
    Completed,

    /// Handler failed on every permitted attempt (or permanently).
    Failed,

    /// Waiting, but the owning queue is paused.
    Paused,
}

impl JobStatus {
    /// Check whether the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Get the status name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A unit of work tracked by a [`JobQueue`](crate::queue::JobQueue).
///
/// Mutated exclusively by the queue's dispatch loop and retained in memory for
/// the life of the process; failed jobs stay queryable rather than being
/// dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,

    /// Name of the owning queue.
    pub queue: String,

    /// Opaque payload, interpreted only by the handler.
    pub payload: serde_json::Value,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Dispatch priority.
    pub priority: JobPriority,

    /// Number of handler invocations so far (monotonically non-decreasing).
    pub attempts: u32,

    /// Maximum handler invocations before the job is failed.
    pub max_attempts: u32,

    /// Optional ceiling on a single handler invocation. `None` inherits the
    /// unbounded behavior: a hung handler occupies a concurrency slot
    /// indefinitely.
    pub timeout: Option<Duration>,

    /// When the job was submitted.
    pub created_at: DateTime<Utc>,

    /// When the most recent handler invocation started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,

    /// Message of the most recent handler failure.
    pub failed_reason: Option<String>,

    /// Value returned by a successful handler invocation.
    pub result: Option<serde_json::Value>,
}

/// Submission options for [`JobQueue::add`](crate::queue::JobQueue::add).
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Dispatch priority.
    pub priority: JobPriority,

    /// Delay before the job becomes eligible for dispatch.
    pub delay: Duration,

    /// Caller-assigned identifier for idempotent resubmission.
    pub id: Option<String>,

    /// Maximum handler invocations.
    pub max_attempts: u32,

    /// Optional per-invocation handler timeout.
    pub timeout: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::default(),
            delay: Duration::ZERO,
            id: None,
            max_attempts: 3,
            timeout: None,
        }
    }
}

impl JobOptions {
    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Delay eligibility for dispatch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Assign an explicit job id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the maximum handler invocations.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Bound a single handler invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
