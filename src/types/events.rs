use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use super::{JobId, JobPriority};

/// Type alias for boxed event streams (stable Rust compatible).
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Minimal stable event protocol emitted by a queue.
///
/// This is the multi-subscriber replacement for per-queue completion/failure
/// callbacks: consumers subscribe via
/// [`JobQueue::subscribe`](crate::queue::JobQueue::subscribe) or
/// [`JobQueue::event_stream`](crate::queue::JobQueue::event_stream) and react
/// to transitions — e.g. forwarding a `Failed` job into a dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Job was accepted into the waiting set (or delayed).
    Added {
        job_id: JobId,
        queue: String,
        priority: JobPriority,
        at: DateTime<Utc>,
    },

    /// Job was dispatched to the handler.
    Started {
        job_id: JobId,
        attempt: u32,
        at: DateTime<Utc>,
    },

    /// Handler returned successfully.
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Handler failed with attempts remaining; re-insertion is scheduled.
    Retrying {
        job_id: JobId,
        attempt: u32,
        retry_in: Duration,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job failed terminally.
    Failed {
        job_id: JobId,
        attempts: u32,
        error: String,
        at: DateTime<Utc>,
    },

    /// Dispatch was paused for the whole queue.
    Paused { queue: String, at: DateTime<Utc> },

    /// Dispatch resumed.
    Resumed { queue: String, at: DateTime<Utc> },
}

impl QueueEvent {
    /// Get the event type name as a string.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
        }
    }

    /// Get the job this event concerns, if any (queue-level events carry none).
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Added { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. } => Some(job_id),
            Self::Paused { .. } | Self::Resumed { .. } => None,
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Added { at, .. }
            | Self::Started { at, .. }
            | Self::Completed { at, .. }
            | Self::Retrying { at, .. }
            | Self::Failed { at, .. }
            | Self::Paused { at, .. }
            | Self::Resumed { at, .. } => at,
        }
    }
}
