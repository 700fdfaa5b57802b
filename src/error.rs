use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue, scheduler, and dead-letter operations.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job '{0}' is already queued or active")]
    DuplicateJob(String),

    #[error("Schedule '{0}' is already registered")]
    DuplicateSchedule(String),

    #[error("Invalid interval spec: {0}")]
    InvalidInterval(String),

    #[error("Dead-letter entry not found: {0}")]
    EntryNotFound(String),
}

/// Job execution outcome reported by a handler - determines retry behavior.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Transient failure - the queue schedules a retry if attempts remain.
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent failure - the job is failed immediately, remaining attempts
    /// are not consumed.
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    /// Create a retryable error.
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

/// Classification consumed by [`RetryExecutor`](crate::retry::RetryExecutor).
///
/// `retry_after` surfaces a server-supplied wait hint; when present it
/// overrides the computed backoff delay entirely.
pub trait RetryableError {
    /// Whether the failed operation is worth re-attempting.
    fn is_retryable(&self) -> bool;

    /// Explicit wait hint carried by the error, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for JobError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Outcome of a call against an external system (HTTP API, webhook target).
///
/// Integration handlers map transport results into this shape so the default
/// retry classification (429 and 5xx retryable, other 4xx permanent, network
/// failures transient) applies without a custom predicate.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// Non-success HTTP status, with an optional `Retry-After` header value
    /// (delta-seconds or an HTTP-date).
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<String>,
    },

    /// Connection-level failure (refused, reset, DNS, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The request itself is invalid; retrying cannot help.
    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl CallError {
    /// Shorthand for an HTTP error without a `Retry-After` hint.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify a raw transport error message: recognized network-failure
    /// signatures become [`CallError::Network`], everything else
    /// [`CallError::Invalid`].
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        const SIGNATURES: &[&str] = &[
            "connection refused",
            "connection reset",
            "broken pipe",
            "dns",
            "tls",
            "socket",
            "econn",
        ];
        if lowered.contains("timed out") || lowered.contains("timeout") {
            Self::Timeout(message)
        } else if SIGNATURES.iter().any(|sig| lowered.contains(sig)) {
            Self::Network(message)
        } else {
            Self::Invalid(message)
        }
    }
}

impl RetryableError for CallError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Invalid(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http {
                retry_after: Some(value),
                ..
            } => parse_retry_after(value),
            _ => None,
        }
    }
}

/// Parse a `Retry-After` value: delta-seconds, or an HTTP-date (RFC 2822).
///
/// An HTTP-date in the past yields a zero wait rather than `None` - the server
/// did answer, the cooldown has simply elapsed.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when: DateTime<Utc> = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((when - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}
