//! Bounded store of permanently-failed work items.
//!
//! Independent of the queue that produced the failures: callers record an
//! entry from a terminal-failure event and come back later for manual
//! inspection or bulk reprocessing. The store itself is in-memory only; an
//! optional snapshot hook lets a caller persist state externally after every
//! mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{JobError, QueueError, QueueResult};

/// Captured failure detail for a dead-letter entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Error message at the time of the terminal failure.
    pub message: String,

    /// Optional stack/context trace supplied by the caller.
    pub trace: Option<String>,
}

impl FailureDetail {
    /// Create a detail from a message alone.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    /// Attach a trace.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// A permanently-failed work item retained for reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Unique entry identifier.
    pub id: String,

    /// Queue the failed work item came from.
    pub origin_queue: String,

    /// The failed payload, unchanged.
    pub payload: serde_json::Value,

    /// Most recent captured error.
    pub error: FailureDetail,

    /// Reprocessing attempts recorded against this entry.
    pub attempts: u32,

    /// When the item first failed.
    pub first_failed_at: DateTime<Utc>,

    /// When the item most recently failed.
    pub last_failed_at: DateTime<Utc>,

    /// Free-form caller metadata.
    pub metadata: serde_json::Value,
}

/// Configuration for a dead-letter queue.
#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    /// Maximum retained entries; the oldest first-failure is evicted beyond
    /// this.
    pub max_entries: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

/// Snapshot hook invoked after every mutation with the full entry set.
///
/// The dead-letter queue holds no durable storage of its own; implement this
/// to mirror state into whatever store the application uses.
#[async_trait]
pub trait DeadLetterSnapshot: Send + Sync {
    async fn persist(&self, entries: Vec<DeadLetterEntry>);
}

/// Result of a bulk [`DeadLetterQueue::retry_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Aggregate view of the store.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterStats {
    pub total: usize,
    pub by_queue: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Bounded in-memory dead-letter store.
pub struct DeadLetterQueue {
    config: DeadLetterConfig,
    entries: Arc<Mutex<HashMap<String, DeadLetterEntry>>>,
    snapshot: Option<Arc<dyn DeadLetterSnapshot>>,
}

impl DeadLetterQueue {
    /// Create a store with the given configuration.
    pub fn new(config: DeadLetterConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
            snapshot: None,
        }
    }

    /// Create a store with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(DeadLetterConfig::default())
    }

    /// Attach a snapshot hook, invoked after every mutation.
    pub fn with_snapshot(mut self, hook: Arc<dyn DeadLetterSnapshot>) -> Self {
        self.snapshot = Some(hook);
        self
    }

    /// Record a permanent failure.
    ///
    /// At capacity, the entry with the oldest first-failure time is evicted
    /// first.
    pub async fn add(
        &self,
        origin_queue: impl Into<String>,
        payload: serde_json::Value,
        error: FailureDetail,
        metadata: serde_json::Value,
    ) -> DeadLetterEntry {
        let origin_queue = origin_queue.into();
        let now = Utc::now();
        let entry = DeadLetterEntry {
            id: Uuid::new_v4().to_string(),
            origin_queue: origin_queue.clone(),
            payload,
            error,
            attempts: 0,
            first_failed_at: now,
            last_failed_at: now,
            metadata,
        };

        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.config.max_entries {
                let evict = entries
                    .values()
                    .min_by_key(|e| e.first_failed_at)
                    .map(|e| e.id.clone());
                if let Some(id) = evict {
                    entries.remove(&id);
                    warn!(entry = %id, "dead-letter store full, evicted oldest entry");
                }
            }
            entries.insert(entry.id.clone(), entry.clone());
        }

        info!(
            entry = %entry.id,
            queue = %origin_queue,
            error = %entry.error.message,
            "recorded dead letter"
        );
        self.persist().await;
        entry
    }

    /// Re-invoke `processor` against an entry's payload.
    ///
    /// On success the entry is removed and `Ok(true)` is returned. On failure
    /// the attempt count increments and the captured error is replaced, but
    /// the entry stays for manual inspection - it is never re-enqueued
    /// automatically - and `Ok(false)` is returned.
    pub async fn retry<F, Fut>(&self, id: &str, processor: F) -> QueueResult<bool>
    where
        F: FnOnce(serde_json::Value) -> Fut,
        Fut: Future<Output = Result<(), JobError>>,
    {
        let payload = {
            let entries = self.entries.lock();
            let entry = entries
                .get(id)
                .ok_or_else(|| QueueError::EntryNotFound(id.to_string()))?;
            entry.payload.clone()
        };

        match processor(payload).await {
            Ok(()) => {
                self.entries.lock().remove(id);
                info!(entry = %id, "dead letter reprocessed, removed");
                self.persist().await;
                Ok(true)
            }
            Err(err) => {
                {
                    let mut entries = self.entries.lock();
                    // The entry may have been purged while the processor ran.
                    if let Some(entry) = entries.get_mut(id) {
                        entry.attempts += 1;
                        entry.error = FailureDetail::new(err.message());
                        entry.last_failed_at = Utc::now();
                    }
                }
                debug!(entry = %id, error = %err, "dead letter reprocessing failed");
                self.persist().await;
                Ok(false)
            }
        }
    }

    /// Retry every entry recorded for `queue`, returning succeeded/failed
    /// counts.
    pub async fn retry_all<F, Fut>(&self, queue: &str, processor: F) -> RetryReport
    where
        F: Fn(serde_json::Value) -> Fut,
        Fut: Future<Output = Result<(), JobError>>,
    {
        let ids: Vec<String> = {
            let entries = self.entries.lock();
            entries
                .values()
                .filter(|e| e.origin_queue == queue)
                .map(|e| e.id.clone())
                .collect()
        };

        let mut report = RetryReport {
            succeeded: 0,
            failed: 0,
        };
        for id in ids {
            match self.retry(&id, &processor).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                // Purged concurrently; nothing to count.
                Err(_) => {}
            }
        }
        info!(
            queue = queue,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk dead-letter retry finished"
        );
        report
    }

    /// Remove a single entry. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.entries.lock().remove(id).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Bulk-remove entries, optionally filtered by origin queue and/or
    /// minimum age. Returns the number removed.
    pub async fn purge(&self, queue: Option<&str>, older_than: Option<Duration>) -> usize {
        let cutoff = older_than.and_then(|age| {
            chrono::Duration::from_std(age)
                .ok()
                .map(|age| Utc::now() - age)
        });
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| {
                let queue_match = queue.map_or(true, |q| entry.origin_queue == q);
                let age_match = cutoff.map_or(true, |cut| entry.first_failed_at <= cut);
                !(queue_match && age_match)
            });
            before - entries.len()
        };
        if removed > 0 {
            info!(removed, "purged dead letters");
            self.persist().await;
        }
        removed
    }

    /// Get a single entry by id.
    pub fn get(&self, id: &str) -> Option<DeadLetterEntry> {
        self.entries.lock().get(id).cloned()
    }

    /// Entries recorded for a queue, oldest first failure first.
    pub fn entries_for(&self, queue: &str) -> Vec<DeadLetterEntry> {
        let mut matched: Vec<DeadLetterEntry> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.origin_queue == queue)
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.first_failed_at);
        matched
    }

    /// Aggregate counts and failure-time bounds.
    pub fn stats(&self) -> DeadLetterStats {
        let entries = self.entries.lock();
        let mut by_queue: HashMap<String, usize> = HashMap::new();
        for entry in entries.values() {
            *by_queue.entry(entry.origin_queue.clone()).or_default() += 1;
        }
        DeadLetterStats {
            total: entries.len(),
            by_queue,
            oldest: entries.values().map(|e| e.first_failed_at).min(),
            newest: entries.values().map(|e| e.last_failed_at).max(),
        }
    }

    async fn persist(&self) {
        if let Some(hook) = &self.snapshot {
            let snapshot: Vec<DeadLetterEntry> = self.entries.lock().values().cloned().collect();
            hook.persist(snapshot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn detail(msg: &str) -> FailureDetail {
        FailureDetail::new(msg)
    }

    #[tokio::test]
    async fn eviction_removes_oldest_first_failure() {
        let dlq = DeadLetterQueue::new(DeadLetterConfig { max_entries: 2 });

        let first = dlq
            .add("publish", json!({"n": 1}), detail("boom"), json!({}))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = dlq
            .add("publish", json!({"n": 2}), detail("boom"), json!({}))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = dlq
            .add("publish", json!({"n": 3}), detail("boom"), json!({}))
            .await;

        assert_eq!(dlq.stats().total, 2);
        assert!(dlq.get(&first.id).is_none());
        assert!(dlq.get(&second.id).is_some());
        assert!(dlq.get(&third.id).is_some());
    }

    #[tokio::test]
    async fn retry_success_removes_entry() {
        let dlq = DeadLetterQueue::with_defaults();
        let entry = dlq
            .add("publish", json!({"post": 7}), detail("boom"), json!({}))
            .await;

        let done = dlq.retry(&entry.id, |_payload| async { Ok(()) }).await;
        assert!(done.unwrap());
        assert!(dlq.get(&entry.id).is_none());
        assert_eq!(dlq.stats().total, 0);
    }

    #[tokio::test]
    async fn retry_failure_keeps_entry_with_incremented_attempts() {
        let dlq = DeadLetterQueue::with_defaults();
        let entry = dlq
            .add("publish", json!({"post": 7}), detail("first failure"), json!({}))
            .await;

        let done = dlq
            .retry(&entry.id, |_payload| async {
                Err(JobError::retryable("still broken"))
            })
            .await;
        assert!(!done.unwrap());

        let kept = dlq.get(&entry.id).unwrap();
        assert_eq!(kept.attempts, 1);
        assert_eq!(kept.error.message, "still broken");
        assert_eq!(dlq.stats().total, 1);
    }

    #[tokio::test]
    async fn retry_unknown_entry_errors() {
        let dlq = DeadLetterQueue::with_defaults();
        let result = dlq.retry("missing", |_payload| async { Ok(()) }).await;
        assert!(matches!(result, Err(QueueError::EntryNotFound(_))));
    }

    #[tokio::test]
    async fn retry_all_reports_counts() {
        let dlq = DeadLetterQueue::with_defaults();
        for n in 0..3 {
            dlq.add("publish", json!({"n": n}), detail("boom"), json!({}))
                .await;
        }
        dlq.add("analytics", json!({}), detail("boom"), json!({}))
            .await;

        // Succeed for even payloads, fail for odd.
        let report = dlq
            .retry_all("publish", |payload| async move {
                if payload["n"].as_u64().unwrap_or(0) % 2 == 0 {
                    Ok(())
                } else {
                    Err(JobError::retryable("odd payload"))
                }
            })
            .await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(dlq.stats().by_queue.get("analytics"), Some(&1));
    }

    #[tokio::test]
    async fn purge_filters_by_queue_and_age() {
        let dlq = DeadLetterQueue::with_defaults();
        dlq.add("publish", json!({}), detail("boom"), json!({}))
            .await;
        dlq.add("analytics", json!({}), detail("boom"), json!({}))
            .await;

        // Nothing is an hour old yet.
        assert_eq!(
            dlq.purge(Some("publish"), Some(Duration::from_secs(3600))).await,
            0
        );
        assert_eq!(dlq.purge(Some("publish"), None).await, 1);
        assert_eq!(dlq.stats().total, 1);
        assert_eq!(dlq.purge(None, None).await, 1);
        assert_eq!(dlq.stats().total, 0);
    }

    #[tokio::test]
    async fn stats_track_failure_time_bounds() {
        let dlq = DeadLetterQueue::with_defaults();
        assert!(dlq.stats().oldest.is_none());

        let first = dlq
            .add("publish", json!({}), detail("boom"), json!({}))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = dlq
            .add("publish", json!({}), detail("boom"), json!({}))
            .await;

        let stats = dlq.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.oldest, Some(first.first_failed_at));
        assert_eq!(stats.newest, Some(second.last_failed_at));
    }

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl DeadLetterSnapshot for CountingHook {
        async fn persist(&self, _entries: Vec<DeadLetterEntry>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn snapshot_hook_fires_after_each_mutation() {
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let dlq = DeadLetterQueue::with_defaults().with_snapshot(hook.clone());

        let entry = dlq
            .add("publish", json!({}), detail("boom"), json!({}))
            .await; // 1
        dlq.retry(&entry.id, |_p| async { Err(JobError::retryable("nope")) })
            .await
            .unwrap(); // 2
        dlq.remove(&entry.id).await; // 3
        dlq.remove(&entry.id).await; // no-op, no persist

        assert_eq!(hook.0.load(Ordering::SeqCst), 3);
    }
}
