//! Priority-ordered, concurrency-limited job dispatcher.
//!
//! Jobs enter through [`JobQueue::add`], wait in a priority-sorted list
//! (earlier-created first within a priority level), and are dispatched to the
//! single registered handler while the active count stays below the
//! concurrency ceiling. Handler failures retry with a linear
//! `retry_delay × attempt` delay until attempts are exhausted; terminal jobs
//! stay queryable for the life of the process. Forwarding a failed job into a
//! [`DeadLetterQueue`](crate::dlq::DeadLetterQueue) is the subscriber's call,
//! made from the `Failed` event.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{JobError, QueueError, QueueResult, RetryableError};
use crate::types::{BoxStream, Job, JobId, JobOptions, JobStatus, QueueEvent};

/// Handler invoked for every dispatched job.
pub type JobHandler =
    Arc<dyn Fn(Job) -> BoxFuture<'static, Result<Option<serde_json::Value>, JobError>> + Send + Sync>;

/// Configuration for a job queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Ceiling on concurrently active handler invocations.
    pub max_concurrency: usize,

    /// Unit of the linear retry delay: a job that just failed attempt `n`
    /// re-enters the waiting set after `retry_delay × n`.
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs in the waiting set (including paused ones).
    pub waiting: usize,

    /// Jobs whose submission delay has not elapsed yet.
    pub delayed: usize,

    /// Handler invocations in flight.
    pub active: usize,

    /// Jobs completed since the queue was created.
    pub completed: u64,

    /// Jobs failed terminally since the queue was created.
    pub failed: u64,
}

#[derive(Debug, Clone)]
struct WaitingEntry {
    id: JobId,
    priority: crate::types::JobPriority,
    created_at: DateTime<Utc>,
    seq: u64,
}

impl WaitingEntry {
    fn sort_key(&self) -> (Reverse<crate::types::JobPriority>, DateTime<Utc>, u64) {
        (Reverse(self.priority), self.created_at, self.seq)
    }
}

struct QueueInner {
    jobs: HashMap<JobId, Job>,
    waiting: Vec<WaitingEntry>,
    /// Submission order, for a stable FIFO within equal timestamps.
    seqs: HashMap<JobId, u64>,
    next_seq: u64,
    active: usize,
    /// Delay/retry timers whose re-insertion has not landed yet.
    timers: usize,
    paused: bool,
    completed: u64,
    failed: u64,
}

enum FailPath {
    Retry { delay: Duration, error: String },
    Terminal { attempts: u32, error: String },
    Missing,
}

/// In-process priority job queue with concurrency control and retry.
#[derive(Clone)]
pub struct JobQueue {
    name: Arc<String>,
    config: Arc<QueueConfig>,
    inner: Arc<Mutex<QueueInner>>,
    handler: Arc<RwLock<Option<JobHandler>>>,
    events: broadcast::Sender<QueueEvent>,
    idle: Arc<Notify>,
}

impl JobQueue {
    /// Create a queue with the given configuration.
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            name: Arc::new(name.into()),
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(QueueInner {
                jobs: HashMap::new(),
                waiting: Vec::new(),
                seqs: HashMap::new(),
                next_seq: 0,
                active: 0,
                timers: 0,
                paused: false,
                completed: 0,
                failed: 0,
            })),
            handler: Arc::new(RwLock::new(None)),
            events,
            idle: Arc::new(Notify::new()),
        }
    }

    /// Create a queue with default configuration.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, QueueConfig::default())
    }

    /// Get the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Submit a unit of work.
    ///
    /// The job lands in the waiting set immediately, or - with a delay - once
    /// its timer elapses. A caller-assigned id whose job is still queued or
    /// active is rejected with [`QueueError::DuplicateJob`]; a terminal job
    /// under the same id is replaced.
    pub fn add(&self, payload: serde_json::Value, opts: JobOptions) -> QueueResult<Job> {
        let now = Utc::now();
        let id = match &opts.id {
            Some(explicit) => JobId::from(explicit.as_str()),
            None => JobId::new(),
        };
        let delayed = !opts.delay.is_zero();

        let job = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.jobs.get(&id) {
                if !existing.status.is_terminal() {
                    return Err(QueueError::DuplicateJob(id.to_string()));
                }
            }

            let status = if delayed {
                JobStatus::Delayed
            } else if inner.paused {
                JobStatus::Paused
            } else {
                JobStatus::Pending
            };
            let job = Job {
                id: id.clone(),
                queue: (*self.name).clone(),
                payload,
                status,
                priority: opts.priority,
                attempts: 0,
                max_attempts: opts.max_attempts.max(1),
                timeout: opts.timeout,
                created_at: now,
                started_at: None,
                finished_at: None,
                failed_reason: None,
                result: None,
            };

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.seqs.insert(id.clone(), seq);
            inner.jobs.insert(id.clone(), job.clone());

            if delayed {
                inner.timers += 1;
            } else {
                insert_waiting(
                    &mut inner,
                    WaitingEntry {
                        id: id.clone(),
                        priority: job.priority,
                        created_at: now,
                        seq,
                    },
                );
            }
            job
        };

        debug!(
            queue = %self.name,
            job = %job.id,
            priority = %job.priority,
            delayed,
            "job added"
        );
        let _ = self.events.send(QueueEvent::Added {
            job_id: job.id.clone(),
            queue: (*self.name).clone(),
            priority: job.priority,
            at: now,
        });

        if delayed {
            let queue = self.clone();
            let promote_id = job.id.clone();
            let delay = opts.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.promote_delayed(&promote_id);
            });
        } else {
            self.dispatch();
        }
        Ok(job)
    }

    /// Register the handler used to execute this queue's jobs and begin
    /// dispatch. Registering again replaces the handler.
    pub fn process<F>(&self, handler: F)
    where
        F: Fn(Job) -> BoxFuture<'static, Result<Option<serde_json::Value>, JobError>>
            + Send
            + Sync
            + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
        info!(queue = %self.name, "handler registered");
        self.dispatch();
    }

    /// Stop dispatching without discarding waiting jobs. In-flight handler
    /// invocations are never cancelled.
    pub fn pause(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.paused {
                return;
            }
            inner.paused = true;
            let QueueInner { jobs, waiting, .. } = &mut *inner;
            for entry in waiting.iter() {
                if let Some(job) = jobs.get_mut(&entry.id) {
                    job.status = JobStatus::Paused;
                }
            }
        }
        info!(queue = %self.name, "paused");
        let _ = self.events.send(QueueEvent::Paused {
            queue: (*self.name).clone(),
            at: Utc::now(),
        });
    }

    /// Resume dispatch.
    pub fn resume(&self) {
        {
            let mut inner = self.inner.lock();
            if !inner.paused {
                return;
            }
            inner.paused = false;
            let QueueInner { jobs, waiting, .. } = &mut *inner;
            for entry in waiting.iter() {
                if let Some(job) = jobs.get_mut(&entry.id) {
                    if job.status == JobStatus::Paused {
                        job.status = JobStatus::Pending;
                    }
                }
            }
        }
        info!(queue = %self.name, "resumed");
        let _ = self.events.send(QueueEvent::Resumed {
            queue: (*self.name).clone(),
            at: Utc::now(),
        });
        self.dispatch();
    }

    /// Resolve once no job is waiting, active, delayed, or awaiting a retry
    /// re-insertion.
    pub async fn drain(&self) {
        let mut notified = std::pin::pin!(self.idle.notified());
        loop {
            notified.as_mut().enable();
            if is_idle(&self.inner.lock()) {
                return;
            }
            notified.as_mut().await;
            notified.set(self.idle.notified());
        }
    }

    /// Look up a job, including terminal ones.
    pub fn get_job(&self, id: &JobId) -> Option<Job> {
        self.inner.lock().jobs.get(id).cloned()
    }

    /// Point-in-time counters.
    pub fn get_stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let delayed = inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Delayed)
            .count();
        QueueStats {
            waiting: inner.waiting.len(),
            delayed,
            active: inner.active,
            completed: inner.completed,
            failed: inner.failed,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Lifecycle events as a boxed stream.
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        let receiver = self.events.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|result| result.ok()))
    }

    /// One dispatch pass: pull waiting jobs while a slot, a handler, and an
    /// unpaused queue allow it.
    fn dispatch(&self) {
        let handler = match &*self.handler.read() {
            Some(handler) => handler.clone(),
            None => return,
        };

        loop {
            let job = {
                let mut inner = self.inner.lock();
                if inner.paused
                    || inner.active >= self.config.max_concurrency
                    || inner.waiting.is_empty()
                {
                    break;
                }
                let entry = inner.waiting.remove(0);
                let job = match inner.jobs.get_mut(&entry.id) {
                    Some(job) => {
                        job.attempts += 1;
                        job.status = JobStatus::Active;
                        job.started_at = Some(Utc::now());
                        job.clone()
                    }
                    // Stale entry; keep pulling.
                    None => continue,
                };
                inner.active += 1;
                job
            };

            debug!(queue = %self.name, job = %job.id, attempt = job.attempts, "dispatching");
            let _ = self.events.send(QueueEvent::Started {
                job_id: job.id.clone(),
                attempt: job.attempts,
                at: Utc::now(),
            });

            let queue = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                queue.run_job(handler, job).await;
            });
        }
    }

    async fn run_job(self, handler: JobHandler, job: Job) {
        let id = job.id.clone();
        let attempt = job.attempts;
        let limit = job.timeout;
        let invocation = (handler)(job);

        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => Err(JobError::retryable(format!(
                    "handler exceeded {}ms timeout",
                    limit.as_millis()
                ))),
            },
            None => invocation.await,
        };

        match outcome {
            Ok(result) => self.complete_job(&id, result),
            Err(err) => self.fail_job(&id, attempt, err),
        }
    }

    fn complete_job(&self, id: &JobId, result: Option<serde_json::Value>) {
        let now = Utc::now();
        let idle = {
            let mut inner = self.inner.lock();
            inner.active -= 1;
            inner.completed += 1;
            if let Some(job) = inner.jobs.get_mut(id) {
                job.status = JobStatus::Completed;
                job.finished_at = Some(now);
                job.result = result;
            }
            inner.seqs.remove(id);
            is_idle(&inner)
        };

        info!(queue = %self.name, job = %id, "job completed");
        let _ = self.events.send(QueueEvent::Completed {
            job_id: id.clone(),
            at: now,
        });
        if idle {
            self.idle.notify_waiters();
        }
        self.dispatch();
    }

    fn fail_job(&self, id: &JobId, attempt: u32, err: JobError) {
        let now = Utc::now();
        let (path, idle) = {
            let mut inner = self.inner.lock();
            inner.active -= 1;
            let path = match inner.jobs.get_mut(id) {
                Some(job) => {
                    job.failed_reason = Some(err.message().to_string());
                    if err.is_retryable() && job.attempts < job.max_attempts {
                        job.status = JobStatus::Pending;
                        FailPath::Retry {
                            // Linear, not exponential: delay grows with the
                            // attempt number that just failed.
                            delay: self.config.retry_delay.saturating_mul(attempt),
                            error: err.message().to_string(),
                        }
                    } else {
                        job.status = JobStatus::Failed;
                        job.finished_at = Some(now);
                        FailPath::Terminal {
                            attempts: job.attempts,
                            error: err.message().to_string(),
                        }
                    }
                }
                None => FailPath::Missing,
            };
            match &path {
                FailPath::Retry { .. } => inner.timers += 1,
                FailPath::Terminal { .. } => {
                    inner.failed += 1;
                    inner.seqs.remove(id);
                }
                FailPath::Missing => {}
            }
            (path, is_idle(&inner))
        };

        match path {
            FailPath::Retry { delay, error } => {
                warn!(
                    queue = %self.name,
                    job = %id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "job failed, retry scheduled"
                );
                let _ = self.events.send(QueueEvent::Retrying {
                    job_id: id.clone(),
                    attempt,
                    retry_in: delay,
                    error,
                    at: now,
                });
                let queue = self.clone();
                let retry_id = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.reinsert(&retry_id);
                });
                // The failed job freed a slot; let other waiting jobs use it.
                self.dispatch();
            }
            FailPath::Terminal { attempts, error } => {
                warn!(
                    queue = %self.name,
                    job = %id,
                    attempts,
                    error = %error,
                    "job failed terminally"
                );
                let _ = self.events.send(QueueEvent::Failed {
                    job_id: id.clone(),
                    attempts,
                    error,
                    at: now,
                });
                if idle {
                    self.idle.notify_waiters();
                }
                self.dispatch();
            }
            FailPath::Missing => {
                if idle {
                    self.idle.notify_waiters();
                }
            }
        }
    }

    /// Move a job whose submission delay elapsed into the waiting set.
    fn promote_delayed(&self, id: &JobId) {
        let idle = {
            let mut inner = self.inner.lock();
            inner.timers -= 1;
            let promote = match inner.jobs.get(id) {
                Some(job) if job.status == JobStatus::Delayed => {
                    Some((job.priority, job.created_at))
                }
                _ => None,
            };
            if let Some((priority, created_at)) = promote {
                let status = if inner.paused {
                    JobStatus::Paused
                } else {
                    JobStatus::Pending
                };
                if let Some(job) = inner.jobs.get_mut(id) {
                    job.status = status;
                }
                let seq = inner.seqs.get(id).copied().unwrap_or(0);
                insert_waiting(
                    &mut inner,
                    WaitingEntry {
                        id: id.clone(),
                        priority,
                        created_at,
                        seq,
                    },
                );
            }
            is_idle(&inner)
        };

        debug!(queue = %self.name, job = %id, "delay elapsed");
        if idle {
            self.idle.notify_waiters();
        }
        self.dispatch();
    }

    /// Return a retrying job to the waiting set.
    fn reinsert(&self, id: &JobId) {
        let idle = {
            let mut inner = self.inner.lock();
            inner.timers -= 1;
            let data = match inner.jobs.get(id) {
                Some(job) if job.status == JobStatus::Pending => {
                    Some((job.priority, job.created_at))
                }
                _ => None,
            };
            if let Some((priority, created_at)) = data {
                if inner.paused {
                    if let Some(job) = inner.jobs.get_mut(id) {
                        job.status = JobStatus::Paused;
                    }
                }
                let seq = inner.seqs.get(id).copied().unwrap_or(0);
                insert_waiting(
                    &mut inner,
                    WaitingEntry {
                        id: id.clone(),
                        priority,
                        created_at,
                        seq,
                    },
                );
            }
            is_idle(&inner)
        };

        if idle {
            self.idle.notify_waiters();
        }
        self.dispatch();
    }
}

/// Sorted insertion: priority descending, then creation time, then submission
/// order - no full resort on dispatch.
fn insert_waiting(inner: &mut QueueInner, entry: WaitingEntry) {
    let key = entry.sort_key();
    let pos = inner
        .waiting
        .partition_point(|existing| existing.sort_key() <= key);
    inner.waiting.insert(pos, entry);
}

fn is_idle(inner: &QueueInner) -> bool {
    inner.waiting.is_empty() && inner.active == 0 && inner.timers == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobPriority;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn serial_queue() -> JobQueue {
        JobQueue::new(
            "test",
            QueueConfig {
                max_concurrency: 1,
                retry_delay: Duration::from_millis(10),
            },
        )
    }

    /// Handler that records payload "tag" values in dispatch order.
    fn recording_handler(
        order: Arc<Mutex<Vec<String>>>,
    ) -> impl Fn(Job) -> BoxFuture<'static, Result<Option<serde_json::Value>, JobError>> {
        move |job: Job| {
            let order = order.clone();
            async move {
                let tag = job.payload["tag"].as_str().unwrap_or("?").to_string();
                order.lock().push(tag);
                Ok(None)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn higher_priority_dispatches_first() {
        let queue = serial_queue();
        let order = Arc::new(Mutex::new(Vec::new()));

        queue.pause();
        queue
            .add(json!({"tag": "normal"}), JobOptions::default())
            .unwrap();
        queue
            .add(
                json!({"tag": "high"}),
                JobOptions::default().with_priority(JobPriority::High),
            )
            .unwrap();
        queue
            .add(
                json!({"tag": "critical"}),
                JobOptions::default().with_priority(JobPriority::Critical),
            )
            .unwrap();
        queue.process(recording_handler(order.clone()));
        queue.resume();
        queue.drain().await;

        assert_eq!(&*order.lock(), &["critical", "high", "normal"]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let queue = serial_queue();
        let order = Arc::new(Mutex::new(Vec::new()));

        queue.pause();
        for tag in ["a", "b", "c"] {
            queue.add(json!({"tag": tag}), JobOptions::default()).unwrap();
        }
        queue.process(recording_handler(order.clone()));
        queue.resume();
        queue.drain().await;

        assert_eq!(&*order.lock(), &["a", "b", "c"]);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let queue = serial_queue();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        queue.process(move |_job| {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(JobError::retryable("transient"))
                } else {
                    Ok(Some(json!("done")))
                }
            }
            .boxed()
        });

        let job = queue.add(json!({}), JobOptions::default()).unwrap();
        queue.drain().await;

        let finished = queue.get_job(&job.id).unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.attempts, 2);
        assert_eq!(finished.result, Some(json!("done")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_with_single_event() {
        let queue = serial_queue();
        let mut events = queue.subscribe();

        queue.process(|_job| async { Err(JobError::retryable("always broken")) }.boxed());
        let job = queue
            .add(json!({}), JobOptions::default().with_max_attempts(2))
            .unwrap();
        queue.drain().await;

        let finished = queue.get_job(&job.id).unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.attempts, 2);
        assert_eq!(finished.failed_reason.as_deref(), Some("always broken"));

        let mut failed_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, QueueEvent::Failed { .. }) {
                failed_events += 1;
            }
        }
        assert_eq!(failed_events, 1);
    }

    #[tokio::test]
    async fn permanent_error_skips_remaining_attempts() {
        let queue = serial_queue();
        queue.process(|_job| async { Err(JobError::permanent("bad payload")) }.boxed());

        let job = queue
            .add(json!({}), JobOptions::default().with_max_attempts(5))
            .unwrap();
        queue.drain().await;

        let finished = queue.get_job(&job.id).unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.attempts, 1);
    }

    #[tokio::test]
    async fn delayed_job_waits_for_its_timer() {
        let queue = serial_queue();
        queue.process(|_job| async { Ok(None) }.boxed());

        let job = queue
            .add(
                json!({}),
                JobOptions::default().with_delay(Duration::from_millis(60)),
            )
            .unwrap();
        assert_eq!(queue.get_job(&job.id).unwrap().status, JobStatus::Delayed);
        assert_eq!(queue.get_stats().delayed, 1);

        queue.drain().await;

        let finished = queue.get_job(&job.id).unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        let started = finished.started_at.unwrap();
        assert!(started - job.created_at >= chrono::Duration::milliseconds(55));
    }

    #[tokio::test]
    async fn pause_blocks_dispatch_until_resume() {
        let queue = serial_queue();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        queue.process(move |_job| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
            .boxed()
        });

        queue.pause();
        let job = queue.add(json!({}), JobOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.get_job(&job.id).unwrap().status, JobStatus::Paused);

        queue.resume();
        queue.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_live_id_is_rejected() {
        let queue = serial_queue();
        queue.pause();
        queue
            .add(json!({"n": 1}), JobOptions::default().with_id("sync-42"))
            .unwrap();
        let duplicate = queue.add(json!({"n": 2}), JobOptions::default().with_id("sync-42"));
        assert!(matches!(duplicate, Err(QueueError::DuplicateJob(_))));

        // After the job completes, the id may be reused.
        queue.process(|_job| async { Ok(None) }.boxed());
        queue.resume();
        queue.drain().await;
        let reused = queue.add(json!({"n": 3}), JobOptions::default().with_id("sync-42"));
        assert!(reused.is_ok());
        queue.drain().await;
    }

    #[tokio::test]
    async fn timeout_counts_as_handler_failure() {
        let queue = serial_queue();
        queue.process(|_job| {
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }
            .boxed()
        });

        let job = queue
            .add(
                json!({}),
                JobOptions::default()
                    .with_max_attempts(1)
                    .with_timeout(Duration::from_millis(40)),
            )
            .unwrap();
        queue.drain().await;

        let finished = queue.get_job(&job.id).unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert!(finished
            .failed_reason
            .unwrap()
            .contains("exceeded 40ms timeout"));
    }

    #[tokio::test]
    async fn concurrency_ceiling_is_respected() {
        let queue = JobQueue::new(
            "test",
            QueueConfig {
                max_concurrency: 2,
                retry_delay: Duration::from_millis(10),
            },
        );
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let in_flight_clone = in_flight.clone();
        let peak_clone = peak.clone();
        queue.process(move |_job| {
            let in_flight = in_flight_clone.clone();
            let peak = peak_clone.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            }
            .boxed()
        });

        for _ in 0..6 {
            queue.add(json!({}), JobOptions::default()).unwrap();
        }
        queue.drain().await;

        assert_eq!(queue.get_stats().completed, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn stats_track_lifecycle() {
        let queue = serial_queue();
        queue.pause();
        queue.add(json!({}), JobOptions::default()).unwrap();
        queue.add(json!({}), JobOptions::default()).unwrap();
        assert_eq!(queue.get_stats().waiting, 2);

        queue.process(|job| {
            async move {
                if job.payload.get("boom").is_some() {
                    Err(JobError::permanent("boom"))
                } else {
                    Ok(None)
                }
            }
            .boxed()
        });
        queue
            .add(json!({"boom": true}), JobOptions::default())
            .unwrap();
        queue.resume();
        queue.drain().await;

        let stats = queue.get_stats();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
    }
}
