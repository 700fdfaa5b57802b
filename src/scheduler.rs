//! Recurring-job scheduler.
//!
//! Fires named handlers on fixed periods resolved once at registration from a
//! small set of textual interval specifications (or an explicit millisecond
//! period). The scheduler does not track handler completion: a handler whose
//! duration exceeds its period can have overlapping invocations in flight.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{JobError, QueueError, QueueResult};

/// Interval specification for a recurring job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalSpec {
    Hourly,
    Daily,
    Weekly,
    /// Resolved as 30 days.
    Monthly,
    /// Explicit period.
    Every(Duration),
}

impl IntervalSpec {
    /// Resolve the spec into a concrete period.
    pub fn period(&self) -> Duration {
        match self {
            Self::Hourly => Duration::from_secs(60 * 60),
            Self::Daily => Duration::from_secs(24 * 60 * 60),
            Self::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
            Self::Monthly => Duration::from_secs(30 * 24 * 60 * 60),
            Self::Every(period) => *period,
        }
    }
}

impl std::fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Every(period) => write!(f, "every {}ms", period.as_millis()),
        }
    }
}

impl std::str::FromStr for IntervalSpec {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => other
                .parse::<u64>()
                .map(|ms| Self::Every(Duration::from_millis(ms)))
                .map_err(|_| QueueError::InvalidInterval(s.to_string())),
        }
    }
}

/// Handler invoked on every period elapse.
pub type ScheduleHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// Snapshot view of one registered schedule.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub spec: IntervalSpec,
    pub period: Duration,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
}

struct ScheduleEntry {
    spec: IntervalSpec,
    period: Duration,
    handler: ScheduleHandler,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    task: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    entries: HashMap<String, ScheduleEntry>,
    running: bool,
}

/// Fires named handlers on recurring intervals.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl JobScheduler {
    /// Create an empty, stopped scheduler.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                entries: HashMap::new(),
                running: false,
            })),
        }
    }

    /// Register a recurring handler under a unique name.
    ///
    /// If the scheduler is already started the schedule begins firing
    /// immediately at its period.
    pub fn schedule<F>(&self, name: impl Into<String>, spec: IntervalSpec, handler: F) -> QueueResult<()>
    where
        F: Fn() -> BoxFuture<'static, Result<(), JobError>> + Send + Sync + 'static,
    {
        let name = name.into();
        let period = spec.period();
        if period.is_zero() {
            return Err(QueueError::InvalidInterval(spec.to_string()));
        }

        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&name) {
            return Err(QueueError::DuplicateSchedule(name));
        }

        let handler: ScheduleHandler = Arc::new(handler);
        let mut entry = ScheduleEntry {
            spec,
            period,
            handler: handler.clone(),
            last_run: None,
            next_run: None,
            task: None,
        };
        if inner.running {
            entry.next_run = next_run_after(period);
            entry.task = Some(self.spawn_timer(name.clone(), period, handler));
        }
        info!(schedule = %name, spec = %spec, "registered schedule");
        inner.entries.insert(name, entry);
        Ok(())
    }

    /// Remove a schedule. Returns whether it existed.
    pub fn unschedule(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(name) {
            Some(entry) => {
                if let Some(task) = entry.task {
                    task.abort();
                }
                info!(schedule = name, "removed schedule");
                true
            }
            None => false,
        }
    }

    /// Begin firing every registered schedule at its resolved period.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            return;
        }
        inner.running = true;

        let to_spawn: Vec<(String, Duration, ScheduleHandler)> = inner
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.period, entry.handler.clone()))
            .collect();
        for (name, period, handler) in to_spawn {
            let task = self.spawn_timer(name.clone(), period, handler);
            if let Some(entry) = inner.entries.get_mut(&name) {
                entry.next_run = next_run_after(period);
                entry.task = Some(task);
            }
        }
        info!(schedules = inner.entries.len(), "scheduler started");
    }

    /// Clear all timers. Handler invocations already in flight are not
    /// cancelled.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.running {
            return;
        }
        inner.running = false;
        for entry in inner.entries.values_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            entry.next_run = None;
        }
        info!("scheduler stopped");
    }

    /// Snapshot of one schedule.
    pub fn get_schedule(&self, name: &str) -> Option<ScheduledJob> {
        let inner = self.inner.lock();
        inner.entries.get(name).map(|entry| ScheduledJob {
            name: name.to_string(),
            spec: entry.spec,
            period: entry.period,
            last_run: entry.last_run,
            next_run: entry.next_run,
            running: entry.task.is_some(),
        })
    }

    /// Names of all registered schedules.
    pub fn schedule_names(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    fn spawn_timer(&self, name: String, period: Duration, handler: ScheduleHandler) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                {
                    let mut inner = scheduler.inner.lock();
                    if let Some(entry) = inner.entries.get_mut(&name) {
                        entry.last_run = Some(Utc::now());
                        entry.next_run = next_run_after(period);
                    }
                }
                debug!(schedule = %name, "firing scheduled handler");
                let invocation = (handler)();
                let schedule = name.clone();
                // Fire and forget: completion is not tracked, so a slow
                // handler can overlap its own next invocation.
                tokio::spawn(async move {
                    if let Err(err) = invocation.await {
                        warn!(schedule = %schedule, error = %err, "scheduled handler failed");
                    }
                });
            }
        })
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn next_run_after(period: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(period)
        .ok()
        .map(|period| Utc::now() + period)
}
