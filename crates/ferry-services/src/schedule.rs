//! Delayed transfers: a queue of jobs ordered by due time.
//!
//! Time comes from a `Clock`, so tests drive the queue with a
//! `ManualClock` instead of sleeping. Jobs run in due order; ties keep
//! scheduling order.
//!
//! `queue_loop` works on a `SharedQueue`, so callers keep scheduling and
//! cancelling while it runs. The lock is never held while a job runs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use ferry_core::Result;

use crate::coordinator::{TransferEngine, TransferRequest, TransferResult};

/// How often the queue loop checks for due jobs when idle.
const CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Monotonic time since some fixed origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum TransferJob {
    Upload(TransferRequest),
    Download(TransferRequest),
    ParallelUpload(TransferRequest),
}

impl TransferJob {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Upload(_) => "upload",
            Self::Download(_) => "download",
            Self::ParallelUpload(_) => "parallel_upload",
        }
    }

    pub async fn run(&self, engine: &TransferEngine) -> Result<TransferResult> {
        match self {
            Self::Upload(r) => engine.upload(r).await,
            Self::Download(r) => engine.download(r).await,
            Self::ParallelUpload(r) => engine.parallel_upload(r).await,
        }
    }
}

/// A queue shared between `queue_loop` and whoever schedules into it.
pub type SharedQueue<C = MonotonicClock> = Arc<Mutex<TransferQueue<C>>>;

pub struct TransferQueue<C: Clock = MonotonicClock> {
    clock: C,
    next_id: u64,
    jobs: BTreeMap<(Duration, TaskId), TransferJob>,
}

impl TransferQueue<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for TransferQueue<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TransferQueue<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            next_id: 0,
            jobs: BTreeMap::new(),
        }
    }

    pub fn shared(self) -> SharedQueue<C> {
        Arc::new(Mutex::new(self))
    }

    /// Queue `job` to run once `delay` has elapsed.
    pub fn schedule(&mut self, delay: Duration, job: TransferJob) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let due = self.clock.now() + delay;
        tracing::debug!(task = %id, action = job.action(), delay_ms = delay.as_millis() as u64, "transfer scheduled");
        self.jobs.insert((due, id), job);
        id
    }

    /// Drop a queued job. Returns false if it already ran or never existed.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let key = self.jobs.keys().find(|(_, t)| *t == id).copied();
        match key {
            Some(key) => {
                self.jobs.remove(&key);
                tracing::debug!(task = %id, "scheduled transfer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Time until the earliest job is due (zero if already due).
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.jobs
            .keys()
            .next()
            .map(|(due, _)| due.saturating_sub(now))
    }

    /// Remove and return every job that is due, earliest first.
    pub fn take_due(&mut self) -> Vec<(TaskId, TransferJob)> {
        let now = self.clock.now();
        let mut due = Vec::new();
        while let Some(entry) = self.jobs.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, id), job) = entry.remove_entry();
            due.push((id, job));
        }
        due
    }

    /// Run every due job against `engine`, one after another.
    pub async fn run_due(&mut self, engine: &TransferEngine) -> Vec<(TaskId, Result<TransferResult>)> {
        run_jobs(self.take_due(), engine).await
    }
}

async fn run_jobs(
    due: Vec<(TaskId, TransferJob)>,
    engine: &TransferEngine,
) -> Vec<(TaskId, Result<TransferResult>)> {
    let mut results = Vec::with_capacity(due.len());
    for (id, job) in due {
        tracing::info!(task = %id, action = job.action(), "running scheduled transfer");
        results.push((id, job.run(engine).await));
    }
    results
}

fn lock<C: Clock>(queue: &SharedQueue<C>) -> MutexGuard<'_, TransferQueue<C>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drive `queue` until shutdown, running jobs as they come due.
pub async fn queue_loop<C: Clock>(
    queue: SharedQueue<C>,
    engine: Arc<TransferEngine>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let wait = lock(&queue)
            .next_due_in()
            .map_or(CHECK_INTERVAL, |d| d.min(CHECK_INTERVAL));
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(pending = lock(&queue).pending(), "transfer queue shutting down");
                return;
            }
            _ = tokio::time::sleep(wait) => {
                let due = lock(&queue).take_due();
                for (id, outcome) in run_jobs(due, &engine).await {
                    if let Err(e) = outcome {
                        tracing::warn!(task = %id, error = %e, "scheduled transfer failed");
                    }
                }
            }
        }
    }
}
