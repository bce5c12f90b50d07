//! Named in-memory queues drained one job at a time.
//!
//! Each queue has an ordering discipline, a pending list and a running flag.
//! Pushing a job starts a drain task only when none is active, so at most one
//! job per queue executes at any moment while different queues drain
//! independently.
//!
//! The pending list and the running flag live under one mutex. The drain
//! loop clears the flag in the same critical section that observes the list
//! empty, so a concurrent push either lands before that check (and is picked
//! up by the running loop) or sees the flag cleared (and starts a new loop).
//! A loop that unwinds hands its pending jobs to a fresh loop, or clears the
//! flag if none are left.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::{BoxError, JobsError};
use crate::retry::{execute_with_retry, task, RetryPolicy, Task};

/// Order in which a queue hands out pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrder {
    /// Oldest pending job first.
    #[default]
    Fifo,
    /// Newest pending job first. `lilo` is accepted as an alias.
    #[serde(alias = "lilo")]
    Lifo,
}

impl fmt::Display for QueueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueOrder::Fifo => f.write_str("fifo"),
            QueueOrder::Lifo => f.write_str("lifo"),
        }
    }
}

impl FromStr for QueueOrder {
    type Err = JobsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(QueueOrder::Fifo),
            "lifo" | "lilo" => Ok(QueueOrder::Lifo),
            _ => Err(JobsError::InvalidOrder(s.to_string())),
        }
    }
}

/// Options for a transient queue job.
#[derive(Debug, Clone, Default)]
pub struct QueueJobOptions {
    /// Name used in logs and errors. Defaults to the queue name.
    pub job_name: Option<String>,
    /// Requested queue order. `None` keeps the queue's current order.
    pub order: Option<QueueOrder>,
    /// Retry policy applied to this job.
    pub retry: RetryPolicy,
}

impl QueueJobOptions {
    /// Default options: queue name as job name, current order, single attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the job name.
    pub fn named(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    /// Request a queue order.
    pub fn order(mut self, order: QueueOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

struct QueuedJob {
    name: String,
    task: Task,
    retry: RetryPolicy,
}

struct QueueState {
    order: QueueOrder,
    is_running: bool,
    items: VecDeque<QueuedJob>,
    running: watch::Sender<bool>,
}

impl QueueState {
    fn new(order: QueueOrder) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            order,
            is_running: false,
            items: VecDeque::new(),
            running,
        }
    }

    fn take_next(&mut self) -> Option<QueuedJob> {
        match self.order {
            QueueOrder::Fifo => self.items.pop_front(),
            QueueOrder::Lifo => self.items.pop_back(),
        }
    }

    fn set_running(&mut self, running: bool) {
        self.is_running = running;
        self.running.send_replace(running);
    }
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// Queue name
    pub name: String,
    /// Current order
    pub order: QueueOrder,
    /// Jobs waiting to run (excludes the one in flight)
    pub pending: usize,
    /// Whether a drain loop is active
    pub is_running: bool,
}

/// Store of named queues and their drain loops.
///
/// Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct QueueStore {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    runtime: Handle,
}

impl QueueStore {
    /// Create an empty store whose drain loops run on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the handle of a queue, creating it with `order` (default fifo)
    /// on first use. An existing queue keeps its order.
    pub fn queue(&self, name: &str, order: Option<QueueOrder>) -> QueueHandle {
        self.lock()
            .entry(name.to_string())
            .or_insert_with(|| QueueState::new(order.unwrap_or_default()));
        QueueHandle {
            name: name.to_string(),
            store: self.clone(),
        }
    }

    /// Append a job to `queue_name` and make sure a drain loop is active.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::QueueBusy` without enqueuing anything when
    /// `options.order` differs from the queue's order while the queue has
    /// pending jobs or is draining.
    pub fn push(
        &self,
        queue_name: &str,
        task: Task,
        options: QueueJobOptions,
    ) -> Result<(), JobsError> {
        let start_drain = {
            let mut queues = self.lock();
            let queue = queues
                .entry(queue_name.to_string())
                .or_insert_with(|| QueueState::new(options.order.unwrap_or_default()));

            if let Some(order) = options.order {
                if queue.order != order {
                    if queue.is_running || !queue.items.is_empty() {
                        return Err(JobsError::QueueBusy {
                            queue: queue_name.to_string(),
                            current: queue.order,
                        });
                    }
                    debug!(queue = %queue_name, from = %queue.order, to = %order, "Queue order changed");
                    queue.order = order;
                }
            }

            queue.items.push_back(QueuedJob {
                name: options
                    .job_name
                    .unwrap_or_else(|| queue_name.to_string()),
                task,
                retry: options.retry,
            });

            let idle = !queue.is_running;
            if idle {
                queue.set_running(true);
            }
            idle
        };

        if start_drain {
            self.spawn_drain(queue_name.to_string());
        }

        Ok(())
    }

    fn spawn_drain(&self, queue_name: String) {
        let store = self.clone();
        self.runtime.spawn(async move { store.drain(queue_name).await });
    }

    async fn drain(self, queue_name: String) {
        debug!(queue = %queue_name, "Queue drain started");
        let mut guard = DrainGuard {
            store: self.clone(),
            queue_name: queue_name.clone(),
            armed: true,
        };
        let mut processed: u64 = 0;
        let mut failed: u64 = 0;

        loop {
            let job = {
                let mut queues = self.lock();
                let Some(queue) = queues.get_mut(&queue_name) else {
                    guard.armed = false;
                    return;
                };
                match queue.take_next() {
                    Some(job) => job,
                    None => {
                        queue.set_running(false);
                        guard.armed = false;
                        break;
                    }
                }
            };

            if let Err(err) = execute_with_retry(&job.name, &job.task, &job.retry).await {
                // Exhausted jobs never stop the loop
                failed += 1;
                error!(queue = %queue_name, job = %job.name, error = %err, "Queue job failed after retries");
            }
            processed += 1;
        }

        debug!(queue = %queue_name, processed, failed, "Queue drained");
    }

    /// Snapshot of a queue, if it exists.
    pub fn snapshot(&self, name: &str) -> Option<QueueSnapshot> {
        self.lock().get(name).map(|q| QueueSnapshot {
            name: name.to_string(),
            order: q.order,
            pending: q.items.len(),
            is_running: q.is_running,
        })
    }

    /// Snapshots of every known queue, sorted by name.
    pub fn snapshots(&self) -> Vec<QueueSnapshot> {
        let mut all: Vec<QueueSnapshot> = self
            .lock()
            .iter()
            .map(|(name, q)| QueueSnapshot {
                name: name.clone(),
                order: q.order,
                pending: q.items.len(),
                is_running: q.is_running,
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Wait until `name` has no active drain loop.
    pub async fn drained(&self, name: &str) {
        let receiver = self.lock().get(name).map(|q| q.running.subscribe());
        if let Some(mut receiver) = receiver {
            // The sender lives as long as the queue, so this only fails if
            // the store itself is gone.
            let _ = receiver.wait_for(|running| !*running).await;
        }
    }

    /// Wait until every queue is idle.
    pub async fn drain_all(&self) {
        let receivers: Vec<watch::Receiver<bool>> =
            self.lock().values().map(|q| q.running.subscribe()).collect();
        for mut receiver in receivers {
            let _ = receiver.wait_for(|running| !*running).await;
        }
    }
}

/// Keeps a queue from being left marked as running when its drain loop
/// unwinds or is cancelled.
struct DrainGuard {
    store: QueueStore,
    queue_name: String,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let restart = {
            let mut queues = self.store.lock();
            match queues.get_mut(&self.queue_name) {
                Some(queue) if !queue.items.is_empty() => true,
                Some(queue) => {
                    queue.set_running(false);
                    false
                }
                None => false,
            }
        };
        if restart {
            warn!(queue = %self.queue_name, "Queue drain interrupted, restarting");
            self.store.spawn_drain(self.queue_name.clone());
        }
    }
}

/// Handle to one named queue.
#[derive(Clone)]
pub struct QueueHandle {
    name: String,
    store: QueueStore,
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle").field("name", &self.name).finish()
    }
}

impl QueueHandle {
    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current order.
    pub fn order(&self) -> QueueOrder {
        self.store
            .snapshot(&self.name)
            .map(|s| s.order)
            .unwrap_or_default()
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.store.snapshot(&self.name).map_or(0, |s| s.pending)
    }

    /// Whether a drain loop is active.
    pub fn is_running(&self) -> bool {
        self.store
            .snapshot(&self.name)
            .is_some_and(|s| s.is_running)
    }

    /// Enqueue an async closure on this queue.
    ///
    /// # Errors
    ///
    /// See [`QueueStore::push`].
    pub fn push<F, Fut>(&self, f: F, options: QueueJobOptions) -> Result<(), JobsError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.store.push(&self.name, task(f), options)
    }

    /// Wait until the queue has no active drain loop.
    pub async fn drained(&self) {
        self.store.drained(&self.name).await;
    }
}
