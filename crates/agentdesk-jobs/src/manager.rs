//! Job manager facade.
//!
//! `JobManager` owns the queue store and the recurring job registry and
//! routes calls to them. It is built once at process start and shared by
//! `Arc`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cron::{CronRegistry, RecurringHandle, RecurringJobOptions};
use crate::error::BoxError;
use crate::queue::{QueueHandle, QueueJobOptions, QueueOrder, QueueSnapshot, QueueStore};
use crate::registry::JobRegistry;
use crate::retry::{task, Task};
use crate::{JobsConfig, JobsError};

/// Enqueue seam for collaborators that only need to hand work to a queue.
pub trait QueueDispatcher: Send + Sync {
    /// Append `task` to `queue` (fire-and-forget).
    ///
    /// # Errors
    ///
    /// Returns `JobsError::QueueBusy` if the requested order conflicts with
    /// a busy queue.
    fn dispatch(&self, queue: &str, task: Task, options: QueueJobOptions)
        -> Result<(), JobsError>;
}

/// In-process job manager: named queues plus recurring jobs.
///
/// # Example
///
/// ```ignore
/// use agentdesk_jobs::{JobManager, JobsConfig, QueueJobOptions, RecurringJobOptions};
///
/// let manager = JobManager::new(JobsConfig::default()).await?;
///
/// manager.add_queue_job("emails", || async { send().await }, QueueJobOptions::new())?;
///
/// manager
///     .add_programmed_job("digest", RecurringJobOptions::new("0 0 8 * * *"), || async {
///         build_digest().await
///     })
///     .await?;
///
/// manager.start().await?;
/// ```
pub struct JobManager {
    config: JobsConfig,
    queues: QueueStore,
    cron: CronRegistry,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl JobManager {
    /// Create a manager bound to the current tokio runtime.
    ///
    /// The cron backend is created but not started. Queues drain as soon as
    /// jobs are enqueued.
    ///
    /// # Errors
    ///
    /// Returns an error if the default timezone is invalid or the cron
    /// backend cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub async fn new(config: JobsConfig) -> Result<Self, JobsError> {
        let shutdown_token = CancellationToken::new();
        let cron = CronRegistry::new(&config, shutdown_token.clone()).await?;

        Ok(Self {
            config,
            queues: QueueStore::new(Handle::current()),
            cron,
            shutdown_token,
            is_running: AtomicBool::new(false),
        })
    }

    /// Start ticking recurring jobs.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::AlreadyRunning` if the manager is already started.
    pub async fn start(&self) -> Result<(), JobsError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(JobsError::AlreadyRunning);
        }

        self.cron.start().await?;
        info!("Job manager started");
        Ok(())
    }

    /// Shut down gracefully.
    ///
    /// Later ticks are ignored, the cron backend stops, then the manager
    /// waits (bounded by `shutdown_timeout_secs`) for every queue to drain
    /// and for in-flight firings of jobs not marked `unref`.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::NotRunning` if the manager is not started.
    pub async fn shutdown(&self) -> Result<(), JobsError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(JobsError::NotRunning);
        }

        info!("Initiating job manager shutdown");
        self.shutdown_token.cancel();

        if let Err(e) = self.cron.shutdown().await {
            warn!("Error during cron shutdown: {}", e);
        }

        let timeout = self.config.shutdown_timeout();
        let settle = async {
            self.queues.drain_all().await;
            self.cron.wait_idle().await;
        };
        if tokio::time::timeout(timeout, settle).await.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "Shutdown timed out with jobs still running");
        }

        info!("Job manager shutdown complete");
        Ok(())
    }

    /// Whether the manager is started.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Manager configuration.
    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// Enqueue an async closure on `queue_name` (fire-and-forget).
    ///
    /// # Errors
    ///
    /// Returns `JobsError::QueueBusy` if `options.order` conflicts with a
    /// busy queue. Nothing is enqueued in that case.
    pub fn add_queue_job<F, Fut>(
        &self,
        queue_name: &str,
        f: F,
        options: QueueJobOptions,
    ) -> Result<(), JobsError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.queues.push(queue_name, task(f), options)
    }

    /// Enqueue an already boxed [`Task`].
    pub fn add_queue_task(
        &self,
        queue_name: &str,
        task: Task,
        options: QueueJobOptions,
    ) -> Result<(), JobsError> {
        self.queues.push(queue_name, task, options)
    }

    /// Get or create a queue handle.
    pub fn queue(&self, name: &str, order: Option<QueueOrder>) -> QueueHandle {
        self.queues.queue(name, order)
    }

    /// Snapshots of every known queue.
    pub fn queue_snapshots(&self) -> Vec<QueueSnapshot> {
        self.queues.snapshots()
    }

    /// Wait until `queue_name` has no active drain loop.
    pub async fn drained(&self, queue_name: &str) {
        self.queues.drained(queue_name).await;
    }

    /// Register a recurring job, or return the existing handle for `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid cron expression, time
    /// zone or UTC offset.
    pub async fn add_programmed_job<F, Fut>(
        &self,
        name: &str,
        options: RecurringJobOptions,
        f: F,
    ) -> Result<RecurringHandle, JobsError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.cron.add(name, options, task(f)).await
    }

    /// Register a recurring job, replacing any existing one under `name`.
    pub async fn replace_programmed_job<F, Fut>(
        &self,
        name: &str,
        options: RecurringJobOptions,
        f: F,
    ) -> Result<RecurringHandle, JobsError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.cron.replace(name, options, task(f)).await
    }

    /// Halt future firings of `name`. Unknown names are ignored.
    pub async fn stop_job(&self, name: &str) {
        self.cron.stop(name).await;
    }

    /// Resume a stopped recurring job.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::JobNotFound` if `name` is not registered.
    pub async fn start_job(&self, name: &str) -> Result<(), JobsError> {
        self.cron.resume(name).await
    }

    /// Stop and discard `name`, freeing the name.
    pub async fn remove_job(&self, name: &str) -> Result<(), JobsError> {
        self.cron.remove(name).await
    }

    /// Handle of a registered recurring job.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::JobNotFound` if `name` is not registered.
    pub async fn cron(&self, name: &str) -> Result<RecurringHandle, JobsError> {
        self.cron.get(name).await
    }

    /// Status registry of recurring jobs.
    pub fn registry(&self) -> Arc<JobRegistry> {
        self.cron.status()
    }
}

impl QueueDispatcher for JobManager {
    fn dispatch(
        &self,
        queue: &str,
        task: Task,
        options: QueueJobOptions,
    ) -> Result<(), JobsError> {
        self.add_queue_task(queue, task, options)
    }
}
