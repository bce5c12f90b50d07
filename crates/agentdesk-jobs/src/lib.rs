//! In-process asynchronous job manager.
//!
//! Two ways to defer work:
//!
//! - **Named queues**: transient jobs appended to a queue and drained one at
//!   a time, in FIFO or LIFO order. Different queues drain concurrently.
//! - **Recurring jobs**: handlers fired on a cron schedule, in a named time
//!   zone or at a fixed UTC offset.
//!
//! Both run every job through the same bounded retry executor
//! ([`execute_with_retry`]). Recurring job status is observable through the
//! [`JobRegistry`].
//!
//! # Example
//!
//! ```ignore
//! use agentdesk_jobs::{JobManager, JobsConfig, QueueJobOptions, QueueOrder, RetryPolicy};
//!
//! let manager = JobManager::new(JobsConfig::default()).await?;
//!
//! manager.add_queue_job(
//!     "emails",
//!     || async { send_welcome().await },
//!     QueueJobOptions::new()
//!         .order(QueueOrder::Fifo)
//!         .retry(RetryPolicy::new(2).with_delay(Duration::from_secs(1))),
//! )?;
//!
//! manager.drained("emails").await;
//! ```

mod config;
mod cron;
mod error;
mod manager;
mod overlap;
mod queue;
mod registry;
mod retry;

pub use config::JobsConfig;
pub use cron::{
    validate_cron_expression, CronRegistry, ErrorHandler, RecurringHandle, RecurringJobOptions,
    ScheduleZone,
};
pub use error::{BoxError, JobsError, SharedError};
pub use manager::{JobManager, QueueDispatcher};
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use queue::{QueueHandle, QueueJobOptions, QueueOrder, QueueSnapshot, QueueStore};
pub use registry::{JobRegistry, JobResult, JobStatus};
pub use retry::{
    execute_with_retry, task, AttemptFailure, ExhaustedHook, FailureHook, RetriesExhausted,
    RetryPolicy, Task, TaskFuture, MAX_RETRIES,
};
