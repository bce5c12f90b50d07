//! Error types for the job manager.
//!
//! Configuration errors surface synchronously to the caller. Task failures
//! are absorbed by the retry executor and only surface once the retry budget
//! is spent, as [`JobsError::RetriesExhausted`].

use std::sync::Arc;

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

use crate::queue::QueueOrder;

/// Error returned by a job task.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Task error shared between hooks and the terminal failure.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during job manager operations.
#[derive(Debug, Error)]
pub enum JobsError {
    /// Error from the underlying tokio-cron-scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone string
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// UTC offset (minutes) outside of the representable range
    #[error("Invalid UTC offset: {0} minutes")]
    InvalidUtcOffset(i32),

    /// Queue order string that is neither fifo, lifo nor lilo
    #[error("Invalid queue order: {0}")]
    InvalidOrder(String),

    /// Recurring job referenced before registration
    #[error("Cron job \"{0}\" is not registered")]
    JobNotFound(String),

    /// Order change requested while the queue still has work
    #[error(
        "Queue \"{queue}\" is active with \"{current}\" order. Wait for it to drain before changing order."
    )]
    QueueBusy {
        /// Queue name
        queue: String,
        /// Order the queue is currently draining with
        current: QueueOrder,
    },

    /// Every allowed attempt of a job failed
    #[error("Queue job \"{job_name}\" failed after {attempts} attempts")]
    RetriesExhausted {
        /// Job name
        job_name: String,
        /// Number of attempts made (retries + 1)
        attempts: u32,
        /// Error returned by the last attempt
        #[source]
        source: SharedError,
    },

    /// Manager is already running
    #[error("Job manager is already running")]
    AlreadyRunning,

    /// Manager is not running
    #[error("Job manager is not running")]
    NotRunning,
}

impl From<JobSchedulerError> for JobsError {
    fn from(err: JobSchedulerError) -> Self {
        JobsError::Scheduler(err.to_string())
    }
}

impl JobsError {
    /// Whether this is a configuration error (never retried).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            JobsError::InvalidCron(_)
                | JobsError::InvalidTimezone(_)
                | JobsError::InvalidUtcOffset(_)
                | JobsError::InvalidOrder(_)
                | JobsError::JobNotFound(_)
                | JobsError::QueueBusy { .. }
        )
    }
}
