//! Bounded retry with a fixed delay between attempts.
//!
//! `execute_with_retry` knows nothing about queues or cron. Both the queue
//! drain loop and the recurring job registry call it with the job's
//! [`RetryPolicy`].

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::error::{BoxError, JobsError, SharedError};

/// Future returned by a single task attempt.
pub type TaskFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Zero-argument asynchronous callback, invoked once per attempt.
pub type Task = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Hook invoked after every failed attempt.
pub type FailureHook = Arc<dyn Fn(AttemptFailure) -> BoxFuture<'static, ()> + Send + Sync>;

/// Hook invoked once after the last allowed attempt failed.
pub type ExhaustedHook = Arc<dyn Fn(RetriesExhausted) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`Task`].
///
/// ```
/// use agentdesk_jobs::{task, BoxError};
///
/// let ping = task(|| async { Ok::<(), BoxError>(()) });
/// ```
pub fn task<F, Fut>(f: F) -> Task
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Payload handed to the `on_failure` hook.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// Job name
    pub job_name: String,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Attempts still allowed after this one
    pub retries_left: u32,
    /// Error returned by this attempt
    pub error: SharedError,
}

/// Payload handed to the `on_retries_exhausted` hook.
#[derive(Debug, Clone)]
pub struct RetriesExhausted {
    /// Job name
    pub job_name: String,
    /// Total attempts made
    pub attempts: u32,
    /// Error returned by the last attempt
    pub error: SharedError,
}

/// Largest usable retry count. Higher values are clamped so that the attempt
/// count `retries + 1` fits in a `u32`.
pub const MAX_RETRIES: u32 = u32::MAX - 1;

/// Retry configuration of a single job.
///
/// `retries` counts additional attempts after the first, so a job runs at
/// most `retries + 1` times. Values above [`MAX_RETRIES`] are clamped.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retries: u32,
    /// Wait inserted between a failed attempt and the next one
    pub retry_delay: Duration,
    on_failure: Option<FailureHook>,
    on_retries_exhausted: Option<ExhaustedHook>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("on_failure", &self.on_failure.is_some())
            .field("on_retries_exhausted", &self.on_retries_exhausted.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Policy with `retries` additional attempts and no delay.
    pub fn new(retries: u32) -> Self {
        Self {
            retries: retries.min(MAX_RETRIES),
            ..Self::default()
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the fixed delay between attempts.
    pub fn with_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Set the hook called after every failed attempt.
    pub fn on_failure<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(AttemptFailure) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_failure = Some(Arc::new(move |failure| hook(failure).boxed()));
        self
    }

    /// Set the hook called once the retry budget is spent.
    pub fn on_retries_exhausted<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RetriesExhausted) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_retries_exhausted = Some(Arc::new(move |exhausted| hook(exhausted).boxed()));
        self
    }

    /// Maximum number of attempts (`retries + 1`).
    pub fn max_attempts(&self) -> u32 {
        self.retries.min(MAX_RETRIES) + 1
    }
}

/// Run `task` until it succeeds or the retry budget of `policy` is spent.
///
/// A panicking attempt counts as a failed attempt, whether the panic comes
/// from the closure itself or from the future it returns. A panicking hook
/// is logged and otherwise ignored.
///
/// # Errors
///
/// Returns `JobsError::RetriesExhausted` carrying the job name, the number
/// of attempts and the last error once every attempt has failed.
pub async fn execute_with_retry(
    name: &str,
    task: &Task,
    policy: &RetryPolicy,
) -> Result<(), JobsError> {
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        let outcome = match AssertUnwindSafe(async { task().await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(panic_to_error(panic)),
        };

        let error: SharedError = match outcome {
            Ok(()) => {
                if attempt > 1 {
                    debug!(job = %name, attempt, "Job succeeded after retry");
                }
                return Ok(());
            }
            Err(err) => Arc::from(err),
        };

        let retries_left = max_attempts - attempt;
        warn!(job = %name, attempt, retries_left, error = %error, "Job attempt failed");

        if let Some(hook) = &policy.on_failure {
            let failure = AttemptFailure {
                job_name: name.to_string(),
                attempt,
                retries_left,
                error: error.clone(),
            };
            run_hook(name, "on_failure", async move { hook(failure).await }).await;
        }

        if attempt >= max_attempts {
            if let Some(hook) = &policy.on_retries_exhausted {
                let exhausted = RetriesExhausted {
                    job_name: name.to_string(),
                    attempts: max_attempts,
                    error: error.clone(),
                };
                run_hook(name, "on_retries_exhausted", async move { hook(exhausted).await })
                    .await;
            }
            return Err(JobsError::RetriesExhausted {
                job_name: name.to_string(),
                attempts: max_attempts,
                source: error,
            });
        }

        if !policy.retry_delay.is_zero() {
            tokio::time::sleep(policy.retry_delay).await;
        }
        attempt += 1;
    }
}

async fn run_hook<F>(name: &str, hook: &'static str, fut: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        error!(job = %name, hook, error = %panic_to_error(panic), "Retry hook panicked");
    }
}

pub(crate) fn panic_to_error(panic: Box<dyn std::any::Any + Send>) -> BoxError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("task panicked: {message}").into()
}
