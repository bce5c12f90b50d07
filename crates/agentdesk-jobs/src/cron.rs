//! Recurring (cron) jobs on top of tokio-cron-scheduler.
//!
//! Each registration is keyed by name. Every tick runs the handler through
//! the retry executor, guarded by the job's overlap policy, and records the
//! outcome in the [`JobRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::registry::{JobRegistry, JobResult};
use crate::retry::{execute_with_retry, panic_to_error, RetryPolicy, Task};
use crate::{JobsConfig, JobsError};

/// Validate a cron expression.
///
/// The expression uses the 6-field format:
/// second minute hour day-of-month month day-of-week.
///
/// # Errors
///
/// Returns `JobsError::InvalidCron` if the expression is not valid.
///
/// # Example
///
/// ```
/// use agentdesk_jobs::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 0 * * * *").is_ok());  // Every hour
/// assert!(validate_cron_expression("0 30 4 * * *").is_ok()); // 4:30 AM daily
///
/// assert!(validate_cron_expression("invalid").is_err());
/// assert!(validate_cron_expression("").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), JobsError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(JobsError::InvalidCron(format!("'{}': {}", expr, e))),
    }
}

/// Zone a schedule expression is evaluated in.
///
/// A named time zone and a fixed UTC offset are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScheduleZone {
    /// Use the manager's default timezone.
    #[default]
    Unspecified,
    /// IANA timezone, e.g. "Europe/Paris".
    TimeZone(String),
    /// Fixed offset from UTC in minutes, e.g. 330 for +05:30.
    UtcOffset(i32),
}

enum ResolvedZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl fmt::Display for ResolvedZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedZone::Named(tz) => f.write_str(tz.name()),
            ResolvedZone::Fixed(offset) => write!(f, "UTC{offset}"),
        }
    }
}

impl ScheduleZone {
    fn resolve(&self, default: Tz) -> Result<ResolvedZone, JobsError> {
        match self {
            ScheduleZone::Unspecified => Ok(ResolvedZone::Named(default)),
            ScheduleZone::TimeZone(name) => name
                .parse::<Tz>()
                .map(ResolvedZone::Named)
                .map_err(|_| JobsError::InvalidTimezone(name.clone())),
            ScheduleZone::UtcOffset(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .map(ResolvedZone::Fixed)
                .ok_or(JobsError::InvalidUtcOffset(*minutes)),
        }
    }
}

/// Callback receiving the terminal error of a recurring firing.
pub type ErrorHandler = Arc<dyn Fn(&JobsError) + Send + Sync>;

/// Options of a recurring job.
#[derive(Clone)]
pub struct RecurringJobOptions {
    /// Cron expression (6-field)
    pub schedule: String,
    /// Zone the expression is evaluated in
    pub zone: ScheduleZone,
    /// Retry policy applied to every firing
    pub retry: RetryPolicy,
    /// Active right after registration (default true)
    pub start: bool,
    /// Fire once immediately on registration (default false)
    pub run_on_init: bool,
    /// A firing waits for the previous one to complete (default true)
    pub wait_for_completion: bool,
    /// Skip a firing that starts later than this after its tick (default off)
    pub threshold: Option<Duration>,
    /// Graceful shutdown does not wait for this job (default false)
    pub unref: bool,
    /// Receives the error when a firing exhausts its retries
    pub on_error: Option<ErrorHandler>,
}

impl fmt::Debug for RecurringJobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurringJobOptions")
            .field("schedule", &self.schedule)
            .field("zone", &self.zone)
            .field("retry", &self.retry)
            .field("start", &self.start)
            .field("run_on_init", &self.run_on_init)
            .field("wait_for_completion", &self.wait_for_completion)
            .field("threshold", &self.threshold)
            .field("unref", &self.unref)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl RecurringJobOptions {
    /// Options for `schedule` with every other knob at its default.
    pub fn new(schedule: impl Into<String>) -> Self {
        Self {
            schedule: schedule.into(),
            zone: ScheduleZone::Unspecified,
            retry: RetryPolicy::none(),
            start: true,
            run_on_init: false,
            wait_for_completion: true,
            threshold: None,
            unref: false,
            on_error: None,
        }
    }

    /// Set the schedule zone.
    pub fn zone(mut self, zone: ScheduleZone) -> Self {
        self.zone = zone;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set whether the job is active right after registration.
    pub fn start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    /// Set whether the job fires once on registration.
    pub fn run_on_init(mut self, run_on_init: bool) -> Self {
        self.run_on_init = run_on_init;
        self
    }

    /// Set whether consecutive firings wait for each other.
    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    /// Set the lateness threshold.
    pub fn threshold(mut self, threshold: Duration) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set whether graceful shutdown ignores this job.
    pub fn unref(mut self, unref: bool) -> Self {
        self.unref = unref;
        self
    }

    /// Set the terminal error handler.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JobsError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

/// Handle of a registered recurring job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringHandle {
    name: String,
    id: Uuid,
    schedule: String,
    zone: ScheduleZone,
    overlap: OverlapPolicy,
}

impl RecurringHandle {
    /// Registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id assigned by the cron backend.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cron expression.
    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    /// Zone the schedule is evaluated in.
    pub fn zone(&self) -> &ScheduleZone {
        &self.zone
    }

    /// Overlap policy of consecutive firings.
    pub fn overlap(&self) -> OverlapPolicy {
        self.overlap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireCause {
    Tick,
    Init,
}

struct Firing {
    name: String,
    task: Task,
    retry: RetryPolicy,
    guard: OverlapGuard,
    paused: AtomicBool,
    threshold: Option<Duration>,
    on_error: Option<ErrorHandler>,
    status: Arc<JobRegistry>,
    shutdown: CancellationToken,
    scheduler: JobScheduler,
    id: OnceLock<Uuid>,
    expected: Mutex<Option<DateTime<Utc>>>,
}

impl Firing {
    async fn fire(self: Arc<Self>, cause: FireCause) {
        if self.shutdown.is_cancelled() {
            self.status.record_skipped(&self.name, "shutting down");
            return;
        }

        if cause == FireCause::Tick {
            if self.paused.load(Ordering::SeqCst) {
                debug!(job = %self.name, "Job stopped, tick ignored");
                return;
            }

            let expected = self
                .expected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let late = expected.and_then(|tick| (Utc::now() - tick).to_std().ok());
            self.refresh_next_run(expected).await;

            if let (Some(threshold), Some(late)) = (self.threshold, late) {
                if late > threshold {
                    warn!(job = %self.name, late_ms = late.as_millis() as u64, "Tick missed threshold, skipping");
                    self.status
                        .record_skipped(&self.name, format!("late by {}ms", late.as_millis()));
                    return;
                }
            }
        }

        let _run = self.guard.acquire().await;
        self.status.record_start(&self.name);
        info!(job = %self.name, "Job started");
        let start = Instant::now();

        let result = execute_with_retry(&self.name, &self.task, &self.retry).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(job = %self.name, duration_ms, "Job completed");
                self.status
                    .record_complete(&self.name, JobResult::Success, duration_ms);
            }
            Err(err) => {
                error!(job = %self.name, duration_ms, error = %err, "Recurring job failed after retries");
                self.status
                    .record_complete(&self.name, JobResult::Failed(err.to_string()), duration_ms);
                if let Some(handler) = &self.on_error {
                    let reported = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&err)));
                    if let Err(panic) = reported {
                        error!(job = %self.name, error = %panic_to_error(panic), "Error handler panicked");
                    }
                }
            }
        }
    }

    /// Record the backend's next tick, keeping it only if it lies after
    /// `after` so a stale value never marks the following tick as late.
    async fn refresh_next_run(&self, after: Option<DateTime<Utc>>) {
        let Some(id) = self.id.get().copied() else {
            return;
        };
        let mut scheduler = self.scheduler.clone();
        let next = match scheduler.next_tick_for_job(id).await {
            Ok(next) => next.filter(|n| after.map_or(true, |a| *n > a)),
            Err(e) => {
                debug!(job = %self.name, error = %e, "Could not read next tick");
                None
            }
        };
        *self.expected.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.status.set_next_run(&self.name, next);
    }
}

struct RecurringEntry {
    handle: RecurringHandle,
    firing: Arc<Firing>,
    unref: bool,
}

/// Named recurring jobs backed by one `JobScheduler`.
pub struct CronRegistry {
    scheduler: JobScheduler,
    default_tz: Tz,
    entries: tokio::sync::Mutex<HashMap<String, RecurringEntry>>,
    status: Arc<JobRegistry>,
    shutdown: CancellationToken,
}

impl CronRegistry {
    /// Create a registry with its own (not yet started) cron backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured default timezone is invalid or the
    /// backend cannot be created.
    pub async fn new(config: &JobsConfig, shutdown: CancellationToken) -> Result<Self, JobsError> {
        let default_tz = config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            default_tz,
            entries: tokio::sync::Mutex::new(HashMap::new()),
            status: Arc::new(JobRegistry::new()),
            shutdown,
        })
    }

    /// Start ticking.
    pub async fn start(&self) -> Result<(), JobsError> {
        self.scheduler.start().await?;
        Ok(())
    }

    /// Stop the backend. Firings already running are not interrupted.
    pub async fn shutdown(&self) -> Result<(), JobsError> {
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        Ok(())
    }

    /// Status registry of recurring jobs.
    pub fn status(&self) -> Arc<JobRegistry> {
        self.status.clone()
    }

    /// Register `task` under `name`, or return the existing handle.
    ///
    /// An existing registration is returned unchanged; the new options and
    /// task are dropped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid cron expression, time
    /// zone or UTC offset, or a scheduler error from the backend.
    pub async fn add(
        &self,
        name: &str,
        options: RecurringJobOptions,
        task: Task,
    ) -> Result<RecurringHandle, JobsError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(name) {
            debug!(job = %name, schedule = %existing.handle.schedule, "Recurring job already registered, keeping existing");
            return Ok(existing.handle.clone());
        }

        let entry = self.register(name, options, task).await?;
        let handle = entry.handle.clone();
        entries.insert(name.to_string(), entry);
        Ok(handle)
    }

    /// Register `task` under `name`, removing any existing registration first.
    ///
    /// If the backend refuses to remove the existing job, it stays registered
    /// and the error is returned.
    pub async fn replace(
        &self,
        name: &str,
        options: RecurringJobOptions,
        task: Task,
    ) -> Result<RecurringHandle, JobsError> {
        // Validate before touching the existing registration
        validate_cron_expression(&options.schedule)?;
        options.zone.resolve(self.default_tz)?;

        let mut entries = self.entries.lock().await;
        if let Some(old) = entries.get(name) {
            self.unschedule(old).await?;
            entries.remove(name);
            info!(job = %name, "Recurring job replaced");
        }

        let entry = self.register(name, options, task).await?;
        let handle = entry.handle.clone();
        entries.insert(name.to_string(), entry);
        Ok(handle)
    }

    /// Handle of a registered job.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::JobNotFound` if nothing is registered under `name`.
    pub async fn get(&self, name: &str) -> Result<RecurringHandle, JobsError> {
        self.entries
            .lock()
            .await
            .get(name)
            .map(|e| e.handle.clone())
            .ok_or_else(|| JobsError::JobNotFound(name.to_string()))
    }

    /// Names of all registered jobs, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Halt future firings. The handle stays registered. Unknown names are
    /// ignored.
    pub async fn stop(&self, name: &str) {
        if let Some(entry) = self.entries.lock().await.get(name) {
            entry.firing.paused.store(true, Ordering::SeqCst);
            self.status.set_paused(name, true);
            info!(job = %name, "Recurring job stopped");
        }
    }

    /// Resume a stopped job.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::JobNotFound` if nothing is registered under `name`.
    pub async fn resume(&self, name: &str) -> Result<(), JobsError> {
        let firing = self
            .entries
            .lock()
            .await
            .get(name)
            .map(|e| e.firing.clone())
            .ok_or_else(|| JobsError::JobNotFound(name.to_string()))?;

        firing.refresh_next_run(None).await;
        firing.paused.store(false, Ordering::SeqCst);
        self.status.set_paused(name, false);
        info!(job = %name, "Recurring job started");
        Ok(())
    }

    /// Stop and discard a job, freeing its name. Unknown names are ignored.
    pub async fn remove(&self, name: &str) -> Result<(), JobsError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(name) {
            self.unschedule(entry).await?;
            entries.remove(name);
            info!(job = %name, "Recurring job removed");
        }
        Ok(())
    }

    /// Wait for every in-flight firing of jobs not marked `unref`.
    pub async fn wait_idle(&self) {
        let firings: Vec<Arc<Firing>> = self
            .entries
            .lock()
            .await
            .values()
            .filter(|e| !e.unref)
            .map(|e| e.firing.clone())
            .collect();
        for firing in firings {
            firing.guard.idle().await;
        }
    }

    /// Remove the backend job, then silence the firing. Nothing changes if
    /// the backend fails.
    async fn unschedule(&self, entry: &RecurringEntry) -> Result<(), JobsError> {
        self.scheduler.remove(&entry.handle.id).await?;
        entry.firing.paused.store(true, Ordering::SeqCst);
        self.status.unregister(&entry.handle.name);
        Ok(())
    }

    async fn register(
        &self,
        name: &str,
        options: RecurringJobOptions,
        task: Task,
    ) -> Result<RecurringEntry, JobsError> {
        validate_cron_expression(&options.schedule)?;
        let zone = options.zone.resolve(self.default_tz)?;
        let overlap = OverlapPolicy::from_wait_for_completion(options.wait_for_completion);

        let firing = Arc::new(Firing {
            name: name.to_string(),
            task,
            retry: options.retry,
            guard: OverlapGuard::new(overlap),
            paused: AtomicBool::new(!options.start),
            threshold: options.threshold,
            on_error: options.on_error,
            status: self.status.clone(),
            shutdown: self.shutdown.clone(),
            scheduler: self.scheduler.clone(),
            id: OnceLock::new(),
            expected: Mutex::new(None),
        });

        let job = match zone {
            ResolvedZone::Named(tz) => cron_job(&options.schedule, tz, firing.clone())?,
            ResolvedZone::Fixed(offset) => cron_job(&options.schedule, offset, firing.clone())?,
        };
        let id = self.scheduler.add(job).await?;
        let _ = firing.id.set(id);

        self.status.register(name, &options.schedule, &zone.to_string());
        self.status.set_paused(name, !options.start);
        firing.refresh_next_run(None).await;

        info!(job = %name, uuid = %id, cron = %options.schedule, timezone = %zone, "Recurring job registered");

        if options.run_on_init {
            tokio::spawn(firing.clone().fire(FireCause::Init));
        }

        Ok(RecurringEntry {
            handle: RecurringHandle {
                name: name.to_string(),
                id,
                schedule: options.schedule,
                zone: options.zone,
                overlap,
            },
            firing,
            unref: options.unref,
        })
    }
}

fn cron_job<TZ>(expr: &str, tz: TZ, firing: Arc<Firing>) -> Result<Job, JobsError>
where
    TZ: TimeZone + Send + Sync + 'static,
    TZ::Offset: Send + Sync,
{
    Job::new_async_tz(expr, tz, move |_uuid, _lock| {
        let firing = firing.clone();
        Box::pin(async move { firing.fire(FireCause::Tick).await })
    })
    .map_err(|e| JobsError::InvalidCron(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::error::BoxError;
    use crate::retry::task;

    async fn registry() -> CronRegistry {
        CronRegistry::new(&JobsConfig::default(), CancellationToken::new())
            .await
            .unwrap()
    }

    fn noop() -> Task {
        task(|| async { Ok::<(), BoxError>(()) })
    }

    #[test]
    fn test_validate_cron_expression_valid() {
        assert!(validate_cron_expression("0 0 * * * *").is_ok()); // Every hour
        assert!(validate_cron_expression("*/10 * * * * *").is_ok()); // Every 10 seconds
        assert!(validate_cron_expression("0 0 0 * * SUN").is_ok()); // Midnight every Sunday
    }

    #[test]
    fn test_validate_cron_expression_invalid() {
        assert!(validate_cron_expression("invalid").is_err());
        assert!(validate_cron_expression("").is_err());
        assert!(validate_cron_expression("* * *").is_err());
    }

    #[test]
    fn test_zone_resolution() {
        let default = Tz::UTC;

        let zone = ScheduleZone::Unspecified.resolve(default).unwrap();
        assert_eq!(zone.to_string(), "UTC");

        let zone = ScheduleZone::TimeZone("Asia/Tokyo".into()).resolve(default).unwrap();
        assert_eq!(zone.to_string(), "Asia/Tokyo");

        let zone = ScheduleZone::UtcOffset(330).resolve(default).unwrap();
        assert_eq!(zone.to_string(), "UTC+05:30");

        assert!(matches!(
            ScheduleZone::TimeZone("Invalid/Zone".into()).resolve(default),
            Err(JobsError::InvalidTimezone(_))
        ));
        assert!(matches!(
            ScheduleZone::UtcOffset(24 * 60).resolve(default),
            Err(JobsError::InvalidUtcOffset(1440))
        ));
        assert!(matches!(
            ScheduleZone::UtcOffset(i32::MAX).resolve(default),
            Err(JobsError::InvalidUtcOffset(_))
        ));
    }

    #[test]
    fn test_options_defaults() {
        let options = RecurringJobOptions::new("0 0 * * * *");
        assert!(options.start);
        assert!(!options.run_on_init);
        assert!(options.wait_for_completion);
        assert!(options.threshold.is_none());
        assert!(!options.unref);
        assert_eq!(options.zone, ScheduleZone::Unspecified);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registration_is_idempotent_by_name() {
        let cron = registry().await;

        let first = cron
            .add("digest", RecurringJobOptions::new("0 0 8 * * *"), noop())
            .await
            .unwrap();
        let second = cron
            .add("digest", RecurringJobOptions::new("0 30 18 * * *"), noop())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.schedule(), "0 0 8 * * *");
        assert_eq!(cron.names().await, vec!["digest"]);
        assert_eq!(
            cron.status().get_status("digest").unwrap().cron_expr,
            "0 0 8 * * *"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_reconfigures() {
        let cron = registry().await;

        let first = cron
            .add("digest", RecurringJobOptions::new("0 0 8 * * *"), noop())
            .await
            .unwrap();
        let replaced = cron
            .replace(
                "digest",
                RecurringJobOptions::new("0 30 18 * * *")
                    .zone(ScheduleZone::TimeZone("Europe/Paris".into())),
                noop(),
            )
            .await
            .unwrap();

        assert_ne!(first.id(), replaced.id());
        assert_eq!(cron.get("digest").await.unwrap().schedule(), "0 30 18 * * *");
        assert_eq!(cron.status().get_status("digest").unwrap().zone, "Europe/Paris");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_with_invalid_options_keeps_existing() {
        let cron = registry().await;
        cron.add("digest", RecurringJobOptions::new("0 0 8 * * *"), noop())
            .await
            .unwrap();

        let result = cron
            .replace("digest", RecurringJobOptions::new("not a cron"), noop())
            .await;

        assert!(matches!(result, Err(JobsError::InvalidCron(_))));
        assert_eq!(cron.get("digest").await.unwrap().schedule(), "0 0 8 * * *");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_unknown_job() {
        let cron = registry().await;
        assert!(matches!(
            cron.get("missing").await,
            Err(JobsError::JobNotFound(name)) if name == "missing"
        ));
        assert!(matches!(
            cron.resume("missing").await,
            Err(JobsError::JobNotFound(_))
        ));
        // Stop and remove of unknown names are no-ops
        cron.stop("missing").await;
        cron.remove("missing").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_configuration_rejected() {
        let cron = registry().await;

        let bad_cron = cron
            .add("bad", RecurringJobOptions::new("invalid-cron"), noop())
            .await;
        assert!(matches!(bad_cron, Err(JobsError::InvalidCron(_))));

        let bad_tz = cron
            .add(
                "bad",
                RecurringJobOptions::new("0 0 * * * *")
                    .zone(ScheduleZone::TimeZone("Invalid/Timezone".into())),
                noop(),
            )
            .await;
        assert!(matches!(bad_tz, Err(JobsError::InvalidTimezone(_))));
        assert!(cron.names().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_resume_remove() {
        let cron = registry().await;
        cron.add(
            "digest",
            RecurringJobOptions::new("0 0 8 * * *").start(false),
            noop(),
        )
        .await
        .unwrap();
        assert!(cron.status().is_paused("digest"));

        cron.resume("digest").await.unwrap();
        assert!(!cron.status().is_paused("digest"));

        cron.stop("digest").await;
        assert!(cron.status().is_paused("digest"));
        assert!(cron.get("digest").await.is_ok());

        cron.remove("digest").await.unwrap();
        assert!(cron.get("digest").await.is_err());
        assert!(!cron.status().is_registered("digest"));

        // Name is free again
        cron.add("digest", RecurringJobOptions::new("0 0 9 * * *"), noop())
            .await
            .unwrap();
        assert_eq!(cron.get("digest").await.unwrap().schedule(), "0 0 9 * * *");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_on_init_goes_through_retry() {
        let cron = registry().await;
        let calls = Arc::new(AtomicU32::new(0));
        let calls_task = calls.clone();
        let flaky = task(move || {
            let calls = calls_task.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(BoxError::from("first attempt fails"));
                }
                Ok::<(), BoxError>(())
            }
        });

        cron.add(
            "warmup",
            RecurringJobOptions::new("0 0 0 1 1 *")
                .run_on_init(true)
                .retry(RetryPolicy::new(1)),
            flaky,
        )
        .await
        .unwrap();

        let status = cron.status();
        for _ in 0..100 {
            if status.get_status("warmup").is_some_and(|s| s.run_count == 1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let warmup = status.get_status("warmup").unwrap();
        assert_eq!(warmup.run_count, 1);
        assert_eq!(warmup.last_result, Some(JobResult::Success));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_for_completion_serializes_firings() {
        let cron = registry().await;
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let slow = {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            task(move || {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            })
        };

        cron.add("serial", RecurringJobOptions::new("0 0 0 1 1 *"), slow)
            .await
            .unwrap();
        let firing = cron.entries.lock().await.get("serial").unwrap().firing.clone();

        let a = tokio::spawn(firing.clone().fire(FireCause::Tick));
        let b = tokio::spawn(firing.clone().fire(FireCause::Tick));
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(cron.status().get_status("serial").unwrap().run_count, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_firing_reaches_error_handler() {
        let cron = registry().await;
        let reported = Arc::new(Mutex::new(Vec::new()));
        let reported_handler = reported.clone();

        cron.add(
            "nightly",
            RecurringJobOptions::new("0 0 0 1 1 *")
                .retry(RetryPolicy::new(1))
                .on_error(move |err| {
                    reported_handler.lock().unwrap().push(err.to_string());
                }),
            task(|| async { Err::<(), BoxError>("boom".into()) }),
        )
        .await
        .unwrap();

        let firing = cron.entries.lock().await.get("nightly").unwrap().firing.clone();
        firing.fire(FireCause::Init).await;

        assert_eq!(
            *reported.lock().unwrap(),
            vec!["Queue job \"nightly\" failed after 2 attempts".to_string()]
        );
        let status = cron.status().get_status("nightly").unwrap();
        assert_eq!(status.error_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_error_handler_is_contained() {
        let cron = registry().await;

        cron.add(
            "flaky-report",
            RecurringJobOptions::new("0 0 0 1 1 *").on_error(|_| panic!("handler exploded")),
            task(|| async { Err::<(), BoxError>("boom".into()) }),
        )
        .await
        .unwrap();

        let firing = cron.entries.lock().await.get("flaky-report").unwrap().firing.clone();
        firing.clone().fire(FireCause::Init).await;
        firing.fire(FireCause::Init).await;

        let status = cron.status().get_status("flaky-report").unwrap();
        assert_eq!(status.error_count, 2);
        assert!(!status.is_running);
        assert_eq!(status.in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_retry_hook_leaves_job_idle() {
        let cron = registry().await;
        let calls = Arc::new(AtomicU32::new(0));
        let calls_task = calls.clone();

        cron.add(
            "hooked",
            RecurringJobOptions::new("0 0 0 1 1 *").retry(
                RetryPolicy::new(1)
                    .on_failure(|_| async { panic!("hook exploded") })
                    .on_retries_exhausted(|_| async { panic!("hook exploded") }),
            ),
            task(move || {
                let calls = calls_task.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), BoxError>("boom".into())
                }
            }),
        )
        .await
        .unwrap();

        let firing = cron.entries.lock().await.get("hooked").unwrap().firing.clone();
        firing.fire(FireCause::Init).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cron.status().is_running("hooked"));
        assert!(!cron
            .entries
            .lock()
            .await
            .get("hooked")
            .unwrap()
            .firing
            .guard
            .is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_firings_keep_job_running() {
        let cron = registry().await;
        let release = Arc::new(tokio::sync::Notify::new());
        let release_task = release.clone();

        cron.add(
            "parallel",
            RecurringJobOptions::new("0 0 0 1 1 *").wait_for_completion(false),
            task(move || {
                let release = release_task.clone();
                async move {
                    release.notified().await;
                    Ok::<(), BoxError>(())
                }
            }),
        )
        .await
        .unwrap();

        let firing = cron.entries.lock().await.get("parallel").unwrap().firing.clone();
        let first = tokio::spawn(firing.clone().fire(FireCause::Init));
        let second = tokio::spawn(firing.clone().fire(FireCause::Init));
        while firing.guard.in_flight() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        release.notify_one();
        while cron.status().get_status("parallel").unwrap().run_count < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cron.status().is_running("parallel"));

        release.notify_one();
        first.await.unwrap();
        second.await.unwrap();
        assert!(!cron.status().is_running("parallel"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_silences_previous_firing() {
        let cron = registry().await;
        cron.add("digest", RecurringJobOptions::new("0 0 8 * * *"), noop())
            .await
            .unwrap();
        let previous = cron.entries.lock().await.get("digest").unwrap().firing.clone();

        cron.replace("digest", RecurringJobOptions::new("0 30 18 * * *"), noop())
            .await
            .unwrap();

        assert!(previous.paused.load(Ordering::SeqCst));
        assert_eq!(cron.names().await, vec!["digest".to_string()]);
        let status = cron.status().get_status("digest").unwrap();
        assert_eq!(status.cron_expr, "0 30 18 * * *");
        assert!(!status.is_paused);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stopped_job_ignores_ticks() {
        let cron = registry().await;
        let calls = Arc::new(AtomicU32::new(0));
        let calls_task = calls.clone();

        cron.add(
            "paused",
            RecurringJobOptions::new("0 0 0 1 1 *").start(false),
            task(move || {
                let calls = calls_task.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            }),
        )
        .await
        .unwrap();

        let firing = cron.entries.lock().await.get("paused").unwrap().firing.clone();
        firing.fire(FireCause::Tick).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_late_tick_skipped_past_threshold() {
        let cron = registry().await;
        let calls = Arc::new(AtomicU32::new(0));
        let calls_task = calls.clone();

        cron.add(
            "strict",
            RecurringJobOptions::new("0 0 0 1 1 *").threshold(Duration::from_millis(250)),
            task(move || {
                let calls = calls_task.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            }),
        )
        .await
        .unwrap();

        let firing = cron.entries.lock().await.get("strict").unwrap().firing.clone();
        *firing.expected.lock().unwrap() = Some(Utc::now() - chrono::Duration::seconds(5));
        firing.fire(FireCause::Tick).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            cron.status().get_status("strict").unwrap().last_result,
            Some(JobResult::Skipped(_))
        ));
    }
}
