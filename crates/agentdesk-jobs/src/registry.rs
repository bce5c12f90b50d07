//! Status registry for recurring jobs.
//!
//! The `JobRegistry` tracks, per recurring job, its schedule, last/next run,
//! durations and outcome counters. It is observability only; registration
//! and firing live in the cron registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one firing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    /// Handler succeeded (possibly after retries)
    Success,
    /// Retry budget exhausted, with the error message
    Failed(String),
    /// Firing did not run the handler (paused, late, shutting down)
    Skipped(String),
}

/// Status of a registered recurring job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Name of the job
    pub job_name: String,
    /// Cron expression for the job schedule
    pub cron_expr: String,
    /// Zone the schedule is evaluated in
    pub zone: String,
    /// When the job last started (if ever)
    pub last_run: Option<DateTime<Utc>>,
    /// Duration of the last run in milliseconds
    pub last_duration_ms: Option<u64>,
    /// Result of the last firing
    pub last_result: Option<JobResult>,
    /// When the job is next scheduled to run
    pub next_run: Option<DateTime<Utc>>,
    /// Total number of firings (including skipped ones)
    pub run_count: u64,
    /// Total number of firings that exhausted their retries
    pub error_count: u64,
    /// Whether a firing is currently executing
    pub is_running: bool,
    /// Number of firings currently executing
    #[serde(default)]
    pub in_flight: u32,
    /// Whether the job is stopped
    pub is_paused: bool,
}

impl JobStatus {
    /// Create a new job status.
    pub fn new(job_name: String, cron_expr: String, zone: String) -> Self {
        Self {
            job_name,
            cron_expr,
            zone,
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            next_run: None,
            run_count: 0,
            error_count: 0,
            is_running: false,
            in_flight: 0,
            is_paused: false,
        }
    }
}

/// Registry for tracking recurring job status.
///
/// # Example
///
/// ```
/// use agentdesk_jobs::{JobRegistry, JobResult};
///
/// let registry = JobRegistry::new();
/// registry.register("digest", "0 0 8 * * *", "UTC");
///
/// registry.record_start("digest");
/// assert!(registry.is_running("digest"));
///
/// registry.record_complete("digest", JobResult::Success, 1500);
/// assert!(!registry.is_running("digest"));
/// ```
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    /// Create a new empty job registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a job, replacing any previous status under that name.
    pub fn register(&self, job_name: &str, cron_expr: &str, zone: &str) {
        self.write().insert(
            job_name.to_string(),
            JobStatus::new(job_name.to_string(), cron_expr.to_string(), zone.to_string()),
        );
    }

    /// Drop a job's status.
    pub fn unregister(&self, job_name: &str) {
        self.write().remove(job_name);
    }

    /// Record that a firing has started executing.
    pub fn record_start(&self, job_name: &str) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.in_flight += 1;
            status.is_running = true;
            status.last_run = Some(Utc::now());
        }
    }

    /// Record that a firing has completed.
    ///
    /// The job stays running while other firings started before this call
    /// are still executing.
    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.in_flight = status.in_flight.saturating_sub(1);
            status.is_running = status.in_flight > 0;
            status.last_duration_ms = Some(duration_ms);
            status.run_count += 1;
            if matches!(result, JobResult::Failed(_)) {
                status.error_count += 1;
            }
            status.last_result = Some(result);
        }
    }

    /// Record a firing that did not run the handler.
    pub fn record_skipped(&self, job_name: &str, reason: impl Into<String>) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.run_count += 1;
            status.last_result = Some(JobResult::Skipped(reason.into()));
        }
    }

    /// Update the next scheduled run time for a job.
    pub fn set_next_run(&self, job_name: &str, next: Option<DateTime<Utc>>) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.next_run = next;
        }
    }

    /// Set the paused state of a job.
    pub fn set_paused(&self, job_name: &str, paused: bool) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.is_paused = paused;
        }
    }

    /// Get the status of a specific job.
    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    /// Get the status of all registered jobs, sorted by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    /// Check if a firing of the job is running.
    pub fn is_running(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_running)
    }

    /// Check if a job is registered.
    pub fn is_registered(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    /// Check if a job is paused.
    pub fn is_paused(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_paused)
    }

    /// Get the number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}
