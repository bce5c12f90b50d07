//! Layered daemon settings.
//!
//! Sources, later overriding earlier:
//! 1. Built-in defaults
//! 2. Config file (~/.config/agentdesk/config.toml)
//! 3. CLI-specified config file (optional)
//! 4. Environment variables (AGENTDESK_*, nested keys joined with `__`)
//! 5. CLI flags, applied by the caller

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agentdesk_jobs::{JobsConfig, RecurringJobOptions, RetryPolicy, ScheduleZone};
use agentdesk_notify::MailSettings;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Recurring job \"{0}\" sets both timezone and utc_offset")]
    ConflictingZone(String),

    #[error("Duplicate recurring job name: {0}")]
    DuplicateJob(String),
}

impl From<config::ConfigError> for SettingsError {
    fn from(err: config::ConfigError) -> Self {
        SettingsError::Load(err.to_string())
    }
}

/// Declaration of one recurring job in the config file.
///
/// ```toml
/// [[recurring]]
/// name = "digest"
/// schedule = "0 0 8 * * *"
/// timezone = "Europe/Paris"
/// retries = 2
/// retry_delay_ms = 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurringJobSettings {
    pub name: String,
    /// 6-field cron expression
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Fixed offset from UTC in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset: Option<i32>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub start: bool,
    #[serde(default)]
    pub run_on_init: bool,
    #[serde(default = "default_true")]
    pub wait_for_completion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_ms: Option<u64>,
    #[serde(default)]
    pub unref: bool,
}

fn default_true() -> bool {
    true
}

impl RecurringJobSettings {
    /// Zone of the schedule.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::ConflictingZone` when both a timezone and a
    /// UTC offset are set.
    pub fn zone(&self) -> Result<ScheduleZone, SettingsError> {
        match (&self.timezone, self.utc_offset) {
            (Some(_), Some(_)) => Err(SettingsError::ConflictingZone(self.name.clone())),
            (Some(tz), None) => Ok(ScheduleZone::TimeZone(tz.clone())),
            (None, Some(offset)) => Ok(ScheduleZone::UtcOffset(offset)),
            (None, None) => Ok(ScheduleZone::Unspecified),
        }
    }

    /// Job manager options for this declaration.
    pub fn options(&self) -> Result<RecurringJobOptions, SettingsError> {
        let mut options = RecurringJobOptions::new(&self.schedule)
            .zone(self.zone()?)
            .retry(
                RetryPolicy::new(self.retries)
                    .with_delay(Duration::from_millis(self.retry_delay_ms)),
            )
            .start(self.start)
            .run_on_init(self.run_on_init)
            .wait_for_completion(self.wait_for_completion)
            .unref(self.unref);
        if let Some(ms) = self.threshold_ms {
            options = options.threshold(Duration::from_millis(ms));
        }
        Ok(options)
    }
}

/// Daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub mail: MailSettings,

    #[serde(default)]
    pub recurring: Vec<RecurringJobSettings>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            jobs: JobsConfig::default(),
            mail: MailSettings::default(),
            recurring: Vec::new(),
        }
    }
}

/// Default config file location, without extension.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "agentdesk")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config")
}

impl Settings {
    /// Load settings from defaults, config files and the environment.
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SettingsError> {
        let defaults = Settings::default();

        let mut builder = Config::builder()
            // 1. Built-in defaults
            .set_default("log_level", defaults.log_level)?
            .set_default("jobs.default_timezone", defaults.jobs.default_timezone)?
            .set_default(
                "jobs.shutdown_timeout_secs",
                defaults.jobs.shutdown_timeout_secs as i64,
            )?
            .set_default("mail.queue_name", defaults.mail.queue_name)?
            .set_default("mail.retries", defaults.mail.retries as i64)?
            .set_default("mail.retry_delay_ms", defaults.mail.retry_delay_ms as i64)?
            // 2. Default config file
            .add_source(File::with_name(&default_config_path().to_string_lossy()).required(false));

        // 3. CLI-specified config file
        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 4. Environment variables: AGENTDESK_LOG_LEVEL, AGENTDESK_JOBS__DEFAULT_TIMEZONE, ...
        builder = builder.add_source(
            Environment::with_prefix("AGENTDESK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints the deserializer cannot express.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut seen = std::collections::HashSet::new();
        for job in &self.recurring {
            job.zone()?;
            if !seen.insert(job.name.as_str()) {
                return Err(SettingsError::DuplicateJob(job.name.clone()));
            }
        }
        Ok(())
    }

    /// Apply CLI flag overrides (highest precedence).
    pub fn apply_overrides(&mut self, log_level: Option<&str>) {
        if let Some(level) = log_level {
            self.log_level = level.to_string();
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(|e| SettingsError::Load(e.to_string()))
    }
}
