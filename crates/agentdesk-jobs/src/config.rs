//! Job manager configuration.
//!
//! Holds the default timezone applied to recurring jobs that do not name a
//! zone of their own, and the graceful shutdown budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::JobsError;

/// Configuration for the job manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobsConfig {
    /// Timezone for recurring jobs registered with `ScheduleZone::Unspecified`
    /// (IANA timezone string, e.g., "America/New_York"). Defaults to "UTC".
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Timeout in seconds for graceful shutdown.
    /// Queues and in-flight recurring firings get this long to finish.
    /// Defaults to 30 seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl JobsConfig {
    /// Parse the configured timezone string into a chrono_tz::Tz.
    ///
    /// # Errors
    ///
    /// Returns `JobsError::InvalidTimezone` if the timezone string
    /// is not a valid IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, JobsError> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| JobsError::InvalidTimezone(self.default_timezone.clone()))
    }

    /// Shutdown budget as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JobsConfig::default();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_timezone_europe_paris() {
        let config = JobsConfig {
            default_timezone: "Europe/Paris".to_string(),
            ..Default::default()
        };
        let tz = config.parse_timezone().unwrap();
        assert_eq!(tz.name(), "Europe/Paris");
    }

    #[test]
    fn test_parse_invalid_timezone() {
        let config = JobsConfig {
            default_timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        match config.parse_timezone() {
            Err(JobsError::InvalidTimezone(tz)) => assert_eq!(tz, "Mars/Olympus"),
            other => panic!("Expected InvalidTimezone error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: JobsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, JobsConfig::default());

        let parsed: JobsConfig = serde_json::from_str(r#"{"shutdown_timeout_secs": 5}"#).unwrap();
        assert_eq!(parsed.default_timezone, "UTC");
        assert_eq!(parsed.shutdown_timeout_secs, 5);
    }
}
