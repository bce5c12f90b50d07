//! Command implementations for the agentdesk daemon.
//!
//! Handles:
//! - start: Load config, build the job manager, run recurring jobs until a signal
//! - validate-cron: Check a cron expression
//! - notify: Queue one email through the mail queue and wait for it
//! - config: Print resolved settings

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use agentdesk_jobs::{validate_cron_expression, BoxError, JobManager, RecurringHandle};
use agentdesk_notify::{AuthNotificationService, LogTransport, NotificationKind, Recipient};

use crate::settings::{RecurringJobSettings, Settings};

/// Load settings and apply CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    settings.apply_overrides(log_level);
    Ok(settings)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Register each declared recurring job with a heartbeat handler.
pub async fn register_recurring_jobs(
    manager: &JobManager,
    jobs: &[RecurringJobSettings],
) -> Result<Vec<RecurringHandle>> {
    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let options = job.options()?;
        let name = job.name.clone();
        let handle = manager
            .add_programmed_job(&job.name, options, move || {
                let name = name.clone();
                async move {
                    info!(job = %name, "Heartbeat");
                    Ok::<(), BoxError>(())
                }
            })
            .await
            .with_context(|| format!("Failed to register recurring job '{}'", job.name))?;
        handles.push(handle);
    }
    Ok(handles)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Build the job manager and register recurring jobs
/// 3. Run until SIGINT/SIGTERM, then shut down gracefully
pub async fn start_daemon(config_path: Option<&str>, log_level: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_tracing(&settings.log_level)?;

    info!("AgentDesk daemon starting...");
    info!("  Default timezone: {}", settings.jobs.default_timezone);
    info!("  Mail queue: {}", settings.mail.queue_name);
    info!("  Recurring jobs: {}", settings.recurring.len());

    let manager = Arc::new(
        JobManager::new(settings.jobs.clone())
            .await
            .context("Failed to create job manager")?,
    );
    register_recurring_jobs(&manager, &settings.recurring).await?;

    manager.start().await.context("Failed to start job manager")?;

    shutdown_signal().await;

    manager
        .shutdown()
        .await
        .context("Failed to shut down job manager")?;
    Ok(())
}

/// Check a cron expression and print the verdict.
pub fn validate_cron(expression: &str) -> Result<()> {
    validate_cron_expression(expression)?;
    println!("Valid cron expression: {}", expression);
    Ok(())
}

/// Queue one notification on the mail queue and wait until it is drained.
pub async fn deliver_notification(
    settings: &Settings,
    kind: NotificationKind,
    recipient: &Recipient,
) -> Result<()> {
    let manager = Arc::new(
        JobManager::new(settings.jobs.clone())
            .await
            .context("Failed to create job manager")?,
    );
    let service =
        AuthNotificationService::new(manager.clone(), Arc::new(LogTransport), settings.mail.clone());

    service
        .send(kind, recipient)
        .with_context(|| format!("Failed to queue {} notification", kind))?;
    manager.drained(&settings.mail.queue_name).await;
    Ok(())
}

/// `notify` command: load settings, init logging and deliver one email.
pub async fn send_notification(
    config_path: Option<&str>,
    log_level: Option<&str>,
    kind: NotificationKind,
    recipient: Recipient,
) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_tracing(&settings.log_level)?;

    deliver_notification(&settings, kind, &recipient).await?;
    println!("Processed {} notification for {}", kind, recipient.email);
    Ok(())
}

/// Print resolved settings as TOML.
pub fn show_config(config_path: Option<&str>, log_level: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    print!("{}", settings.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cron() {
        assert!(validate_cron("0 0 8 * * *").is_ok());
        assert!(validate_cron("every morning").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_rejects_conflicting_zone() {
        let manager = JobManager::new(Default::default()).await.unwrap();
        let jobs = vec![RecurringJobSettings {
            name: "digest".to_string(),
            schedule: "0 0 8 * * *".to_string(),
            timezone: Some("Asia/Tokyo".to_string()),
            utc_offset: Some(540),
            retries: 0,
            retry_delay_ms: 0,
            start: true,
            run_on_init: false,
            wait_for_completion: true,
            threshold_ms: None,
            unref: false,
        }];

        assert!(register_recurring_jobs(&manager, &jobs).await.is_err());
        assert!(manager.cron("digest").await.is_err());
    }
}
