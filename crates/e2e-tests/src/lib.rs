//! End-to-end test infrastructure for agentdesk.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering queues, recurring jobs and the notification pipeline.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentdesk_jobs::{BoxError, JobManager, JobsConfig};
use agentdesk_notify::{AuthNotificationService, MailSettings, MemoryTransport};

/// Shared test harness for E2E tests.
///
/// Provides a job manager, an in-memory mail transport and a notification
/// service wired to both.
pub struct TestHarness {
    /// Shared job manager
    pub manager: Arc<JobManager>,
    /// Records delivered mail
    pub transport: Arc<MemoryTransport>,
    /// Notification service queueing on `manager`
    pub notifications: AuthNotificationService,
}

impl TestHarness {
    /// Create a harness with default settings and a short retry delay.
    pub async fn new() -> Self {
        Self::with_transport(MemoryTransport::new(), fast_mail_settings()).await
    }

    /// Create a harness around a given transport and mail settings.
    pub async fn with_transport(transport: MemoryTransport, mail: MailSettings) -> Self {
        let config = JobsConfig {
            shutdown_timeout_secs: 5,
            ..Default::default()
        };
        let manager = Arc::new(
            JobManager::new(config)
                .await
                .expect("Failed to create job manager"),
        );
        let transport = Arc::new(transport);
        let notifications = AuthNotificationService::new(manager.clone(), transport.clone(), mail);

        Self {
            manager,
            transport,
            notifications,
        }
    }
}

/// Mail settings with the default retry count and a 10ms retry delay.
pub fn fast_mail_settings() -> MailSettings {
    MailSettings {
        retry_delay_ms: 10,
        frontend_url: "https://app.example.com".to_string(),
        ..Default::default()
    }
}

/// Ordered log of labels written by test jobs.
#[derive(Clone, Default)]
pub struct RunLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job that appends `label` to the log and succeeds.
    pub fn job(
        &self,
        label: &str,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>
           + Send
           + Sync
           + 'static {
        let entries = self.entries.clone();
        let label = label.to_string();
        move || {
            let entries = entries.clone();
            let label = label.clone();
            Box::pin(async move {
                entries.lock().expect("run log poisoned").push(label);
                Ok::<(), BoxError>(())
            })
        }
    }

    /// Labels in the order they were written.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("run log poisoned").clone()
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
