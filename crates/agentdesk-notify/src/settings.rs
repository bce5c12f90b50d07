//! Mail queue settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use agentdesk_jobs::RetryPolicy;

/// Settings of the mail queue and of rendered messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MailSettings {
    /// Queue the notifications are enqueued on
    pub queue_name: String,
    /// Additional delivery attempts after the first
    pub retries: u32,
    /// Wait between delivery attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Sender address
    pub sender: String,
    /// Base URL of the frontend, used for links in messages
    pub frontend_url: String,
    /// Product name used in subjects and greetings
    pub app_name: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            queue_name: "emails".to_string(),
            retries: 2,
            retry_delay_ms: 1000,
            sender: "noreply@agentdesk.local".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            app_name: "AgentDesk".to_string(),
        }
    }
}

impl MailSettings {
    /// Retry policy applied to each queued notification.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries).with_delay(Duration::from_millis(self.retry_delay_ms))
    }
}
