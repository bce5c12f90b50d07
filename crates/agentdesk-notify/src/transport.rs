//! Mail transport trait and implementations.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::MailError;

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Pluggable mail delivery.
///
/// Called once per attempt by the mail queue, so a failing send is retried
/// according to the queue job's retry policy.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Transport that writes every message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        if !message.to.contains('@') {
            return Err(MailError::InvalidRecipient(message.to));
        }

        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            body_len = message.body.len(),
            "Mail delivered to log"
        );
        Ok(())
    }
}

/// In-memory transport that records delivered messages.
///
/// Useful for testing without a mail server. It can be told to fail its
/// first sends to exercise retries.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<MailMessage>>,
    failures_left: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl MemoryTransport {
    /// Create a transport that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose first `failures` sends fail.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_left: Mutex::new(failures),
            ..Self::default()
        }
    }

    /// Messages delivered so far, in delivery order.
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of send calls, failed ones included.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        {
            let mut failures_left = self
                .failures_left
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(MailError::Transport("simulated outage".to_string()));
            }
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }
}
