//! Error types for notifications.

use thiserror::Error;

use agentdesk_jobs::JobsError;

/// Error returned by a mail transport.
#[derive(Debug, Error)]
pub enum MailError {
    /// Delivery failed
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Address rejected before delivery
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

/// Error returned when queueing a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Mail queue rejected the job
    #[error("Failed to queue notification: {0}")]
    Queue(#[from] JobsError),

    /// Recipient lacks data the message needs
    #[error("Recipient is missing {0}")]
    MissingField(&'static str),

    /// Kind name not recognized
    #[error("Unknown notification kind: {0}")]
    UnknownKind(String),
}
