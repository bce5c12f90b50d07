//! Authentication email notifications for agentdesk.
//!
//! [`AuthNotificationService`] renders password reset, security alert,
//! verification and welcome emails and hands their delivery to a mail queue
//! through the [`QueueDispatcher`](agentdesk_jobs::QueueDispatcher) seam.
//! Delivery itself goes through a pluggable [`MailTransport`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use agentdesk_notify::{AuthNotificationService, LogTransport, MailSettings, Recipient};
//!
//! let service = AuthNotificationService::new(manager, Arc::new(LogTransport), MailSettings::default());
//! service.send_welcome(&Recipient::new("ada@example.com", "Ada"))?;
//! ```

mod error;
mod message;
mod service;
mod settings;
mod transport;

pub use error::{MailError, NotifyError};
pub use message::{compose, NotificationKind, Recipient, ALERT_TIME_FORMAT, RESET_PASSWORD_PATH};
pub use service::AuthNotificationService;
pub use settings::MailSettings;
pub use transport::{LogTransport, MailMessage, MailTransport, MemoryTransport};
