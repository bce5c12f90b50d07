//! Authentication notification sender.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use agentdesk_jobs::{task, BoxError, QueueDispatcher, QueueJobOptions};

use crate::message::{compose, NotificationKind, Recipient};
use crate::{MailMessage, MailSettings, MailTransport, NotifyError};

/// Queues authentication emails on the mail queue.
///
/// Every send is fire-and-forget: the message is rendered right away, then
/// delivered by the mail queue with the configured retry policy.
pub struct AuthNotificationService {
    dispatcher: Arc<dyn QueueDispatcher>,
    transport: Arc<dyn MailTransport>,
    settings: MailSettings,
}

impl AuthNotificationService {
    /// Create a sender that enqueues through `dispatcher` and delivers
    /// through `transport`.
    pub fn new(
        dispatcher: Arc<dyn QueueDispatcher>,
        transport: Arc<dyn MailTransport>,
        settings: MailSettings,
    ) -> Self {
        Self {
            dispatcher,
            transport,
            settings,
        }
    }

    /// Mail settings in use.
    pub fn settings(&self) -> &MailSettings {
        &self.settings
    }

    /// Send the password reset link.
    pub fn send_password_reset_email(&self, recipient: &Recipient) -> Result<(), NotifyError> {
        self.send(NotificationKind::PasswordReset, recipient)
    }

    /// Tell the user their password was changed.
    pub fn send_password_reset_alert(&self, recipient: &Recipient) -> Result<(), NotifyError> {
        self.send(NotificationKind::PasswordResetAlert, recipient)
    }

    /// Send the email verification code.
    pub fn send_email_verification_code(&self, recipient: &Recipient) -> Result<(), NotifyError> {
        self.send(NotificationKind::EmailVerificationCode, recipient)
    }

    /// Greet a newly registered user.
    pub fn send_welcome(&self, recipient: &Recipient) -> Result<(), NotifyError> {
        self.send(NotificationKind::Welcome, recipient)
    }

    /// Tell the user about a new login.
    pub fn send_login_alert(&self, recipient: &Recipient) -> Result<(), NotifyError> {
        self.send(NotificationKind::LoginAlert, recipient)
    }

    /// Render and queue a notification of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient lacks a field the message needs or
    /// the mail queue rejects the job.
    pub fn send(&self, kind: NotificationKind, recipient: &Recipient) -> Result<(), NotifyError> {
        let message = compose(kind, recipient, &self.settings, Utc::now())?;
        self.queue_mail(kind.job_name(), message)
    }

    fn queue_mail(&self, job_name: &'static str, message: MailMessage) -> Result<(), NotifyError> {
        let transport = self.transport.clone();
        let message = Arc::new(message);

        let deliver = task(move || {
            let transport = transport.clone();
            let message = message.clone();
            async move {
                info!(to = %message.to, "{}", job_name);
                transport.send((*message).clone()).await?;
                Ok::<(), BoxError>(())
            }
        });

        self.dispatcher.dispatch(
            &self.settings.queue_name,
            deliver,
            QueueJobOptions::new()
                .named(job_name)
                .retry(self.settings.retry_policy()),
        )?;
        Ok(())
    }
}
