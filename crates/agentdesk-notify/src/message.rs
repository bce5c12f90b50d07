//! Notification kinds and message composition.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MailMessage, MailSettings, NotifyError};

/// Path of the password reset page, relative to the frontend URL.
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password?resetPasswordToken=";

/// Format of timestamps shown in security alerts.
pub const ALERT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// User a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Recipient {
    /// Delivery address
    pub email: String,
    /// Name used in the greeting
    pub first_name: String,
    /// Token embedded in the password reset link
    pub reset_password_token: Option<String>,
    /// Code sent for email verification
    pub email_verification_code: Option<String>,
}

impl Recipient {
    /// Recipient with only an address and a first name.
    pub fn new(email: impl Into<String>, first_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            ..Self::default()
        }
    }

    /// Set the password reset token.
    pub fn with_reset_password_token(mut self, token: impl Into<String>) -> Self {
        self.reset_password_token = Some(token.into());
        self
    }

    /// Set the email verification code.
    pub fn with_email_verification_code(mut self, code: impl Into<String>) -> Self {
        self.email_verification_code = Some(code.into());
        self
    }
}

/// Authentication notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    /// Link to reset a forgotten password
    PasswordReset,
    /// Security alert after a password change
    PasswordResetAlert,
    /// Code confirming the email address
    EmailVerificationCode,
    /// Greeting after registration
    Welcome,
    /// Security alert after a new login
    LoginAlert,
}

impl NotificationKind {
    /// All kinds.
    pub const ALL: [NotificationKind; 5] = [
        NotificationKind::PasswordReset,
        NotificationKind::PasswordResetAlert,
        NotificationKind::EmailVerificationCode,
        NotificationKind::Welcome,
        NotificationKind::LoginAlert,
    ];

    /// Kebab-case name, as accepted by `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PasswordReset => "password-reset",
            NotificationKind::PasswordResetAlert => "password-reset-alert",
            NotificationKind::EmailVerificationCode => "email-verification-code",
            NotificationKind::Welcome => "welcome",
            NotificationKind::LoginAlert => "login-alert",
        }
    }

    /// Name of the queue job carrying this notification.
    pub fn job_name(&self) -> &'static str {
        match self {
            NotificationKind::PasswordReset => "Send reset password email",
            NotificationKind::PasswordResetAlert => "Send password reset alert email",
            NotificationKind::EmailVerificationCode => "Send email verification code email",
            NotificationKind::Welcome => "Send welcome email",
            NotificationKind::LoginAlert => "Send login alert email",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| NotifyError::UnknownKind(s.to_string()))
    }
}

/// Render the message for `kind`. `at` is the time shown in security alerts.
///
/// # Errors
///
/// Returns `NotifyError::MissingField` when the recipient lacks the reset
/// token or verification code the message needs.
pub fn compose(
    kind: NotificationKind,
    recipient: &Recipient,
    settings: &MailSettings,
    at: DateTime<Utc>,
) -> Result<MailMessage, NotifyError> {
    let app = &settings.app_name;
    let name = &recipient.first_name;

    let (subject, body) = match kind {
        NotificationKind::PasswordReset => {
            let token = recipient
                .reset_password_token
                .as_deref()
                .ok_or(NotifyError::MissingField("reset_password_token"))?;
            let link = format!("{}{}{}", settings.frontend_url, RESET_PASSWORD_PATH, token);
            (
                format!("{app} - Recover your password"),
                format!(
                    "Hi {name},\n\nWe received a request to reset your password. \
                     Open the link below to choose a new one:\n\n{link}\n\n\
                     If you did not ask for this, you can ignore this email."
                ),
            )
        }
        NotificationKind::PasswordResetAlert => (
            format!("{app} security alert: Password changed"),
            format!(
                "Hi {name},\n\nYour password was changed on {}.\n\n\
                 If this was not you, reset your password right away.",
                at.format(ALERT_TIME_FORMAT)
            ),
        ),
        NotificationKind::EmailVerificationCode => {
            let code = recipient
                .email_verification_code
                .as_deref()
                .ok_or(NotifyError::MissingField("email_verification_code"))?;
            (
                format!("{app} email verification code"),
                format!("Hi {name},\n\nYour verification code is: {code}"),
            )
        }
        NotificationKind::Welcome => (
            format!("Welcome to {app}"),
            format!("Hi {name},\n\nWelcome to {app}! Your account is ready."),
        ),
        NotificationKind::LoginAlert => (
            format!("{app} security alert: New login detected"),
            format!(
                "Hi {name},\n\nA new login to your account was detected on {}.\n\n\
                 If this was not you, reset your password right away.",
                at.format(ALERT_TIME_FORMAT)
            ),
        ),
    };

    Ok(MailMessage {
        from: settings.sender.clone(),
        to: recipient.email.clone(),
        subject,
        body,
    })
}
