//! Notification pipeline E2E tests.
//!
//! AuthNotificationService -> mail queue -> retry executor -> transport.

use pretty_assertions::assert_eq;

use agentdesk_notify::{MemoryTransport, NotifyError, Recipient};
use e2e_tests::{fast_mail_settings, TestHarness};

fn ada() -> Recipient {
    Recipient::new("ada@example.com", "Ada")
        .with_reset_password_token("tok-42")
        .with_email_verification_code("482913")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_all_kinds_delivered_in_order() {
    let harness = TestHarness::new().await;
    let service = &harness.notifications;

    service.send_welcome(&ada()).unwrap();
    service.send_email_verification_code(&ada()).unwrap();
    service.send_password_reset_email(&ada()).unwrap();
    service.send_password_reset_alert(&ada()).unwrap();
    service.send_login_alert(&ada()).unwrap();

    harness.manager.drained("emails").await;

    let subjects: Vec<String> = harness
        .transport
        .sent()
        .into_iter()
        .map(|m| m.subject)
        .collect();
    assert_eq!(
        subjects,
        vec![
            "Welcome to AgentDesk",
            "AgentDesk email verification code",
            "AgentDesk - Recover your password",
            "AgentDesk security alert: Password changed",
            "AgentDesk security alert: New login detected",
        ]
    );

    let reset = &harness.transport.sent()[2];
    assert!(reset
        .body
        .contains("https://app.example.com/auth/reset-password?resetPasswordToken=tok-42"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transient_transport_failure_is_retried() {
    let harness = TestHarness::with_transport(MemoryTransport::failing(2), fast_mail_settings()).await;

    harness.notifications.send_welcome(&ada()).unwrap();
    harness.manager.drained("emails").await;

    // Two failures fit in the budget of 2 retries
    assert_eq!(harness.transport.attempts(), 3);
    assert_eq!(harness.transport.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_delivery_does_not_block_queue() {
    let harness = TestHarness::with_transport(MemoryTransport::failing(3), fast_mail_settings()).await;

    harness.notifications.send_login_alert(&ada()).unwrap();
    harness.notifications.send_welcome(&ada()).unwrap();
    harness.manager.drained("emails").await;

    // Login alert: 3 failed attempts; welcome: delivered first try
    assert_eq!(harness.transport.attempts(), 4);
    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Welcome to AgentDesk");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_incomplete_recipient_rejected_synchronously() {
    let harness = TestHarness::new().await;

    let result = harness
        .notifications
        .send_email_verification_code(&Recipient::new("ada@example.com", "Ada"));

    assert!(matches!(
        result,
        Err(NotifyError::MissingField("email_verification_code"))
    ));
    assert!(harness.manager.queue_snapshots().is_empty());
}
