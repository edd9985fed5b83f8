//! Email sender flows against a recording transport.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::Message;

use herald::channels::email::{MailError, MailTransport};
use herald::channels::{Attachment, ChannelSender, Delivery, EmailSender, SendError};
use herald::config::EmailCredentials;
use herald::contacts::Contact;
use herald::dispatch::{CancelToken, DelayPlanner};

/// Keeps every formatted message; fails with `reject` when set.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    reject: Option<fn() -> MailError>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        if let Some(reject) = self.reject {
            return Err(reject());
        }
        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
        self.sent.lock().expect("lock").push(raw);
        Ok(())
    }
}

fn creds() -> EmailCredentials {
    EmailCredentials {
        address: "shop@example.com".to_owned(),
        secret: "app-password".to_owned(),
        subject: "Weekend sale".to_owned(),
    }
}

fn sender(transport: &Arc<RecordingTransport>) -> EmailSender {
    EmailSender::new(
        &creds(),
        Arc::clone(transport) as Arc<dyn MailTransport>,
        DelayPlanner::new(1, 0),
    )
    .expect("valid sender")
}

fn ann() -> Contact {
    Contact::new("ann@example.com", "Ann", 1)
}

#[tokio::test(start_paused = true)]
async fn plain_message_carries_sender_recipient_and_subject() {
    let transport = Arc::new(RecordingTransport::default());

    let result = sender(&transport)
        .send(&ann(), "Hello Ann,\n\nDoors open at nine.", None, &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::Text));
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("shop@example.com"));
    assert!(sent[0].contains("ann@example.com"));
    assert!(sent[0].contains("Subject: Weekend sale"));
    assert!(sent[0].contains("Doors open at nine."));
}

#[tokio::test]
async fn malformed_recipient_is_rejected_before_sending() {
    let transport = Arc::new(RecordingTransport::default());
    let contact = Contact::new("not-an-address", "Friend", 1);

    let result = sender(&transport)
        .send(&contact, "hi", None, &CancelToken::new())
        .await;

    assert!(matches!(result.outcome, Err(SendError::InvalidContact(_))), "{result:?}");
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn rejected_credentials_are_fatal() {
    let transport = Arc::new(RecordingTransport {
        reject: Some(|| MailError::Authentication("535 5.7.8 Username and Password not accepted".into())),
        ..RecordingTransport::default()
    });

    let result = sender(&transport)
        .send(&ann(), "hi", None, &CancelToken::new())
        .await;

    assert!(result.is_fatal());
    assert!(matches!(result.outcome, Err(SendError::Authentication(_))));
}

#[tokio::test]
async fn transport_errors_are_per_contact() {
    let transport = Arc::new(RecordingTransport {
        reject: Some(|| MailError::Transport("connection reset".into())),
        ..RecordingTransport::default()
    });

    let result = sender(&transport)
        .send(&ann(), "hi", None, &CancelToken::new())
        .await;

    assert!(!result.ok());
    assert!(!result.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn attachment_is_sent_as_multipart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flyer.pdf");
    std::fs::write(&path, b"%PDF-1.4 flyer").expect("write");
    let attachment = Attachment::from_path(&path).expect("attachment");
    let transport = Arc::new(RecordingTransport::default());

    let result = sender(&transport)
        .send(&ann(), "See attached.", Some(&attachment), &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::WithAttachment));
    let sent = transport.sent();
    assert!(sent[0].contains("multipart/mixed"));
    assert!(sent[0].contains("flyer.pdf"));
}

#[tokio::test(start_paused = true)]
async fn unreadable_attachment_falls_back_to_text() {
    let transport = Arc::new(RecordingTransport::default());
    let attachment = Attachment {
        path: PathBuf::from("/nonexistent/herald/flyer.pdf"),
        size_bytes: 10,
        is_video: false,
    };

    let result = sender(&transport)
        .send(&ann(), "See attached.", Some(&attachment), &CancelToken::new())
        .await;

    assert_eq!(result.outcome, Ok(Delivery::TextFallback));
    assert!(!transport.sent()[0].contains("multipart/mixed"));
}

#[test]
fn invalid_sender_address_is_a_config_error() {
    let transport = Arc::new(RecordingTransport::default());
    let bad = EmailCredentials {
        address: "nobody".to_owned(),
        ..creds()
    };
    assert!(EmailSender::new(&bad, transport as Arc<dyn MailTransport>, DelayPlanner::new(1, 0)).is_err());
}
