//! SMTP email sender.
//!
//! Messages are built with `lettre` and handed to a [`MailTransport`]. The
//! production transport is [`SmtpMailer`]; tests swap in a recorder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, warn};

use super::{pause_after_send, Attachment, ChannelSender, Delivery, SendError, SendResult};
use crate::config::{Channel, ConfigError, EmailCredentials};
use crate::contacts::normalize::normalize_email;
use crate::contacts::Contact;
use crate::dispatch::{truncate_diagnostic, CancelToken, DelayPlanner};

/// Port used for STARTTLS submission.
pub const SUBMISSION_PORT: u16 = 587;

/// Leading domain labels served by the Outlook relay.
const OUTLOOK_PROVIDERS: &[&str] = &["outlook", "hotmail", "live"];

/// SMTP reply codes that mean the credentials were refused.
const AUTH_REPLY_CODES: &[&str] = &["530", "534", "535"];

/// Per-connection SMTP timeout.
const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors reported by a [`MailTransport`].
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// The server refused the credentials.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// Any other delivery failure.
    #[error("smtp error: {0}")]
    Transport(String),
}

/// Hands a finished message to a mail server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Submit `message` for delivery.
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// Pick the SMTP relay for a sender address by its domain.
///
/// Outlook-family domains (`outlook.com`, `hotmail.com`, `live.com` and their
/// regional variants such as `live.co.uk`) go to the Outlook relay, everything
/// else to Gmail.
pub fn smtp_endpoint(address: &str) -> (String, u16) {
    let domain = address
        .rsplit_once('@')
        .map(|(_, d)| d.trim().to_lowercase())
        .unwrap_or_default();
    let provider = domain.split('.').next().unwrap_or_default();
    let host = if OUTLOOK_PROVIDERS.contains(&provider) && domain.contains('.') {
        "smtp-mail.outlook.com"
    } else {
        "smtp.gmail.com"
    };
    (host.to_owned(), SUBMISSION_PORT)
}

/// [`MailTransport`] over an authenticated STARTTLS connection.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    /// Build a mailer for `creds` against `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Transport`] if the relay cannot be configured.
    pub fn new(creds: &EmailCredentials, host: &str, port: u16) -> Result<Self, MailError> {
        let transport = SmtpTransport::starttls_relay(host)
            .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
            .port(port)
            .credentials(Credentials::new(creds.address.clone(), creds.secret.clone()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        let transport = self.transport.clone();
        let sent = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Transport(format!("send task failed: {e}")))?;
        match sent {
            Ok(_) => Ok(()),
            Err(e) => {
                let code = e.status().map(|c| c.to_string());
                let text = e.to_string();
                if code.as_deref().is_some_and(|c| AUTH_REPLY_CODES.contains(&c))
                    || text.to_lowercase().contains("authentication")
                {
                    Err(MailError::Authentication(text))
                } else {
                    Err(MailError::Transport(text))
                }
            }
        }
    }
}

/// Sends one email per contact from a fixed sender.
pub struct EmailSender {
    from: Mailbox,
    subject: String,
    transport: Arc<dyn MailTransport>,
    planner: DelayPlanner,
}

impl EmailSender {
    /// Sender using `creds` and `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredentials`] if the sender address is
    /// not a valid mailbox.
    pub fn new(
        creds: &EmailCredentials,
        transport: Arc<dyn MailTransport>,
        planner: DelayPlanner,
    ) -> Result<Self, ConfigError> {
        let from = creds.address.trim().parse::<Mailbox>().map_err(|e| {
            ConfigError::MissingCredentials(format!("invalid sender address {}: {e}", creds.address))
        })?;
        Ok(Self {
            from,
            subject: creds.subject.clone(),
            transport,
            planner,
        })
    }

    fn build(&self, to: Mailbox, body: &str, file: Option<(&Attachment, Vec<u8>)>) -> Result<Message, SendError> {
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.subject.clone());
        let built = match file {
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(body.to_owned()),
            Some((attachment, bytes)) => {
                let content_type = ContentType::parse("application/octet-stream")
                    .map_err(|e| SendError::Attachment(e.to_string()))?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(body.to_owned()))
                        .singlepart(MailAttachment::new(attachment.file_name()).body(bytes, content_type)),
                )
            }
        };
        built.map_err(|e| SendError::Transport(truncate_diagnostic(&e.to_string())))
    }

    async fn deliver(
        &self,
        contact: &Contact,
        message: &str,
        attachment: Option<&Attachment>,
    ) -> Result<Delivery, SendError> {
        let to = normalize_email(&contact.identity)
            .and_then(|address| address.parse::<Mailbox>().ok())
            .ok_or_else(|| SendError::InvalidContact(contact.identity.clone()))?;
        if attachment.is_none() && message.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let mut delivery = Delivery::Text;
        let file = match attachment {
            Some(a) => match tokio::fs::read(&a.path).await {
                Ok(bytes) => {
                    delivery = Delivery::WithAttachment;
                    Some((a, bytes))
                }
                Err(e) if !message.trim().is_empty() => {
                    warn!(path = %a.path.display(), error = %e, "attachment unreadable, sending text only");
                    delivery = Delivery::TextFallback;
                    None
                }
                Err(e) => return Err(SendError::Attachment(format!("{}: {e}", a.path.display()))),
            },
            None => None,
        };

        let email = self.build(to, message, file)?;
        self.transport.send(email).await.map_err(|e| match e {
            MailError::Authentication(reason) => SendError::Authentication(reason),
            MailError::Transport(reason) => SendError::Transport(truncate_diagnostic(&reason)),
        })?;
        Ok(delivery)
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        contact: &Contact,
        message: &str,
        attachment: Option<&Attachment>,
        cancel: &CancelToken,
    ) -> SendResult {
        if cancel.is_cancelled() {
            return SendResult::failed(&contact.identity, SendError::Cancelled);
        }
        match self.deliver(contact, message, attachment).await {
            Ok(delivery) => {
                info!(identity = %contact.identity, delivery = %delivery, "email sent");
                pause_after_send(&self.planner, cancel, None, None).await;
                SendResult::delivered(&contact.identity, delivery)
            }
            Err(e) => {
                warn!(identity = %contact.identity, error = %e, "email send failed");
                SendResult::failed(&contact.identity, e)
            }
        }
    }
}
