//! Channel senders: one per delivery channel, all with the same shape.
//!
//! Each sender turns `(contact, message, attachment?)` into a [`SendResult`]
//! and never returns an error: transport problems are folded into the
//! result. The runner only treats [`SendError::is_fatal`] results specially.

pub mod chat;
pub mod email;
pub mod messenger;
pub mod sms;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::Channel;
use crate::contacts::Contact;
use crate::dispatch::delay::is_video;
use crate::dispatch::{
    wait_seconds, ActionStrategy, CancelToken, DelayPlanner, FallbackExecutor, WaitOutcome,
    WaitPolicy,
};
use crate::driver::BrowserDriver;

pub use chat::ChatSender;
pub use email::EmailSender;
pub use messenger::MessengerSender;
pub use sms::SmsSender;

/// Attempts of the send-control poll after the first fallback pass fails.
pub const SEND_RETRY_ATTEMPTS: u32 = 10;

/// Seconds between send-control poll attempts.
pub const SEND_RETRY_SPACING_SECS: u64 = 3;

/// Interval at which idle browser sessions are pinged during delays.
pub const KEEP_ALIVE_SECS: u64 = 10;

/// Per-contact send failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Cancellation was requested before or during the send.
    #[error("cancelled")]
    Cancelled,

    /// The per-contact context (chat pane, compose screen) never became ready.
    #[error("context-timeout: {0}")]
    ContextTimeout(String),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials were rejected. Repeats for every contact.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The attachment could not be read or uploaded.
    #[error("attachment error: {0}")]
    Attachment(String),

    /// The contact identity is not usable on this channel.
    #[error("invalid contact: {0}")]
    InvalidContact(String),

    /// Neither text nor attachment to send.
    #[error("no message to send")]
    EmptyMessage,

    /// The runner's per-contact watchdog fired.
    #[error("watchdog-timeout after {0}s")]
    WatchdogTimeout(u64),
}

impl SendError {
    /// Whether the error stops the whole campaign.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// How a successful send went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Text only, as requested.
    Text,
    /// Attachment with its caption or body.
    WithAttachment,
    /// Attachment sent, caption could not be added.
    AttachmentWithoutCaption,
    /// Attachment sent bare, the text followed as a separate message.
    AttachmentThenText,
    /// Attachment failed, the text went out instead.
    TextFallback,
    /// Submission was never confirmed; reported as sent by policy.
    Unconfirmed,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::WithAttachment => "with attachment",
            Self::AttachmentWithoutCaption => "attachment without caption",
            Self::AttachmentThenText => "attachment, text sent separately",
            Self::TextFallback => "text only, attachment failed",
            Self::Unconfirmed => "unconfirmed",
        })
    }
}

/// Outcome of one send to one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    /// Contact identity the send targeted.
    pub identity: String,
    /// Delivery kind on success, the failure otherwise.
    pub outcome: Result<Delivery, SendError>,
}

impl SendResult {
    /// Successful send.
    pub fn delivered(identity: &str, delivery: Delivery) -> Self {
        Self {
            identity: identity.to_owned(),
            outcome: Ok(delivery),
        }
    }

    /// Failed send.
    pub fn failed(identity: &str, error: SendError) -> Self {
        Self {
            identity: identity.to_owned(),
            outcome: Err(error),
        }
    }

    /// Whether the message went out.
    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Failure description, if any.
    pub fn reason(&self) -> Option<String> {
        self.outcome.as_ref().err().map(ToString::to_string)
    }

    /// Whether the failure must stop the campaign.
    pub fn is_fatal(&self) -> bool {
        self.outcome.as_ref().err().is_some_and(SendError::is_fatal)
    }
}

/// A file sent with every message of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Whether the file is a video, which lengthens the upload wait.
    pub is_video: bool,
}

impl Attachment {
    /// Inspect the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Attachment`] if the path is missing or not a file.
    pub fn from_path(path: &Path) -> Result<Self, SendError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| SendError::Attachment(format!("{}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(SendError::Attachment(format!(
                "{} is not a file",
                path.display()
            )));
        }
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            is_video: is_video(&path),
            size_bytes: metadata.len(),
            path,
        })
    }

    /// File name without directories.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_owned())
    }

    /// Seconds to wait for this file to finish uploading.
    pub fn upload_wait(&self) -> u64 {
        DelayPlanner::upload_wait(self.size_bytes, self.is_video)
    }
}

/// Sends one message to one contact over a specific channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel this sender serves.
    fn channel(&self) -> Channel;

    /// Open the channel session once per campaign.
    ///
    /// The default does nothing.
    async fn open(&self, _cancel: &CancelToken) -> Result<(), SendError> {
        Ok(())
    }

    /// Deliver `message` (and `attachment`, if any) to `contact`.
    ///
    /// Never fails: every error is folded into the returned [`SendResult`].
    async fn send(
        &self,
        contact: &Contact,
        message: &str,
        attachment: Option<&Attachment>,
        cancel: &CancelToken,
    ) -> SendResult;

    /// Close the channel session. Called once, on every terminal path.
    async fn close(&self) {}
}

/// What to report when the send-control poll runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Treat exhaustion as a failed send.
    Fail,
    /// Assume the message went out anyway.
    BestEffortAfterTimeout,
}

impl ExhaustionPolicy {
    /// Policy from the campaign's `best_effort_after_timeout` flag.
    pub fn from_flag(best_effort: bool) -> Self {
        if best_effort {
            Self::BestEffortAfterTimeout
        } else {
            Self::Fail
        }
    }
}

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A strategy activated the send control.
    Confirmed(String),
    /// Attempts ran out and the policy reported success anyway.
    Unconfirmed,
}

/// Activate the send control, polling with bounded retries.
///
/// One fallback pass, then up to [`SEND_RETRY_ATTEMPTS`] further passes
/// [`SEND_RETRY_SPACING_SECS`] apart.
///
/// # Errors
///
/// Returns [`SendError::Cancelled`] if cancellation interrupts the retry
/// spacing, and [`SendError::Transport`] on exhaustion under
/// [`ExhaustionPolicy::Fail`].
pub async fn submit_with_retries(
    strategies: &[ActionStrategy<'_>],
    cancel: &CancelToken,
    policy: ExhaustionPolicy,
) -> Result<Submission, SendError> {
    let executor = FallbackExecutor::new("send-control");
    let first = executor.run(strategies).await;
    if let Some(name) = first.used_strategy {
        return Ok(Submission::Confirmed(name));
    }

    for attempt in 1..=SEND_RETRY_ATTEMPTS {
        if wait_seconds(SEND_RETRY_SPACING_SECS, cancel, WaitPolicy::Interruptible).await
            == WaitOutcome::Cancelled
        {
            return Err(SendError::Cancelled);
        }
        info!(attempt, max = SEND_RETRY_ATTEMPTS, "retrying send control");
        if let Some(name) = executor.run(strategies).await.used_strategy {
            return Ok(Submission::Confirmed(name));
        }
    }

    match policy {
        ExhaustionPolicy::BestEffortAfterTimeout => {
            warn!("send control never confirmed, continuing anyway");
            Ok(Submission::Unconfirmed)
        }
        ExhaustionPolicy::Fail => Err(SendError::Transport(format!(
            "send control not found after {} attempts",
            SEND_RETRY_ATTEMPTS.saturating_add(1)
        ))),
    }
}

/// Wait out the upload (never shortened) and the inter-message delay.
///
/// When `keep_alive` is given, its page state is read every
/// [`KEEP_ALIVE_SECS`] of delay so the session does not idle out.
pub async fn pause_after_send(
    planner: &DelayPlanner,
    cancel: &CancelToken,
    upload_wait: Option<u64>,
    keep_alive: Option<&dyn BrowserDriver>,
) {
    if let Some(secs) = upload_wait {
        info!(secs, "waiting for upload to complete");
        wait_seconds(secs, cancel, WaitPolicy::RunToCompletion).await;
    }

    let mut remaining = planner.inter_message_delay();
    info!(secs = remaining, "waiting before next message");
    while remaining > 0 {
        let chunk = remaining.min(KEEP_ALIVE_SECS);
        if wait_seconds(chunk, cancel, WaitPolicy::Interruptible).await == WaitOutcome::Cancelled {
            info!("delay interrupted by cancellation");
            return;
        }
        remaining = remaining.saturating_sub(chunk);
        if remaining == 0 {
            break;
        }
        if let Some(driver) = keep_alive {
            if let Err(e) = driver.page_state().await {
                warn!(error = %e, "browser connection check failed");
            }
        }
    }
}
