//! Campaign runner: drives one sender over a contact list.
//!
//! The runner owns [`CampaignStats`] and is the only writer. Observers get
//! snapshots through [`ProgressSink`] events, one per contact plus the
//! lifecycle lines.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::cancel::CancelToken;
use super::progress::{ProgressEvent, ProgressSink};
use super::state::CampaignState;
use super::template::render_message;
use crate::channels::{Attachment, ChannelSender, SendError, SendResult};
use crate::config::{CampaignConfig, ConfigError};
use crate::contacts::{Contact, ContactLoader, ContactsError};

/// Failed identities listed in the completion summary.
pub const FAILED_PREVIEW: usize = 5;

/// Errors that stop a campaign as a whole.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    /// The contact table could not be read.
    #[error("failed to load contacts: {0}")]
    Load(#[from] ContactsError),

    /// The campaign config is invalid.
    #[error("invalid campaign config: {0}")]
    Config(#[from] ConfigError),

    /// The channel session could not be opened.
    #[error("channel session unavailable: {0}")]
    SessionUnavailable(String),

    /// Credentials were rejected; no further contacts were attempted.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The runner was asked to move to a state it cannot reach.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: CampaignState,
        /// Requested state.
        to: CampaignState,
    },
}

/// Running counters of a campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    /// Contacts the message went out to.
    pub sent: usize,
    /// Contacts whose send failed.
    pub failed: usize,
    /// Contacts not yet processed.
    pub pending: usize,
    /// Identities of failed contacts, in processing order.
    pub failed_identities: Vec<String>,
}

/// Final summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    /// Identifier of this run, for log correlation.
    pub run_id: Uuid,
    /// State the runner ended in.
    pub state: CampaignState,
    /// Contacts loaded for the run.
    pub total: usize,
    /// Final counters.
    pub stats: CampaignStats,
    /// Whether the operator stopped the run.
    pub cancelled: bool,
}

impl CampaignReport {
    /// One-line completion summary.
    pub fn summary(&self) -> String {
        format!(
            "COMPLETE: {}/{} sent | Failed: {}",
            self.stats.sent, self.total, self.stats.failed
        )
    }
}

/// Single-use state machine for one campaign.
pub struct CampaignRunner {
    config: CampaignConfig,
    sender: Arc<dyn ChannelSender>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
    state: CampaignState,
    stats: CampaignStats,
    run_id: Uuid,
}

impl CampaignRunner {
    /// Runner for `config` that sends through `sender` and reports to `sink`.
    pub fn new(
        config: CampaignConfig,
        sender: Arc<dyn ChannelSender>,
        sink: Arc<dyn ProgressSink>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            sender,
            sink,
            cancel,
            state: CampaignState::Idle,
            stats: CampaignStats::default(),
            run_id: Uuid::new_v4(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CampaignState {
        self.state
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> &CampaignStats {
        &self.stats
    }

    /// Token that stops the run when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Load contacts from the table at `path`, then run.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Load`] if the table cannot be parsed, plus
    /// everything [`CampaignRunner::run`] returns.
    pub async fn run_path(&mut self, path: &Path) -> Result<CampaignReport, CampaignError> {
        self.begin()?;
        let loaded = ContactLoader::from_config(&self.config).load_path(path);
        match loaded {
            Ok(contacts) => self.execute(contacts).await,
            Err(e) => {
                self.emit(format!("Failed to load contacts: {e}"));
                self.transition(CampaignState::Completed)?;
                Err(e.into())
            }
        }
    }

    /// Send to every contact in order.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Config`] for invalid config,
    /// [`CampaignError::SessionUnavailable`] if the channel cannot be opened,
    /// and [`CampaignError::Authentication`] when credentials are rejected.
    /// A runner that already ran returns [`CampaignError::InvalidTransition`].
    pub async fn run(&mut self, contacts: Vec<Contact>) -> Result<CampaignReport, CampaignError> {
        self.begin()?;
        self.execute(contacts).await
    }

    fn begin(&mut self) -> Result<(), CampaignError> {
        self.transition(CampaignState::Loading)?;
        self.stats = CampaignStats::default();
        if let Err(e) = self.config.validate() {
            self.emit(format!("Invalid configuration: {e}"));
            self.transition(CampaignState::Completed)?;
            return Err(e.into());
        }
        Ok(())
    }

    async fn execute(&mut self, contacts: Vec<Contact>) -> Result<CampaignReport, CampaignError> {
        let total = contacts.len();
        if total == 0 {
            self.emit("No contacts to process");
            self.transition(CampaignState::Completed)?;
            return Ok(self.report(total));
        }

        let attachment = self.resolve_attachment();
        self.stats.pending = total;
        self.transition(CampaignState::Running)?;
        info!(
            run_id = %self.run_id,
            channel = %self.config.channel,
            total,
            attachment = attachment.is_some(),
            "campaign started"
        );
        self.emit(format!("Starting {} campaign: {total} contacts", self.config.channel));

        if let Err(e) = self.sender.open(&self.cancel).await {
            self.sender.close().await;
            if e == SendError::Cancelled {
                return self.stop(total);
            }
            self.emit(format!("Could not open {} session: {e}", self.config.channel));
            self.transition(CampaignState::Completed)?;
            return Err(CampaignError::SessionUnavailable(e.to_string()));
        }

        for (index, contact) in contacts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.sender.close().await;
                return self.stop(total);
            }
            self.stats.pending = total.saturating_sub(index);
            let position = index.saturating_add(1);

            let message = render_message(
                self.config.channel,
                &self.config.message_template,
                contact,
                attachment.is_some(),
            );
            let result = self.send_guarded(contact, &message, attachment.as_ref()).await;
            self.record(&result, position, total);

            if result.is_fatal() {
                let reason = result.reason().unwrap_or_default();
                error!(identity = %contact.identity, reason = %reason, "fatal send error, stopping campaign");
                self.sender.close().await;
                self.emit(format!("Stopped: {reason}"));
                self.transition(CampaignState::Completed)?;
                return Err(CampaignError::Authentication(reason));
            }
        }

        self.sender.close().await;
        if self.stopped_early() {
            return self.stop(total);
        }
        self.transition(CampaignState::Completed)?;
        let report = self.report(total);
        self.summarize(&report);
        Ok(report)
    }

    /// Attachment for this run, or `None` with a warning when unusable.
    fn resolve_attachment(&self) -> Option<Attachment> {
        let path = self.config.attachment_path.as_deref()?;
        match Attachment::from_path(path) {
            Ok(attachment) => Some(attachment),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "attachment unusable, sending text only");
                None
            }
        }
    }

    /// Send with the per-contact watchdog, turning panics into failures.
    async fn send_guarded(
        &self,
        contact: &Contact,
        message: &str,
        attachment: Option<&Attachment>,
    ) -> SendResult {
        let send = AssertUnwindSafe(self.sender.send(contact, message, attachment, &self.cancel))
            .catch_unwind();
        let outcome = match self.config.contact_timeout {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(identity = %contact.identity, secs = limit.as_secs(), "send exceeded watchdog");
                    return SendResult::failed(&contact.identity, SendError::WatchdogTimeout(limit.as_secs()));
                }
            },
            None => send.await,
        };
        outcome.unwrap_or_else(|_| {
            error!(identity = %contact.identity, "sender panicked");
            SendResult::failed(&contact.identity, SendError::Transport("sender panicked".to_owned()))
        })
    }

    fn record(&mut self, result: &SendResult, position: usize, total: usize) {
        let line = match &result.outcome {
            Ok(delivery) => {
                self.stats.sent = self.stats.sent.saturating_add(1);
                format!("[{position}/{total}] Sent to {} ({delivery})", result.identity)
            }
            Err(SendError::Cancelled) => {
                format!("[{position}/{total}] Skipped {} (cancelled)", result.identity)
            }
            Err(e) => {
                self.stats.failed = self.stats.failed.saturating_add(1);
                self.stats.failed_identities.push(result.identity.clone());
                format!("[{position}/{total}] Failed {}: {e}", result.identity)
            }
        };
        if !matches!(result.outcome, Err(SendError::Cancelled)) {
            self.stats.pending = total.saturating_sub(position);
        }
        self.emit(line);
    }

    fn stop(&mut self, total: usize) -> Result<CampaignReport, CampaignError> {
        if self.state == CampaignState::Running {
            self.transition(CampaignState::Cancelling)?;
        }
        self.emit("Stopped by operator");
        self.transition(CampaignState::Completed)?;
        let report = self.report(total);
        self.summarize(&report);
        Ok(report)
    }

    fn summarize(&self, report: &CampaignReport) {
        self.emit(report.summary());
        if !self.stats.failed_identities.is_empty() {
            let preview: Vec<&str> = self
                .stats
                .failed_identities
                .iter()
                .take(FAILED_PREVIEW)
                .map(String::as_str)
                .collect();
            self.emit(format!("Failed contacts: {}", preview.join(", ")));
        }
        info!(
            run_id = %self.run_id,
            sent = self.stats.sent,
            failed = self.stats.failed,
            cancelled = report.cancelled,
            "campaign finished"
        );
    }

    fn report(&self, total: usize) -> CampaignReport {
        CampaignReport {
            run_id: self.run_id,
            state: self.state,
            total,
            stats: self.stats.clone(),
            cancelled: self.stopped_early(),
        }
    }

    /// Cancellation that left contacts unprocessed.
    fn stopped_early(&self) -> bool {
        self.cancel.is_cancelled() && self.stats.pending > 0
    }

    fn transition(&mut self, to: CampaignState) -> Result<(), CampaignError> {
        if !self.state.can_transition_to(to) {
            return Err(CampaignError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!(run_id = %self.run_id, from = %self.state, to = %to, "campaign state changed");
        self.state = to;
        Ok(())
    }

    fn emit(&self, line: impl Into<String>) {
        self.sink
            .publish(ProgressEvent::now(line, self.state, self.stats.clone()));
    }
}

