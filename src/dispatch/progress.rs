//! Progress events published by the campaign runner.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::runner::CampaignStats;
use super::state::CampaignState;

/// One line of campaign progress plus a snapshot of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Human-readable log line.
    pub line: String,
    /// Runner state at the time of the event.
    pub state: CampaignState,
    /// Counter snapshot.
    pub stats: CampaignStats,
}

impl ProgressEvent {
    /// Build an event stamped with the current time.
    pub fn now(line: impl Into<String>, state: CampaignState, stats: CampaignStats) -> Self {
        Self {
            timestamp: Utc::now(),
            line: line.into(),
            state,
            stats,
        }
    }
}

/// Receiver of campaign progress, typically a UI.
///
/// Called from the worker task; implementations must not block.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event. Events arrive in order.
    fn publish(&self, event: ProgressEvent);
}

/// Writes every event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn publish(&self, event: ProgressEvent) {
        info!(
            state = %event.state,
            sent = event.stats.sent,
            failed = event.stats.failed,
            pending = event.stats.pending,
            "{}",
            event.line
        );
    }
}

/// Forwards events over an unbounded channel to another thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver the UI side drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("progress receiver dropped, discarding event");
        }
    }
}
