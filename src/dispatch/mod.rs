//! Campaign dispatch: the runner state machine and the primitives it drives.
//!
//! Everything here runs on a single background task. Senders are called one
//! contact at a time, and every wait point polls the shared [`CancelToken`]
//! once per second.

pub mod cancel;
pub mod delay;
pub mod fallback;
pub mod progress;
pub mod runner;
pub mod state;
pub mod template;

pub use cancel::{run_interruptible, CancelToken, ForcedStop};
pub use delay::{wait_seconds, DelayPlanner, WaitOutcome, WaitPolicy};
pub use fallback::{ActionStrategy, FallbackExecutor, FallbackOutcome};
pub use progress::{ChannelSink, ProgressEvent, ProgressSink, TracingSink};
pub use runner::{CampaignError, CampaignReport, CampaignRunner, CampaignStats};
pub use state::CampaignState;

/// Maximum characters kept from a diagnostic message in logs.
pub const DIAGNOSTIC_CHARS: usize = 80;

/// Cut `text` to [`DIAGNOSTIC_CHARS`] characters, marking the cut with `...`.
pub fn truncate_diagnostic(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(DIAGNOSTIC_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
