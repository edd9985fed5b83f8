//! Campaign lifecycle states.

use std::fmt;

use serde::Serialize;

/// Lifecycle of a [`super::CampaignRunner`].
///
/// `Idle -> Loading -> Running -> (Cancelling) -> Completed`, with
/// `Loading -> Completed` for empty or unloadable contact lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    /// Created, not started.
    Idle,
    /// Validating config and loading contacts.
    Loading,
    /// Sending to contacts one at a time.
    Running,
    /// Cancellation observed; the in-flight send is finishing.
    Cancelling,
    /// Terminal. Stats are final.
    Completed,
}

impl CampaignState {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
        }
    }

    /// Check if transitioning to `target` is valid.
    pub fn can_transition_to(&self, target: CampaignState) -> bool {
        matches!(
            (self, target),
            (Self::Idle, CampaignState::Loading)
                | (Self::Loading, CampaignState::Running)
                | (Self::Loading, CampaignState::Completed)
                | (Self::Running, CampaignState::Cancelling)
                | (Self::Running, CampaignState::Completed)
                | (Self::Cancelling, CampaignState::Completed)
        )
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for CampaignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
