//! Inter-message and upload-wait timing, plus the cancellable wait primitive.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::cancel::CancelToken;
use crate::config::CampaignConfig;

/// Wait after uploading a non-video attachment, regardless of size.
pub const UPLOAD_WAIT_SECS: u64 = 4;

/// Seconds of upload wait per started megabyte of video.
pub const VIDEO_SECS_PER_MB: u64 = 3;

/// Videos of at least this many megabytes get the large-file floor.
pub const LARGE_VIDEO_MB: u64 = 30;

/// Minimum upload wait for large videos.
pub const LARGE_VIDEO_FLOOR_SECS: u64 = 120;

/// Upper bound on any upload wait.
pub const UPLOAD_WAIT_CAP_SECS: u64 = 180;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Extensions treated as video attachments.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "3gp", "m4v"];

/// How a wait reacts to cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Stop at the next one-second tick once cancellation is requested.
    Interruptible,
    /// Keep ticking to the end; used while an upload may still be in flight.
    RunToCompletion,
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration elapsed without cancellation.
    Completed,
    /// Cancellation was requested before or during the wait.
    Cancelled,
}

/// Sleep for `seconds`, checking `cancel` once per second.
///
/// With [`WaitPolicy::RunToCompletion`] the full duration always elapses; the
/// outcome still reports whether cancellation was requested meanwhile.
pub async fn wait_seconds(seconds: u64, cancel: &CancelToken, policy: WaitPolicy) -> WaitOutcome {
    let mut noted = false;
    for remaining in (1..=seconds).rev() {
        if cancel.is_cancelled() {
            match policy {
                WaitPolicy::Interruptible => return WaitOutcome::Cancelled,
                WaitPolicy::RunToCompletion if !noted => {
                    debug!(remaining, "cancellation requested, finishing wait first");
                    noted = true;
                }
                WaitPolicy::RunToCompletion => {}
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    if cancel.is_cancelled() {
        WaitOutcome::Cancelled
    } else {
        WaitOutcome::Completed
    }
}

/// Computes how long to pause between messages and after uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPlanner {
    delay_seconds: u64,
    jitter_seconds: u64,
}

impl DelayPlanner {
    /// Planner with a fixed delay (clamped to at least 1) and jitter bound.
    pub fn new(delay_seconds: u64, jitter_seconds: u64) -> Self {
        Self {
            delay_seconds: delay_seconds.max(1),
            jitter_seconds,
        }
    }

    /// Planner using the delay settings of `config`.
    pub fn from_config(config: &CampaignConfig) -> Self {
        Self::new(config.delay_seconds, config.jitter_seconds)
    }

    /// Seconds to wait after a successful send before the next contact.
    ///
    /// The configured delay plus a uniform random jitter in `0..=jitter`.
    pub fn inter_message_delay(&self) -> u64 {
        if self.jitter_seconds == 0 {
            return self.delay_seconds;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.jitter_seconds);
        self.delay_seconds.saturating_add(jitter)
    }

    /// Seconds to wait for an attachment of `size_bytes` to finish uploading.
    pub fn upload_wait(size_bytes: u64, is_video: bool) -> u64 {
        Self::upload_wait_mb(size_bytes.div_ceil(BYTES_PER_MB), is_video)
    }

    /// Upload wait for a file of `size_mb` whole megabytes.
    ///
    /// Non-video files get [`UPLOAD_WAIT_SECS`]. Videos get 3 s/MB, floored
    /// at 120 s from 30 MB and capped at 180 s.
    pub fn upload_wait_mb(size_mb: u64, is_video: bool) -> u64 {
        if !is_video {
            return UPLOAD_WAIT_SECS;
        }
        let floor = if size_mb >= LARGE_VIDEO_MB {
            LARGE_VIDEO_FLOOR_SECS
        } else {
            0
        };
        size_mb
            .saturating_mul(VIDEO_SECS_PER_MB)
            .clamp(floor, UPLOAD_WAIT_CAP_SECS)
    }
}

/// Whether `path` looks like a video by extension.
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|v| v.eq_ignore_ascii_case(ext))
        })
}
