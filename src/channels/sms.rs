//! SMS sender that drives the default messaging app over a device bridge.
//!
//! The compose screen is opened with an `am start` intent that carries the
//! recipient and body. The send control is then activated by tapping its
//! configured coordinates or by key navigation. Text compose screens are
//! opened with `exit_on_sent`, so a submit only counts once the messaging app
//! has given up focus.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    pause_after_send, submit_with_retries, Attachment, ChannelSender, Delivery, ExhaustionPolicy,
    SendError, SendResult, Submission,
};
use crate::config::Channel;
use crate::contacts::Contact;
use crate::device::{shell_quote, DeviceBridge, DeviceError};
use crate::dispatch::{
    truncate_diagnostic, wait_seconds, ActionStrategy, CancelToken, DelayPlanner, WaitOutcome,
    WaitPolicy,
};

/// Directory on the device that attachments are pushed to.
pub const REMOTE_DIR: &str = "/sdcard/Download";

/// How long to wait for the messaging app to take focus.
const COMPOSE_READY_SECS: u64 = 10;

/// Substrings of the focused window name that mean a messaging app is up.
const MESSAGING_HINTS: &[&str] = &["messaging", "mms", "sms"];

/// Pause between a submit action and the focus check that confirms it.
const SEND_SETTLE_SECS: u64 = 1;

const FOCUS_QUERY: &str = "dumpsys window | grep mCurrentFocus";

const KEYCODE_DPAD_RIGHT: u32 = 22;
const KEYCODE_TAB: u32 = 61;
const KEYCODE_ENTER: u32 = 66;

/// Sends text messages through an attached Android device.
pub struct SmsSender {
    bridge: Arc<dyn DeviceBridge>,
    planner: DelayPlanner,
    send_button: (u32, u32),
    exhaustion: ExhaustionPolicy,
}

impl SmsSender {
    /// Sender that taps `send_button` to submit.
    pub fn new(
        bridge: Arc<dyn DeviceBridge>,
        planner: DelayPlanner,
        send_button: (u32, u32),
        exhaustion: ExhaustionPolicy,
    ) -> Self {
        Self {
            bridge,
            planner,
            send_button,
            exhaustion,
        }
    }

    async fn compose_text(&self, phone: &str, message: &str) -> Result<(), DeviceError> {
        self.bridge
            .shell(&format!(
                "am start -a android.intent.action.SENDTO -d sms:{phone} --es sms_body {} --ez exit_on_sent true",
                shell_quote(message)
            ))
            .await
            .map(|_| ())
    }

    async fn compose_with_attachment(
        &self,
        phone: &str,
        message: &str,
        attachment: &Attachment,
    ) -> Result<(), DeviceError> {
        let remote = format!("{REMOTE_DIR}/{}", attachment.file_name());
        self.bridge.push(&attachment.path, &remote).await?;
        self.bridge
            .shell(&format!(
                "am start -a android.intent.action.SEND -t {} --eu android.intent.extra.STREAM {} --es address {phone} --es sms_body {}",
                mime_type(&attachment.path),
                shell_quote(&format!("file://{remote}")),
                shell_quote(message)
            ))
            .await
            .map(|_| ())
    }

    /// Poll the focused window until a messaging app owns it, returning the
    /// window description.
    async fn wait_for_compose(&self, cancel: &CancelToken) -> Result<String, SendError> {
        for attempt in 0..=COMPOSE_READY_SECS {
            match self.bridge.shell(FOCUS_QUERY).await {
                Ok(focus) => {
                    let focus = focus.trim().to_lowercase();
                    if MESSAGING_HINTS.iter().any(|hint| focus.contains(hint)) {
                        return Ok(focus);
                    }
                    debug!(focus = %focus.trim(), "messaging app not focused yet");
                }
                Err(e) => debug!(error = %e, "focus query failed"),
            }
            if attempt == COMPOSE_READY_SECS {
                break;
            }
            if wait_seconds(1, cancel, WaitPolicy::Interruptible).await == WaitOutcome::Cancelled {
                return Err(SendError::Cancelled);
            }
        }
        Err(SendError::ContextTimeout(format!(
            "compose screen not focused after {COMPOSE_READY_SECS}s"
        )))
    }

    /// Run the submit strategies. With `compose_focus` set, a strategy only
    /// succeeds once that window has lost focus.
    async fn submit(
        &self,
        compose_focus: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Submission, SendError> {
        let bridge = self.bridge.as_ref();
        let (x, y) = self.send_button;
        let strategies = [
            ActionStrategy::new("tap-send-button", move || async move {
                tap_and_confirm(bridge, (x, y), compose_focus, cancel)
                    .await
                    .map_err(anyhow::Error::from)
            }),
            ActionStrategy::new("dpad-right-enter", move || async move {
                keys_and_confirm(bridge, &[KEYCODE_DPAD_RIGHT, KEYCODE_ENTER], compose_focus, cancel)
                    .await
                    .map_err(anyhow::Error::from)
            }),
            ActionStrategy::new("tab-enter", move || async move {
                keys_and_confirm(bridge, &[KEYCODE_TAB, KEYCODE_ENTER], compose_focus, cancel)
                    .await
                    .map_err(anyhow::Error::from)
            }),
        ];
        submit_with_retries(&strategies, cancel, self.exhaustion).await
    }

    async fn deliver(
        &self,
        contact: &Contact,
        message: &str,
        attachment: Option<&Attachment>,
        cancel: &CancelToken,
    ) -> Result<Delivery, SendError> {
        if attachment.is_none() && message.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let phone = contact.identity.as_str();

        let mut delivery = Delivery::Text;
        let mut upload_wait = None;
        match attachment {
            Some(file) => match self.compose_with_attachment(phone, message, file).await {
                Ok(()) => {
                    delivery = Delivery::WithAttachment;
                    upload_wait = Some(file.upload_wait());
                }
                Err(e) if !message.trim().is_empty() => {
                    warn!(error = %e, "attachment intent failed, sending text only");
                    self.compose_text(phone, message).await.map_err(transport)?;
                    delivery = Delivery::TextFallback;
                }
                Err(e) => return Err(SendError::Attachment(truncate_diagnostic(&e.to_string()))),
            },
            None => self.compose_text(phone, message).await.map_err(transport)?,
        }

        let focus = self.wait_for_compose(cancel).await?;
        // Attachment screens stay open after sending.
        let compose_focus = (delivery != Delivery::WithAttachment).then_some(focus.as_str());
        if self.submit(compose_focus, cancel).await? == Submission::Unconfirmed {
            delivery = Delivery::Unconfirmed;
        }
        info!(identity = %phone, delivery = %delivery, "sms sent");
        pause_after_send(&self.planner, cancel, upload_wait, None).await;
        Ok(delivery)
    }
}

async fn tap_and_confirm(
    bridge: &dyn DeviceBridge,
    (x, y): (u32, u32),
    compose_focus: Option<&str>,
    cancel: &CancelToken,
) -> Result<bool, DeviceError> {
    bridge.tap(x, y).await?;
    Ok(left_compose(bridge, compose_focus, cancel).await)
}

async fn keys_and_confirm(
    bridge: &dyn DeviceBridge,
    codes: &[u32],
    compose_focus: Option<&str>,
    cancel: &CancelToken,
) -> Result<bool, DeviceError> {
    for code in codes {
        bridge.shell(&format!("input keyevent {code}")).await?;
    }
    Ok(left_compose(bridge, compose_focus, cancel).await)
}

/// Whether the compose window gave up focus after a submit action.
///
/// Always true when there is no window to compare against.
async fn left_compose(bridge: &dyn DeviceBridge, compose_focus: Option<&str>, cancel: &CancelToken) -> bool {
    let Some(compose_focus) = compose_focus else {
        return true;
    };
    wait_seconds(SEND_SETTLE_SECS, cancel, WaitPolicy::RunToCompletion).await;
    match bridge.shell(FOCUS_QUERY).await {
        Ok(now) => {
            let now = now.trim().to_lowercase();
            if now == compose_focus {
                debug!(focus = %now, "compose screen still focused after submit");
                false
            } else {
                true
            }
        }
        Err(e) => {
            debug!(error = %e, "focus query after submit failed");
            false
        }
    }
}

fn transport(e: DeviceError) -> SendError {
    SendError::Transport(truncate_diagnostic(&e.to_string()))
}

/// MIME type for an attachment, by extension.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp4" | "m4v" => "video/mp4",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        "vcf" => "text/x-vcard",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn open(&self, _cancel: &CancelToken) -> Result<(), SendError> {
        let booted = self
            .bridge
            .shell("getprop sys.boot_completed")
            .await
            .map_err(|e| SendError::ContextTimeout(format!("device unavailable: {e}")))?;
        if booted.trim() == "1" {
            Ok(())
        } else {
            Err(SendError::ContextTimeout("device has not finished booting".to_owned()))
        }
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
        match self.deliver(contact, message, attachment, cancel).await {
            Ok(delivery) => SendResult::delivered(&contact.identity, delivery),
            Err(e) => {
                warn!(identity = %contact.identity, error = %e, "sms send failed");
                SendResult::failed(&contact.identity, e)
            }
        }
    }
}
