//! Web-chat sender addressed by phone number.
//!
//! Opens `{base}/send?phone=<digits>` per contact, waits for the compose box,
//! optionally stages an attachment with a caption, and submits.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    pause_after_send, submit_with_retries, Attachment, ChannelSender, Delivery, ExhaustionPolicy,
    SendError, SendResult, Submission,
};
use crate::config::Channel;
use crate::contacts::Contact;
use crate::dispatch::{
    truncate_diagnostic, wait_seconds, ActionStrategy, CancelToken, DelayPlanner,
    FallbackExecutor, WaitOutcome, WaitPolicy,
};
use crate::driver::{
    click_strategy, press_strategy, type_into_strategy, type_lines, upload_strategy,
    wait_for_any, BrowserDriver, ClickMode, DriverError, Key, Locator,
};

/// Time for the chat page to start rendering after navigation.
const PAGE_SETTLE_SECS: u64 = 3;

/// How long to wait for the compose box of a chat.
const CHAT_READY_SECS: u64 = 15;

/// Pause after opening the attach menu.
const ATTACH_MENU_SECS: u64 = 1;

/// Pause for the attachment preview before touching the caption.
const PREVIEW_SETTLE_SECS: u64 = 2;

const COMPOSE_BOX: &str = r#"//div[@contenteditable="true"][@data-tab="10"]"#;

/// CSS selectors for the chat list or an open chat.
const SESSION_READY: &[&str] = &[
    "#pane-side",
    r#"div[aria-label="Chat list"]"#,
    r#"div[contenteditable="true"][data-tab="10"]"#,
];

const ATTACH_BUTTONS: &[&str] = &[
    r#"//div[@title="Attach" or @aria-label="Attach"]"#,
    r#"//button[@title="Attach" or @aria-label="Attach"]"#,
    r#"//span[@data-icon="plus" or @data-icon="clip"]"#,
];

const FILE_INPUTS: &[&str] = &[r#"//input[@accept="*"]"#, r#"//input[@type="file"]"#];

const CAPTION_BOXES: &[&str] = &[
    r#"//div[@contenteditable="true"][@role="textbox"]"#,
    r#"//div[@contenteditable="true" and contains(@aria-label, "caption")]"#,
    r#"//div[@contenteditable="true" and @data-tab="10"]"#,
    r#"//div[@contenteditable="true" and contains(@class, "lexical")]"#,
    r#"//div[contains(@aria-placeholder, "Add a caption")]"#,
];

const SEND_ICON: &str = r#"//span[@data-icon="send"]"#;
const SEND_BUTTON: &str = r#"//button[@data-testid="send" or contains(@aria-label, "Send")]"#;
const FOOTER_SEND: &str = r#"//footer//button[contains(@class, "compose")]"#;
const ANY_EDITABLE: &str = r#"//div[@contenteditable="true"]"#;

/// Sends through a web-chat front end driven by a [`BrowserDriver`].
pub struct ChatSender {
    driver: Arc<dyn BrowserDriver>,
    base_url: String,
    planner: DelayPlanner,
    ready_timeout_secs: u64,
    exhaustion: ExhaustionPolicy,
}

impl ChatSender {
    /// Sender for the front end at `base_url`.
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        base_url: impl Into<String>,
        planner: DelayPlanner,
        ready_timeout_secs: u64,
        exhaustion: ExhaustionPolicy,
    ) -> Self {
        Self {
            driver,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            planner,
            ready_timeout_secs,
            exhaustion,
        }
    }

    /// Per-contact chat URL.
    pub fn chat_url(&self, phone: &str) -> String {
        format!("{}/send?phone={phone}&app_absent=0", self.base_url)
    }

    async fn open_chat(&self, phone: &str, cancel: &CancelToken) -> Result<(), SendError> {
        let driver = self.driver.as_ref();
        driver
            .navigate(&self.chat_url(phone))
            .await
            .map_err(|e| SendError::Transport(truncate_diagnostic(&e.to_string())))?;
        info!(phone, "opening chat");

        if wait_seconds(PAGE_SETTLE_SECS, cancel, WaitPolicy::Interruptible).await
            == WaitOutcome::Cancelled
        {
            return Err(SendError::Cancelled);
        }
        let compose = [Locator::xpath(COMPOSE_BOX)];
        if wait_for_any(driver, &compose, CHAT_READY_SECS, cancel)
            .await
            .is_none()
        {
            if cancel.is_cancelled() {
                return Err(SendError::Cancelled);
            }
            return Err(SendError::ContextTimeout(format!(
                "chat with {phone} not ready after {CHAT_READY_SECS}s"
            )));
        }
        Ok(())
    }

    async fn send_text(&self, message: &str, cancel: &CancelToken) -> Result<Submission, SendError> {
        let driver = self.driver.as_ref();
        let compose = Locator::xpath(COMPOSE_BOX);
        focus_and_type(driver, &compose, message)
            .await
            .map_err(|e| SendError::Transport(truncate_diagnostic(&e.to_string())))?;

        let submit = [press_strategy("enter-key", driver, compose, Key::Enter)];
        submit_with_retries(&submit, cancel, self.exhaustion).await
    }

    /// Stage the attachment and caption, then submit.
    ///
    /// Upload-stage problems come back as [`SendError::Attachment`] so the
    /// caller can fall back to text.
    async fn send_attachment(
        &self,
        message: &str,
        attachment: &Attachment,
        cancel: &CancelToken,
    ) -> Result<Delivery, SendError> {
        let driver = self.driver.as_ref();
        info!(file = %attachment.file_name(), "attaching file");

        let attach: Vec<ActionStrategy<'_>> = ATTACH_BUTTONS
            .iter()
            .enumerate()
            .map(|(i, xpath)| {
                click_strategy(&format!("attach-button-{}", i.saturating_add(1)), driver, Locator::xpath(xpath), ClickMode::Native)
            })
            .collect();
        if !FallbackExecutor::new("attach-button").run(&attach).await.succeeded {
            return Err(SendError::Attachment("attach button not found".to_owned()));
        }
        if wait_seconds(ATTACH_MENU_SECS, cancel, WaitPolicy::Interruptible).await
            == WaitOutcome::Cancelled
        {
            return Err(SendError::Cancelled);
        }

        let upload: Vec<ActionStrategy<'_>> = FILE_INPUTS
            .iter()
            .enumerate()
            .map(|(i, xpath)| {
                upload_strategy(&format!("file-input-{}", i.saturating_add(1)), driver, Locator::xpath(xpath), &attachment.path)
            })
            .collect();
        if !FallbackExecutor::new("file-input").run(&upload).await.succeeded {
            return Err(SendError::Attachment("file input not found".to_owned()));
        }
        info!(file = %attachment.file_name(), "file staged");
        wait_seconds(PREVIEW_SETTLE_SECS, cancel, WaitPolicy::RunToCompletion).await;

        let mut captioned = message.trim().is_empty();
        if !captioned {
            let caption: Vec<ActionStrategy<'_>> = CAPTION_BOXES
                .iter()
                .enumerate()
                .map(|(i, xpath)| {
                    type_into_strategy(&format!("caption-box-{}", i.saturating_add(1)), driver, Locator::xpath(xpath), message)
                })
                .collect();
            captioned = FallbackExecutor::new("caption-box").run(&caption).await.succeeded;
            if !captioned {
                warn!("caption box not found, attachment will go out without caption");
            }
            wait_seconds(PREVIEW_SETTLE_SECS, cancel, WaitPolicy::RunToCompletion).await;
        }

        let submit = [
            click_strategy("send-icon-script", driver, Locator::xpath(SEND_ICON), ClickMode::Script),
            click_strategy("send-button", driver, Locator::xpath(SEND_BUTTON), ClickMode::Native),
            click_strategy("footer-send-button", driver, Locator::xpath(FOOTER_SEND), ClickMode::Script),
            press_strategy("enter-key", driver, Locator::xpath(ANY_EDITABLE), Key::Enter),
        ];
        let submission = submit_with_retries(&submit, cancel, self.exhaustion).await?;
        if submission == Submission::Unconfirmed {
            return Ok(Delivery::Unconfirmed);
        }
        if captioned {
            return Ok(Delivery::WithAttachment);
        }

        // Caption failed: deliver the text as its own message.
        wait_seconds(PAGE_SETTLE_SECS, cancel, WaitPolicy::RunToCompletion).await;
        match self.send_text(message, cancel).await {
            Ok(_) => Ok(Delivery::AttachmentThenText),
            Err(e) => {
                warn!(error = %e, "follow-up text after attachment failed");
                Ok(Delivery::AttachmentWithoutCaption)
            }
        }
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
        self.open_chat(&contact.identity, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }

        let mut upload_wait = None;
        let delivery = match attachment {
            Some(file) => match self.send_attachment(message, file, cancel).await {
                Ok(delivery) => {
                    upload_wait = Some(file.upload_wait());
                    delivery
                }
                Err(SendError::Attachment(reason)) if !message.trim().is_empty() => {
                    warn!(reason = %reason, "attachment failed, sending text only");
                    self.open_chat(&contact.identity, cancel).await?;
                    self.send_text(message, cancel).await?;
                    Delivery::TextFallback
                }
                Err(e) => return Err(e),
            },
            None => match self.send_text(message, cancel).await? {
                Submission::Confirmed(_) => Delivery::Text,
                Submission::Unconfirmed => Delivery::Unconfirmed,
            },
        };

        info!(identity = %contact.identity, delivery = %delivery, "chat message sent");
        pause_after_send(&self.planner, cancel, upload_wait, Some(self.driver.as_ref())).await;
        Ok(delivery)
    }
}

async fn focus_and_type(driver: &dyn BrowserDriver, compose: &Locator, text: &str) -> Result<(), DriverError> {
    driver.click(compose, ClickMode::Native).await?;
    type_lines(driver, compose, text).await
}

#[async_trait]
impl ChannelSender for ChatSender {
    fn channel(&self) -> Channel {
        Channel::Chat
    }

    async fn open(&self, cancel: &CancelToken) -> Result<(), SendError> {
        let driver = self.driver.as_ref();
        driver
            .navigate(&self.base_url)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        info!(
            url = %self.base_url,
            timeout_secs = self.ready_timeout_secs,
            "waiting for chat session, scan the QR code if prompted"
        );
        let ready: Vec<Locator> = SESSION_READY.iter().map(|css| Locator::css(css)).collect();
        match wait_for_any(driver, &ready, self.ready_timeout_secs, cancel).await {
            Some(_) => Ok(()),
            None if cancel.is_cancelled() => Err(SendError::Cancelled),
            None => Err(SendError::ContextTimeout(format!(
                "chat session not ready after {}s",
                self.ready_timeout_secs
            ))),
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
                warn!(identity = %contact.identity, error = %e, "chat send failed");
                SendResult::failed(&contact.identity, e)
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.driver.close().await {
            warn!(error = %e, "failed to close browser session");
        }
    }
}
