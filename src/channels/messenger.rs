//! Messenger sender addressed by username.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

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
    click_strategy, press_strategy, type_lines, upload_strategy, wait_for_any, BrowserDriver,
    ClickMode, DriverError, Key, Locator,
};

/// Short wait for optional page elements.
const FAST_WAIT_SECS: u64 = 4;

/// Pause after dismissing an interstitial.
const POST_CLICK_SECS: u64 = 1;

/// Pause after navigating to the front page.
const LANDING_SETTLE_SECS: u64 = 2;

const CONVERSATION_HEADER: &str = r"//h1 | //h2 | //div[contains(@class, 'x1lliihq')]";

const CONTINUE_BUTTONS: &[&str] = &[
    r"//button[.//span[normalize-space()='Continue chatting']]",
    r"//button[normalize-space()='Continue chatting']",
    r"//button[contains(translate(., 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), 'continue chatting')]",
    r"//div[@role='button' and contains(., 'Continue')]",
];

const MESSAGE_BOXES: &[&str] = &[
    r"//div[@role='textbox' and @contenteditable='true']",
    r"//div[@aria-label='Message' and @role='textbox']",
];

const FILE_INPUTS: &[&str] = &[r"//input[@type='file']", r"//input[@accept]"];

const ATTACH_BUTTONS: &[&str] = &[
    r"//div[@aria-label='Attach a file']",
    r"//div[@aria-label='Add Files']",
    r"//div[contains(@aria-label, 'ttach')]",
];

const SEND_BUTTONS: &[&str] = &[
    r"//div[@aria-label='Press enter to send']",
    r"//div[@aria-label='Send' and @role='button']",
];

/// Sends through the messenger web front end.
pub struct MessengerSender {
    driver: Arc<dyn BrowserDriver>,
    base_url: String,
    planner: DelayPlanner,
    ready_timeout_secs: u64,
    exhaustion: ExhaustionPolicy,
}

impl MessengerSender {
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

    /// Per-contact conversation URL.
    pub fn conversation_url(&self, handle: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(handle.as_bytes()).collect();
        format!("{}/t/{encoded}", self.base_url)
    }

    async fn on_login_page(&self) -> bool {
        match self.driver.page_state().await {
            Ok(state) => state.url.to_lowercase().contains("login"),
            Err(e) => {
                debug!(error = %e, "page state unavailable");
                false
            }
        }
    }

    /// Open the conversation and return the located message box.
    async fn open_conversation(&self, handle: &str, cancel: &CancelToken) -> Result<Locator, SendError> {
        let driver = self.driver.as_ref();
        driver
            .navigate(&self.conversation_url(handle))
            .await
            .map_err(|e| SendError::Transport(truncate_diagnostic(&e.to_string())))?;
        info!(handle, "opening conversation");
        wait_for_any(driver, &[Locator::xpath(CONVERSATION_HEADER)], FAST_WAIT_SECS, cancel).await;
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }

        let interstitial: Vec<ActionStrategy<'_>> = CONTINUE_BUTTONS
            .iter()
            .enumerate()
            .map(|(i, xpath)| {
                click_strategy(&format!("continue-chatting-{}", i.saturating_add(1)), driver, Locator::xpath(xpath), ClickMode::Native)
            })
            .collect();
        let dismissed = FallbackExecutor::new("continue-chatting").run(&interstitial).await;
        if dismissed.succeeded
            && wait_seconds(POST_CLICK_SECS, cancel, WaitPolicy::Interruptible).await
                == WaitOutcome::Cancelled
        {
            return Err(SendError::Cancelled);
        }

        let boxes: Vec<Locator> = MESSAGE_BOXES.iter().map(|x| Locator::xpath(x)).collect();
        match wait_for_any(driver, &boxes, FAST_WAIT_SECS, cancel).await {
            Some(index) => boxes
                .into_iter()
                .nth(index)
                .ok_or_else(|| SendError::ContextTimeout("message box vanished".to_owned())),
            None if cancel.is_cancelled() => Err(SendError::Cancelled),
            None => Err(SendError::ContextTimeout(format!("no message box for {handle}"))),
        }
    }

    async fn stage_attachment(&self, attachment: &Attachment) -> Result<(), SendError> {
        let driver = self.driver.as_ref();
        let mut strategies: Vec<ActionStrategy<'_>> = FILE_INPUTS
            .iter()
            .enumerate()
            .map(|(i, xpath)| {
                upload_strategy(&format!("file-input-{}", i.saturating_add(1)), driver, Locator::xpath(xpath), &attachment.path)
            })
            .collect();
        for (i, button) in ATTACH_BUTTONS.iter().enumerate() {
            let path = attachment.path.as_path();
            strategies.push(ActionStrategy::new(
                format!("attach-button-{}", i.saturating_add(1)),
                move || async move {
                    open_picker_and_upload(driver, button, path)
                        .await
                        .map_err(anyhow::Error::from)
                },
            ));
        }

        if FallbackExecutor::new("messenger-upload").run(&strategies).await.succeeded {
            info!(file = %attachment.file_name(), "file staged");
            Ok(())
        } else {
            Err(SendError::Attachment("no file input accepted the attachment".to_owned()))
        }
    }

    async fn type_and_submit(
        &self,
        message_box: &Locator,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<Submission, SendError> {
        let driver = self.driver.as_ref();
        clear_box(driver, message_box).await;
        if !message.trim().is_empty() {
            type_lines(driver, message_box, message)
                .await
                .map_err(|e| SendError::Transport(truncate_diagnostic(&e.to_string())))?;
        }

        let mut submit = vec![press_strategy("enter-key", driver, message_box.clone(), Key::Enter)];
        for (i, xpath) in SEND_BUTTONS.iter().enumerate() {
            submit.push(click_strategy(
                &format!("send-button-{}", i.saturating_add(1)),
                driver,
                Locator::xpath(xpath),
                ClickMode::Native,
            ));
        }
        submit_with_retries(&submit, cancel, self.exhaustion).await
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
        let message_box = self.open_conversation(&contact.identity, cancel).await?;

        let mut upload_wait = None;
        let mut delivery = Delivery::Text;
        if let Some(file) = attachment {
            match self.stage_attachment(file).await {
                Ok(()) => {
                    upload_wait = Some(file.upload_wait());
                    delivery = Delivery::WithAttachment;
                }
                Err(e) if !message.trim().is_empty() => {
                    warn!(error = %e, "attachment failed, sending text only");
                    delivery = Delivery::TextFallback;
                }
                Err(e) => return Err(e),
            }
        }

        if self.type_and_submit(&message_box, message, cancel).await? == Submission::Unconfirmed {
            delivery = Delivery::Unconfirmed;
        }
        info!(identity = %contact.identity, delivery = %delivery, "messenger message sent");
        pause_after_send(&self.planner, cancel, upload_wait, Some(self.driver.as_ref())).await;
        Ok(delivery)
    }
}

async fn open_picker_and_upload(
    driver: &dyn BrowserDriver,
    button: &str,
    path: &std::path::Path,
) -> Result<bool, DriverError> {
    driver.click(&Locator::xpath(button), ClickMode::Native).await?;
    driver
        .upload_file(&Locator::xpath(FILE_INPUTS[0]), path)
        .await?;
    Ok(true)
}

/// Select-all and delete whatever a previous attempt left in the box.
async fn clear_box(driver: &dyn BrowserDriver, message_box: &Locator) {
    let cleared = async {
        driver.click(message_box, ClickMode::Native).await?;
        driver.press_key(message_box, Key::SelectAll).await?;
        driver.press_key(message_box, Key::Backspace).await
    };
    let result: Result<(), DriverError> = cleared.await;
    if let Err(e) = result {
        debug!(error = %e, "could not clear message box");
    }
}

#[async_trait]
impl ChannelSender for MessengerSender {
    fn channel(&self) -> Channel {
        Channel::Messenger
    }

    async fn open(&self, cancel: &CancelToken) -> Result<(), SendError> {
        self.driver
            .navigate(&self.base_url)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        wait_seconds(LANDING_SETTLE_SECS, cancel, WaitPolicy::Interruptible).await;

        let mut waited = 0;
        while self.on_login_page().await {
            if waited == 0 {
                info!(timeout_secs = self.ready_timeout_secs, "log in to messenger in the opened browser");
            }
            if waited >= self.ready_timeout_secs {
                return Err(SendError::ContextTimeout(format!(
                    "still on the login page after {}s",
                    self.ready_timeout_secs
                )));
            }
            if wait_seconds(1, cancel, WaitPolicy::Interruptible).await == WaitOutcome::Cancelled {
                return Err(SendError::Cancelled);
            }
            waited = waited.saturating_add(1);
        }
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }
        Ok(())
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
                warn!(identity = %contact.identity, error = %e, "messenger send failed");
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
