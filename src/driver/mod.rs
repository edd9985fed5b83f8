//! Browser-automation capability used by the chat senders.
//!
//! Senders only see [`BrowserDriver`]. The concrete implementation in
//! [`playwright`] talks to a sidecar over HTTP; tests supply mocks.

pub mod playwright;

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::dispatch::{wait_seconds, ActionStrategy, CancelToken, WaitOutcome, WaitPolicy};

/// Errors from browser-automation operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The request to the automation backend failed.
    #[error("bridge request failed: {0}")]
    Request(String),

    /// The backend answered with an error.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// No element matched the locator.
    #[error("element not found: {0}")]
    NotFound(String),

    /// A local file could not be read for upload.
    #[error("cannot read {path}: {reason}")]
    File {
        /// File that failed.
        path: String,
        /// Underlying error.
        reason: String,
    },
}

/// How to find an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// An XPath expression.
    XPath(String),
    /// A CSS selector.
    Css(String),
}

impl Locator {
    /// XPath locator.
    pub fn xpath(expr: &str) -> Self {
        Self::XPath(expr.to_owned())
    }

    /// CSS locator.
    pub fn css(selector: &str) -> Self {
        Self::Css(selector.to_owned())
    }

    /// Selector text without the kind.
    pub fn selector(&self) -> &str {
        match self {
            Self::XPath(s) | Self::Css(s) => s,
        }
    }

    /// `"xpath"` or `"css"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::XPath(_) => "xpath",
            Self::Css(_) => "css",
        }
    }
}

/// Special keys the senders press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Submit.
    Enter,
    /// Line break inside a compose box.
    ShiftEnter,
    /// Select the whole field.
    SelectAll,
    /// Delete the selection.
    Backspace,
}

impl Key {
    /// Key name in the automation backend's vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "Enter",
            Self::ShiftEnter => "Shift+Enter",
            Self::SelectAll => "Control+A",
            Self::Backspace => "Backspace",
        }
    }
}

/// How to click an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMode {
    /// Real pointer click.
    Native,
    /// Scroll into view and dispatch `element.click()` from script.
    Script,
}

/// Observable state of the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageState {
    /// Current URL.
    pub url: String,
    /// Document title.
    pub title: String,
}

/// Operations a sender may perform on an automated browser.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `url` in the current tab.
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Whether an element matching `locator` is currently present.
    async fn locate(&self, locator: &Locator) -> Result<bool, DriverError>;

    /// Click the first element matching `locator`.
    async fn click(&self, locator: &Locator, mode: ClickMode) -> Result<(), DriverError>;

    /// Type `text` into the first element matching `locator`.
    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), DriverError>;

    /// Press `key` while the element matching `locator` has focus.
    async fn press_key(&self, locator: &Locator, key: Key) -> Result<(), DriverError>;

    /// Set the file of the input matching `locator` to `path`.
    async fn upload_file(&self, locator: &Locator, path: &Path) -> Result<(), DriverError>;

    /// Read URL and title.
    async fn page_state(&self) -> Result<PageState, DriverError>;

    /// End the automation session.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Poll once per second until one of `locators` is present.
///
/// Returns the index of the first locator found, or `None` on timeout or
/// cancellation. Driver errors during polling count as "not yet".
pub async fn wait_for_any(
    driver: &dyn BrowserDriver,
    locators: &[Locator],
    timeout_secs: u64,
    cancel: &CancelToken,
) -> Option<usize> {
    for attempt in 0..=timeout_secs {
        for (index, locator) in locators.iter().enumerate() {
            match driver.locate(locator).await {
                Ok(true) => return Some(index),
                Ok(false) => {}
                Err(e) => debug!(selector = locator.selector(), error = %e, "locate failed while waiting"),
            }
        }
        if attempt == timeout_secs {
            break;
        }
        if wait_seconds(1, cancel, WaitPolicy::Interruptible).await == WaitOutcome::Cancelled {
            return None;
        }
    }
    None
}

/// Type multi-line `text`, inserting soft line breaks between lines.
///
/// Blank lines are kept as breaks but nothing is typed for them.
///
/// # Errors
///
/// Returns the first driver error.
pub async fn type_lines(driver: &dyn BrowserDriver, locator: &Locator, text: &str) -> Result<(), DriverError> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    for (index, line) in lines.iter().enumerate() {
        if !line.trim().is_empty() {
            driver.type_text(locator, line).await?;
        }
        if index < last {
            driver.press_key(locator, Key::ShiftEnter).await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Strategy builders
// ---------------------------------------------------------------------------

/// Strategy that clicks `locator`.
pub fn click_strategy<'a>(
    name: &str,
    driver: &'a dyn BrowserDriver,
    locator: Locator,
    mode: ClickMode,
) -> ActionStrategy<'a> {
    ActionStrategy::new(name, move || {
        let locator = locator.clone();
        async move {
            driver
                .click(&locator, mode)
                .await
                .map(|()| true)
                .map_err(anyhow::Error::from)
        }
    })
}

/// Strategy that presses `key` on `locator`.
pub fn press_strategy<'a>(
    name: &str,
    driver: &'a dyn BrowserDriver,
    locator: Locator,
    key: Key,
) -> ActionStrategy<'a> {
    ActionStrategy::new(name, move || {
        let locator = locator.clone();
        async move {
            driver
                .press_key(&locator, key)
                .await
                .map(|()| true)
                .map_err(anyhow::Error::from)
        }
    })
}

/// Strategy that sets the file input at `locator` to `path`.
pub fn upload_strategy<'a>(
    name: &str,
    driver: &'a dyn BrowserDriver,
    locator: Locator,
    path: &'a Path,
) -> ActionStrategy<'a> {
    ActionStrategy::new(name, move || {
        let locator = locator.clone();
        async move {
            driver
                .upload_file(&locator, path)
                .await
                .map(|()| true)
                .map_err(anyhow::Error::from)
        }
    })
}

/// Strategy that focuses `locator` by script and types multi-line `text`.
///
/// Reports no success, without touching the page, when the element is absent.
pub fn type_into_strategy<'a>(
    name: &str,
    driver: &'a dyn BrowserDriver,
    locator: Locator,
    text: &'a str,
) -> ActionStrategy<'a> {
    ActionStrategy::new(name, move || {
        let locator = locator.clone();
        async move { focus_and_type(driver, &locator, text).await.map_err(anyhow::Error::from) }
    })
}

async fn focus_and_type(driver: &dyn BrowserDriver, locator: &Locator, text: &str) -> Result<bool, DriverError> {
    if !driver.locate(locator).await? {
        return Ok(false);
    }
    driver.click(locator, ClickMode::Script).await?;
    type_lines(driver, locator, text).await?;
    Ok(true)
}
