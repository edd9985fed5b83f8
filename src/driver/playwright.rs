//! Concrete [`BrowserDriver`] over HTTP.
//!
//! Connects to a Playwright sidecar's bridge server and translates driver
//! operations into JSON POST requests against its `/execute` endpoint.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{BrowserDriver, ClickMode, DriverError, Key, Locator, PageState};

/// Per-action timeout the sidecar applies to Playwright calls.
const ACTION_TIMEOUT_MS: u64 = 30_000;

/// Per-action timeout for uploads, which carry the whole file.
const UPLOAD_TIMEOUT_MS: u64 = 300_000;

/// Extra time for the HTTP round trip on top of the action timeout.
const TIMEOUT_BUFFER_MS: u64 = 5_000;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// HTTP-based browser driver connecting to the Playwright sidecar.
pub struct PlaywrightDriver {
    client: reqwest::Client,
    base_url: String,
}

/// Response envelope from the bridge server.
#[derive(Debug, Deserialize)]
struct BridgeResponse {
    success: bool,
    result: Option<Value>,
    error: Option<String>,
}

impl PlaywrightDriver {
    /// Create a driver pointing at the sidecar's HTTP API
    /// (e.g. `http://127.0.0.1:9223`).
    pub fn new(base_url: impl Into<String>) -> Self {
        // The builder only fails on TLS backend init.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with connect timeout, using default");
                reqwest::Client::default()
            });

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute(&self, action: &str, mut input: Value, timeout_ms: u64) -> Result<Option<Value>, DriverError> {
        if let Value::Object(map) = &mut input {
            map.insert("action".to_owned(), json!(action));
            map.insert("timeout_ms".to_owned(), json!(timeout_ms));
        }
        let request_timeout =
            std::time::Duration::from_millis(timeout_ms.saturating_add(TIMEOUT_BUFFER_MS));
        let url = format!("{}/execute", self.base_url);

        debug!(action, timeout_ms, "sending browser action to sidecar");

        let response = self
            .client
            .post(&url)
            .json(&input)
            .timeout(request_timeout)
            .send()
            .await
            .map_err(|e| DriverError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Request(format!("bridge returned HTTP {status}")));
        }

        let body: BridgeResponse = response
            .json()
            .await
            .map_err(|e| DriverError::Request(format!("failed to parse bridge response: {e}")))?;

        if body.success {
            Ok(body.result)
        } else {
            let message = body
                .error
                .unwrap_or_else(|| "bridge returned failure with no error message".to_owned());
            if message.contains("not found") || message.contains("no element") {
                Err(DriverError::NotFound(message))
            } else {
                Err(DriverError::Bridge(message))
            }
        }
    }

    fn target(locator: &Locator) -> Value {
        json!({ "selector": locator.selector(), "selector_type": locator.kind() })
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.execute("navigate", json!({ "url": url }), ACTION_TIMEOUT_MS)
            .await
            .map(|_| ())
    }

    async fn locate(&self, locator: &Locator) -> Result<bool, DriverError> {
        let result = self
            .execute("locate", Self::target(locator), ACTION_TIMEOUT_MS)
            .await?;
        Ok(result.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn click(&self, locator: &Locator, mode: ClickMode) -> Result<(), DriverError> {
        let mut input = Self::target(locator);
        input["script"] = json!(mode == ClickMode::Script);
        self.execute("click", input, ACTION_TIMEOUT_MS).await.map(|_| ())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        let mut input = Self::target(locator);
        input["text"] = json!(text);
        self.execute("type", input, ACTION_TIMEOUT_MS).await.map(|_| ())
    }

    async fn press_key(&self, locator: &Locator, key: Key) -> Result<(), DriverError> {
        let mut input = Self::target(locator);
        input["key"] = json!(key.as_str());
        self.execute("press", input, ACTION_TIMEOUT_MS).await.map(|_| ())
    }

    async fn upload_file(&self, locator: &Locator, path: &Path) -> Result<(), DriverError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| DriverError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_owned());

        let mut input = Self::target(locator);
        input["file_name"] = json!(file_name);
        input["file_b64"] = json!(base64::engine::general_purpose::STANDARD.encode(bytes));
        self.execute("upload", input, UPLOAD_TIMEOUT_MS).await.map(|_| ())
    }

    async fn page_state(&self) -> Result<PageState, DriverError> {
        let result = self.execute("state", json!({}), ACTION_TIMEOUT_MS).await?;
        let value = result.unwrap_or(Value::Null);
        Ok(PageState {
            url: value["url"].as_str().unwrap_or_default().to_owned(),
            title: value["title"].as_str().unwrap_or_default().to_owned(),
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.execute("close", json!({}), ACTION_TIMEOUT_MS)
            .await
            .map(|_| ())
    }
}
