//! Configuration loading and validation.
//!
//! Herald uses a two-layer config model:
//! - `herald.toml` ([`HeraldConfig`]): operator-owned defaults, overridden by env vars
//! - [`CampaignConfig`]: built once per run from the file layer plus CLI flags,
//!   immutable while the campaign is running

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

/// Default inter-message delay in seconds.
pub const DEFAULT_DELAY_SECONDS: u64 = 60;

/// Default last data row. Large enough to mean "no upper bound".
pub const DEFAULT_ROW_END: usize = 999_999;

/// Subject used when the operator does not provide one.
pub const DEFAULT_SUBJECT: &str = "Message from Herald";

/// Env var holding the email secret unless `[email].secret_env` names another.
pub const DEFAULT_SECRET_ENV: &str = "HERALD_EMAIL_SECRET";

/// Env var pointing at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "HERALD_CONFIG_PATH";

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config at {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`HeraldConfig`].
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// The row window is inverted.
    #[error("row_start ({start}) is greater than row_end ({end})")]
    InvalidRowRange {
        /// First data row requested.
        start: usize,
        /// Last data row requested.
        end: usize,
    },

    /// An email campaign is missing sender credentials.
    #[error("email campaigns need sender credentials: {0}")]
    MissingCredentials(String),
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Delivery channel for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Web-chat automation addressed by phone number.
    Chat,
    /// Transactional email over SMTP.
    Email,
    /// SMS composed on an Android device through the device bridge.
    Sms,
    /// Second chat-automation target addressed by username.
    Messenger,
}

impl Channel {
    /// Stable lowercase name used in logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Messenger => "messenger",
        }
    }

    /// Whether messages on this channel get a `Hello {name},` greeting.
    pub fn greets(&self) -> bool {
        !matches!(self, Self::Messenger)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Campaign config
// ---------------------------------------------------------------------------

/// Sender credentials for the email channel.
#[derive(Clone)]
pub struct EmailCredentials {
    /// Sender address, also used as the SMTP username.
    pub address: String,
    /// SMTP password or app password.
    pub secret: String,
    /// Subject line for every message in the campaign.
    pub subject: String,
}

impl fmt::Debug for EmailCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailCredentials")
            .field("address", &self.address)
            .field("secret", &"[redacted]")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Per-run campaign configuration.
///
/// Built once when the operator starts a run and never mutated afterwards.
/// Use the `with_*` methods to build it; they apply the clamping rules.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Delivery channel.
    pub channel: Channel,
    /// Message template; `{name}` and `{{name}}` are personalized.
    pub message_template: String,
    /// Optional file sent with every message.
    pub attachment_path: Option<PathBuf>,
    /// Inter-message delay, at least 1.
    pub delay_seconds: u64,
    /// Upper bound of random jitter added to the delay.
    pub jitter_seconds: u64,
    /// First data row (1-based, inclusive), at least 1.
    pub row_start: usize,
    /// Last data row (1-based, inclusive).
    pub row_end: usize,
    /// Phone identities starting with this prefix are skipped.
    pub skip_prefix: Option<String>,
    /// Sender credentials, required for [`Channel::Email`].
    pub email: Option<EmailCredentials>,
    /// Outer watchdog applied to each contact's send.
    pub contact_timeout: Option<Duration>,
    /// Report success when post-upload send retries run out.
    pub best_effort_after_timeout: bool,
}

impl CampaignConfig {
    /// Create a config with default delay, row window and no attachment.
    pub fn new(channel: Channel, message_template: impl Into<String>) -> Self {
        Self {
            channel,
            message_template: message_template.into(),
            attachment_path: None,
            delay_seconds: DEFAULT_DELAY_SECONDS,
            jitter_seconds: 0,
            row_start: 1,
            row_end: DEFAULT_ROW_END,
            skip_prefix: None,
            email: None,
            contact_timeout: None,
            best_effort_after_timeout: false,
        }
    }

    /// Set the inter-message delay, clamped to at least one second.
    #[must_use]
    pub fn with_delay(mut self, seconds: u64) -> Self {
        self.delay_seconds = seconds.max(1);
        self
    }

    /// Set the random jitter bound added on top of the delay.
    #[must_use]
    pub fn with_jitter(mut self, seconds: u64) -> Self {
        self.jitter_seconds = seconds;
        self
    }

    /// Set the inclusive row window; `start` is clamped to at least 1.
    #[must_use]
    pub fn with_rows(mut self, start: usize, end: usize) -> Self {
        self.row_start = start.max(1);
        self.row_end = end;
        self
    }

    /// Skip phone identities with this prefix. Blank prefixes are ignored.
    #[must_use]
    pub fn with_skip_prefix(mut self, prefix: Option<String>) -> Self {
        self.skip_prefix = prefix
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty());
        self
    }

    /// Attach a file to every message.
    #[must_use]
    pub fn with_attachment(mut self, path: Option<PathBuf>) -> Self {
        self.attachment_path = path;
        self
    }

    /// Set email sender credentials.
    #[must_use]
    pub fn with_email(mut self, creds: EmailCredentials) -> Self {
        self.email = Some(creds);
        self
    }

    /// Wrap every send in an outer timeout.
    #[must_use]
    pub fn with_contact_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.contact_timeout = timeout;
        self
    }

    /// Choose the outcome reported when post-upload send retries run out.
    #[must_use]
    pub fn with_best_effort_after_timeout(mut self, enabled: bool) -> Self {
        self.best_effort_after_timeout = enabled;
        self
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRowRange`] when `row_start > row_end`, and
    /// [`ConfigError::MissingCredentials`] for an email campaign without a
    /// sender address or secret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.row_start > self.row_end {
            return Err(ConfigError::InvalidRowRange {
                start: self.row_start,
                end: self.row_end,
            });
        }
        if self.channel == Channel::Email {
            let Some(creds) = &self.email else {
                return Err(ConfigError::MissingCredentials(
                    "no sender configured".to_owned(),
                ));
            };
            if creds.address.trim().is_empty() {
                return Err(ConfigError::MissingCredentials(
                    "sender address is empty".to_owned(),
                ));
            }
            if creds.secret.is_empty() {
                return Err(ConfigError::MissingCredentials(
                    "sender secret is empty".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File config
// ---------------------------------------------------------------------------

/// Top-level operator-owned configuration (`herald.toml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// Campaign defaults.
    pub campaign: CampaignDefaults,
    /// Email sender settings.
    pub email: EmailConfig,
    /// Browser-automation sidecar settings.
    pub browser: BrowserConfig,
    /// Android device bridge settings.
    pub device: DeviceConfig,
}

/// Defaults for per-run campaign settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CampaignDefaults {
    /// Inter-message delay in seconds.
    pub delay_seconds: u64,
    /// Upper bound of random jitter added to the delay.
    pub jitter_seconds: u64,
    /// First data row.
    pub row_start: usize,
    /// Last data row.
    pub row_end: usize,
    /// Phone prefix to skip.
    pub skip_prefix: Option<String>,
    /// Per-contact watchdog in seconds.
    pub contact_timeout_secs: Option<u64>,
    /// Report success when post-upload send retries run out.
    pub best_effort_after_timeout: bool,
}

impl Default for CampaignDefaults {
    fn default() -> Self {
        Self {
            delay_seconds: DEFAULT_DELAY_SECONDS,
            jitter_seconds: 0,
            row_start: 1,
            row_end: DEFAULT_ROW_END,
            skip_prefix: None,
            contact_timeout_secs: None,
            best_effort_after_timeout: false,
        }
    }
}

/// Email sender settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Sender address.
    pub address: Option<String>,
    /// Env var holding the SMTP secret.
    pub secret_env: String,
    /// Subject line.
    pub subject: String,
    /// Explicit SMTP host; derived from the sender domain when unset.
    pub smtp_host: Option<String>,
    /// Explicit SMTP port.
    pub smtp_port: Option<u16>,
}

impl EmailConfig {
    /// SMTP host and port for `address`, with `smtp_host`/`smtp_port` taking
    /// precedence over the relay derived from the sender domain.
    pub fn relay_for(&self, address: &str) -> (String, u16) {
        let (host, port) = crate::channels::email::smtp_endpoint(address);
        (
            self.smtp_host.clone().unwrap_or(host),
            self.smtp_port.unwrap_or(port),
        )
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            address: None,
            secret_env: DEFAULT_SECRET_ENV.to_owned(),
            subject: DEFAULT_SUBJECT.to_owned(),
            smtp_host: None,
            smtp_port: None,
        }
    }
}

/// Browser-automation sidecar settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Root URL of the sidecar's HTTP bridge.
    pub bridge_url: String,
    /// Base URL of the web-chat front end.
    pub chat_base_url: String,
    /// Base URL of the messenger front end.
    pub messenger_base_url: String,
    /// How long to wait for the logged-in UI when opening a session.
    pub ready_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:9223".to_owned(),
            chat_base_url: "https://web.whatsapp.com".to_owned(),
            messenger_base_url: "https://www.messenger.com".to_owned(),
            ready_timeout_secs: 20,
        }
    }
}

/// Android device bridge settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Path to the `adb` executable.
    pub adb_path: String,
    /// Device serial when more than one device is attached.
    pub serial: Option<String>,
    /// Screen X of the messaging app's send button.
    pub send_button_x: u32,
    /// Screen Y of the messaging app's send button.
    pub send_button_y: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_owned(),
            serial: None,
            send_button_x: 1000,
            send_button_y: 2200,
        }
    }
}

impl HeraldConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// The file is `$HERALD_CONFIG_PATH` or `./herald.toml`; a missing file
    /// yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver.
    ///
    /// # Errors
    ///
    /// Same as [`HeraldConfig::load`].
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = env(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("herald.toml"));
        let mut config = match load_config(&path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded config from file");
                config
            }
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                info!("no config file found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(n) = parse_override(&env, "HERALD_DELAY_SECONDS") {
            self.campaign.delay_seconds = n;
        }
        if let Some(n) = parse_override(&env, "HERALD_ROW_START") {
            self.campaign.row_start = n;
        }
        if let Some(n) = parse_override(&env, "HERALD_ROW_END") {
            self.campaign.row_end = n;
        }
        if let Some(v) = env("HERALD_SKIP_PREFIX") {
            self.campaign.skip_prefix = Some(v);
        }
        if let Some(v) = env("HERALD_BRIDGE_URL") {
            self.browser.bridge_url = v;
        }
        if let Some(v) = env("HERALD_ADB_SERIAL") {
            self.device.serial = Some(v);
        }
        if let Some(v) = env("HERALD_EMAIL_ADDRESS") {
            self.email.address = Some(v);
        }
    }

    /// Build the per-run config for `channel` from the file defaults.
    ///
    /// The email secret is looked up through `env` using `[email].secret_env`.
    pub fn campaign(
        &self,
        channel: Channel,
        message_template: impl Into<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> CampaignConfig {
        let defaults = &self.campaign;
        let mut config = CampaignConfig::new(channel, message_template)
            .with_delay(defaults.delay_seconds)
            .with_jitter(defaults.jitter_seconds)
            .with_rows(defaults.row_start, defaults.row_end)
            .with_skip_prefix(defaults.skip_prefix.clone())
            .with_contact_timeout(defaults.contact_timeout_secs.map(Duration::from_secs))
            .with_best_effort_after_timeout(defaults.best_effort_after_timeout);
        if channel == Channel::Email {
            if let Some(address) = &self.email.address {
                config = config.with_email(EmailCredentials {
                    address: address.clone(),
                    secret: env(&self.email.secret_env).unwrap_or_default(),
                    subject: self.email.subject.clone(),
                });
            }
        }
        config
    }
}

fn parse_override<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let value = env(key)?;
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(var = key, value = %value, "ignoring invalid env override");
            None
        }
    }
}

/// Load the operator config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<HeraldConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the default state directory (`~/.herald/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".herald"))
}
