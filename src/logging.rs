//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Campaign runs ([`init_production`]) keep a JSON audit trail in a daily
//! rotated file next to the console output, so failed contacts can be
//! traced after the fact. One-shot subcommands ([`init_cli`]) log to stderr only.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated campaign log.
pub const LOG_FILE_PREFIX: &str = "herald.log";

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Keeps the file writer alive.
///
/// Dropping it flushes pending entries, so hold it until the campaign ends.
pub struct LoggingGuard {
    _guard: WorkerGuard,
    log_dir: PathBuf,
}

impl LoggingGuard {
    /// Directory the rotated log files are written to.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialise logging for `send`.
///
/// Writes JSON lines to `{logs_dir}/herald.log.YYYY-MM-DD` and
/// human-readable output to stderr, both filtered by `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_writer(non_blocking);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(LoggingGuard {
        _guard: guard,
        log_dir: logs_dir.to_path_buf(),
    })
}

/// Initialise stderr-only logging for `dedup` and `check`.
///
/// A second call is a no-op.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
