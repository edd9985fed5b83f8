//! Android device bridge used by the SMS sender.
//!
//! [`DeviceBridge`] exposes the few primitives the sender needs: run a shell
//! command on the device, tap, and push a file. [`AdbBridge`]
//! implements them with the `adb` executable.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Number of `get-state` probes before giving up on the device.
const DEVICE_CHECK_RETRIES: u32 = 5;

/// Delay between device probes in milliseconds.
const DEVICE_CHECK_DELAY_MS: u64 = 2000;

/// Upper bound for a single `adb` invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the device bridge.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The bridge executable could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully.
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The command did not finish in time.
    #[error("`{0}` timed out")]
    Timeout(String),

    /// No device answered.
    #[error("no device available")]
    NoDevice,
}

/// Primitives for driving an Android device.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Run `command` in the device shell and return its standard output.
    async fn shell(&self, command: &str) -> Result<String, DeviceError>;

    /// Copy a local file to `remote` on the device.
    async fn push(&self, local: &Path, remote: &str) -> Result<(), DeviceError>;

    /// Tap the screen at (`x`, `y`).
    async fn tap(&self, x: u32, y: u32) -> Result<(), DeviceError> {
        self.shell(&format!("input tap {x} {y}")).await.map(|_| ())
    }
}

/// [`DeviceBridge`] backed by the `adb` command-line tool.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: String,
    serial: Option<String>,
}

impl AdbBridge {
    /// Bridge using `adb_path`, optionally pinned to one device `serial`.
    pub fn new(adb_path: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
        }
    }

    /// Wait until a device reports the `device` state, retrying with a fixed delay.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NoDevice`] when no device comes online.
    pub async fn wait_ready(&self) -> Result<(), DeviceError> {
        for attempt in 0..DEVICE_CHECK_RETRIES {
            match self.run(&["get-state"]).await {
                Ok(state) if state.trim() == "device" => return Ok(()),
                Ok(state) => debug!(attempt, state = %state.trim(), "device not ready"),
                Err(e) => debug!(attempt, error = %e, "device probe failed"),
            }
            if attempt < DEVICE_CHECK_RETRIES.saturating_sub(1) {
                tokio::time::sleep(Duration::from_millis(DEVICE_CHECK_DELAY_MS)).await;
            }
        }
        Err(DeviceError::NoDevice)
    }

    async fn run(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut cmd = tokio::process::Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let command = format!("{} {}", self.adb_path, args.join(" "));
        debug!(command = %command, "running device command");

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| DeviceError::Timeout(command.clone()))?
            .map_err(|source| DeviceError::Spawn {
                program: self.adb_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeviceError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn shell(&self, command: &str) -> Result<String, DeviceError> {
        self.run(&["shell", command]).await
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        let local = local.to_string_lossy();
        self.run(&["push", local.as_ref(), remote]).await.map(|_| ())
    }
}

/// Quote `value` for the device's POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
