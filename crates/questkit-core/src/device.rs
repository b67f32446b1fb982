//! Typed device commands over an opaque transport.
//!
//! The core never talks to adb directly. It builds adb-style argument vectors
//! and hands them to a [`CommandRunner`]; the binary supplies the real
//! transport, tests supply an in-memory one.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Captured result of one device command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No device connected")]
    NoDevice,

    #[error("Device has not authorized this computer")]
    Unauthorized,

    #[error("More than one device connected")]
    MultipleDevices,

    #[error("Device is offline")]
    Offline,

    #[error("`{command}` failed: {output}")]
    Failed { command: String, output: String },

    #[error("Device transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Map a failed command to a known failure signature, or [`DeviceError::Failed`].
    pub fn classify(args: &[String], output: &CommandOutput) -> Self {
        let text = output.combined();
        let lower = text.to_ascii_lowercase();

        if lower.contains("no devices/emulators found") || lower.contains("device not found") {
            Self::NoDevice
        } else if lower.contains("unauthorized") {
            Self::Unauthorized
        } else if lower.contains("more than one device") {
            Self::MultipleDevices
        } else if lower.contains("device offline") {
            Self::Offline
        } else {
            Self::Failed {
                command: args.join(" "),
                output: text.trim().to_string(),
            }
        }
    }

    /// Returns `true` for errors that mean "no usable device" rather than a failed command.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NoDevice | Self::Unauthorized | Self::MultipleDevices | Self::Offline
        )
    }
}

/// Executes one device command. Implementations must not interpret the output.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    async fn run(&self, args: &[String]) -> Result<CommandOutput, DeviceError>;
}

/// Device command vocabulary.
#[derive(Debug, Clone)]
pub struct Device {
    runner: Arc<dyn CommandRunner>,
}

impl Device {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run a command, converting a non-zero exit into a classified error.
    pub async fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<CommandOutput, DeviceError> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        tracing::debug!(command = %args.join(" "), "Running device command");

        let output = self.runner.run(&args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DeviceError::classify(&args, &output))
        }
    }

    pub async fn install_apk(&self, apk: &Path) -> Result<(), DeviceError> {
        self.run(&["install", &apk.to_string_lossy()]).await?;
        Ok(())
    }

    pub async fn uninstall_app(&self, package_id: &str) -> Result<(), DeviceError> {
        self.run(&["uninstall", package_id]).await?;
        Ok(())
    }

    /// Copy a local file to `remote`, creating the parent folder first.
    pub async fn push(&self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        if let Some((parent, _)) = remote.rsplit_once('/') {
            if !parent.is_empty() {
                self.create_dir(parent).await?;
            }
        }
        self.run(&["push", &local.to_string_lossy(), remote]).await?;
        Ok(())
    }

    pub async fn pull(&self, remote: &str, local: &Path) -> Result<(), DeviceError> {
        self.run(&["pull", remote, &local.to_string_lossy()]).await?;
        Ok(())
    }

    pub async fn remove_file(&self, remote: &str) -> Result<(), DeviceError> {
        self.run(&["shell", "rm", "-f", &shell_quote(remote)]).await?;
        Ok(())
    }

    pub async fn create_dir(&self, remote: &str) -> Result<(), DeviceError> {
        self.run(&["shell", "mkdir", "-p", &shell_quote(remote)]).await?;
        Ok(())
    }

    /// Path of the installed APK, e.g. `/data/app/~~x/com.example-1/base.apk`.
    pub async fn apk_path(&self, package_id: &str) -> Result<Option<String>, DeviceError> {
        let output = self.run(&["shell", "pm", "path", package_id]).await?;
        Ok(output
            .stdout
            .lines()
            .filter_map(|l| l.trim().strip_prefix("package:"))
            .find(|p| p.ends_with("base.apk"))
            .or_else(|| {
                output
                    .stdout
                    .lines()
                    .find_map(|l| l.trim().strip_prefix("package:"))
            })
            .map(str::to_string))
    }

    /// Returns `Some(installer)` if the package is installed; the installer may be unknown.
    pub async fn package_installer(
        &self,
        package_id: &str,
    ) -> Result<Option<Option<String>>, DeviceError> {
        let output = self
            .run(&["shell", "pm", "list", "packages", "-i", package_id])
            .await?;

        // `pm list packages` filters by substring; only an exact match counts.
        for line in output.stdout.lines() {
            let Some(rest) = line.trim().strip_prefix("package:") else {
                continue;
            };
            let mut parts = rest.split_whitespace();
            if parts.next() != Some(package_id) {
                continue;
            }
            let installer = parts
                .find_map(|p| p.strip_prefix("installer="))
                .filter(|i| !i.is_empty() && *i != "null")
                .map(str::to_string);
            return Ok(Some(installer));
        }
        Ok(None)
    }

    /// `versionName` reported by the package manager.
    pub async fn version_name(&self, package_id: &str) -> Result<Option<String>, DeviceError> {
        let output = self.run(&["shell", "dumpsys", "package", package_id]).await?;
        Ok(output
            .stdout
            .lines()
            .find_map(|l| l.trim().strip_prefix("versionName="))
            .map(|v| v.trim().to_string()))
    }
}

/// Quote one argument for the device shell.
///
/// `adb shell` joins its arguments with spaces and hands the line to `sh`,
/// so paths taken from mod manifests must be a single quoted word.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
