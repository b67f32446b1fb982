//! adb transport for the core [`CommandRunner`] seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use questkit_core::config::DeviceConfig;
use questkit_core::device::{CommandOutput, CommandRunner, DeviceError};

/// Runs `adb <args>` and captures its output.
#[derive(Debug, Clone)]
pub struct AdbRunner {
    program: PathBuf,
}

impl AdbRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the configured adb, or the first one on `PATH`.
    ///
    /// When neither exists the runner is still built; every command will then
    /// fail with a not-found IO error, which only matters for commands that
    /// actually touch the device.
    pub fn locate(config: &DeviceConfig) -> Self {
        if let Some(path) = &config.adb_path {
            return Self::new(path);
        }
        match which::which("adb") {
            Ok(path) => Self::new(path),
            Err(e) => {
                tracing::debug!("adb not found on PATH: {e}");
                Self::new("adb")
            }
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl CommandRunner for AdbRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutput, DeviceError> {
        tracing::debug!(command = %args.join(" "), "adb");
        let output = Command::new(&self.program).args(args).output().await?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
