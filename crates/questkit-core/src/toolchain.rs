//! APK patching and signing.
//!
//! The byte-level work happens in external tools. [`ExternalToolchain`] runs
//! the commands from the config; tests substitute their own implementation.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::ToolchainConfig;

#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("No {0} command configured")]
    NotConfigured(&'static str),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{} was not produced", .0.display())]
    MissingOutput(PathBuf),
}

/// Turns a stock APK into one that loads mods, and signs it.
#[async_trait]
pub trait ApkToolchain: Send + Sync + fmt::Debug {
    /// Write a modloader-enabled copy of `input` to `output`.
    async fn patch(&self, input: &Path, output: &Path) -> Result<(), ToolchainError>;

    /// Write a signed copy of `input` to `output`.
    async fn sign(&self, input: &Path, output: &Path) -> Result<(), ToolchainError>;
}

/// Runs configured argv templates; `{input}` and `{output}` are substituted.
#[derive(Debug, Clone, Default)]
pub struct ExternalToolchain {
    patch_command: Option<Vec<String>>,
    sign_command: Option<Vec<String>>,
}

impl ExternalToolchain {
    pub fn new(config: &ToolchainConfig) -> Self {
        Self {
            patch_command: config.patch_command.clone(),
            sign_command: config.sign_command.clone(),
        }
    }

    async fn run(
        step: &'static str,
        template: Option<&[String]>,
        input: &Path,
        output: &Path,
    ) -> Result<(), ToolchainError> {
        let template = template
            .filter(|t| !t.is_empty())
            .ok_or(ToolchainError::NotConfigured(step))?;

        let input = input.to_string_lossy();
        let output_str = output.to_string_lossy();
        let args: Vec<String> = template
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output_str)
            })
            .collect();

        let program = args[0].clone();
        tracing::debug!(step, command = %args.join(" "), "Running toolchain");

        let result = Command::new(&program)
            .args(&args[1..])
            .output()
            .await
            .map_err(|source| ToolchainError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(ToolchainError::Failed {
                program,
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        if !output.is_file() {
            return Err(ToolchainError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl ApkToolchain for ExternalToolchain {
    async fn patch(&self, input: &Path, output: &Path) -> Result<(), ToolchainError> {
        Self::run("patch", self.patch_command.as_deref(), input, output).await
    }

    async fn sign(&self, input: &Path, output: &Path) -> Result<(), ToolchainError> {
        Self::run("sign", self.sign_command.as_deref(), input, output).await
    }
}
