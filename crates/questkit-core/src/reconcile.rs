//! Core mod reconciliation.
//!
//! Compares the mods the manifest requires for the installed app version
//! with the registry and fixes the difference:
//!
//! - **Missing**: no local mod with the id. Reported, remediated on request.
//! - **Outdated**: local version lower than required. Uninstalled, deleted and
//!   reported missing, so the required version gets downloaded.
//! - **Present**: local version equal or newer. Installed if it was disabled.
//!
//! The manifest path never downgrades. An unparsable required version leaves
//! the local mod untouched.

use std::cmp::Ordering;

use thiserror::Error;

use questkit_schema::{CoreModEntry, ModVersion};

use crate::context::Context;
use crate::io::download::{DownloadError, download_file};
use crate::lock::OperationGuard;
use crate::registry::{ModRegistry, RegistryError};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("The app has not been loaded")]
    AppNotLoaded,

    #[error("Core mod '{0}' has no download link")]
    MissingDownloadLink(String),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("{url} is not a mod archive")]
    NotAMod { url: String },

    #[error("Download for core mod '{expected}' contains mod '{found}'")]
    UnexpectedMod { expected: String, found: String },

    #[error("Download for core mod '{id}' is version {found}, older than the required {required}")]
    OutdatedDownload {
        id: String,
        required: String,
        found: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of comparing the registry with the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreModCheck {
    /// The manifest lists no core mods for this app version.
    Unsupported { version: String },
    Compliant,
    /// These required mods are absent (or were outdated and have been removed).
    Missing(Vec<CoreModEntry>),
}

/// Per-item result of [`Reconciler::install_missing`].
#[derive(Debug, Default)]
pub struct RemediationReport {
    pub installed: Vec<String>,
    pub failed: Vec<(String, ReconcileError)>,
}

impl RemediationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Compliant,
    Remediated(RemediationReport),
    /// The user chose not to install the missing mods.
    Declined(Vec<CoreModEntry>),
    /// No core mods are known for this version; `proceed` is the user's answer
    /// to continuing without them.
    Unsupported { version: String, proceed: bool },
}

/// Brings the registry in line with the core mod manifest.
#[derive(Debug)]
pub struct Reconciler<'a> {
    ctx: &'a Context,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Diff the registry against the manifest, fixing what can be fixed locally.
    ///
    /// Outdated mods are removed and persisted right away; mods that are
    /// present but disabled are installed. Nothing is downloaded.
    pub async fn check(&self, guard: &OperationGuard) -> Result<CoreModCheck, ReconcileError> {
        debug_assert!(guard.guards(&self.ctx.lock));

        let version = self
            .ctx
            .app_version()
            .await
            .ok_or(ReconcileError::AppNotLoaded)?;

        if !self.ctx.core_mods.supports(&version) {
            tracing::info!(version = %version, "No core mods known for this app version");
            return Ok(CoreModCheck::Unsupported { version });
        }

        let required = self.ctx.core_mods.get_required(&version);
        let mut registry = self.ctx.registry.lock().await;
        let mut missing = Vec::new();

        for entry in required {
            let Some(local) = registry.get(&entry.id) else {
                missing.push(entry);
                continue;
            };

            let wanted = match ModVersion::parse(&entry.version) {
                Ok(wanted) => wanted,
                Err(e) => {
                    tracing::warn!(
                        id = %entry.id,
                        version = %entry.version,
                        "Cannot compare core mod version, leaving local mod alone: {e}"
                    );
                    continue;
                }
            };

            match local.version().cmp(&wanted) {
                Ordering::Less => {
                    tracing::info!(
                        id = %entry.id,
                        local = %local.version(),
                        required = %wanted,
                        "Core mod outdated"
                    );
                    registry.uninstall(&entry.id).await?;
                    registry.delete_mod(&entry.id).await?;
                    registry.save().await?;
                    missing.push(entry);
                }
                Ordering::Equal | Ordering::Greater => {
                    if !local.is_installed() {
                        tracing::info!(id = %entry.id, "Re-enabling core mod");
                        registry.install(&entry.id).await?;
                        registry.save().await?;
                    }
                }
            }
        }

        if missing.is_empty() {
            Ok(CoreModCheck::Compliant)
        } else {
            Ok(CoreModCheck::Missing(missing))
        }
    }

    /// Download and install each missing mod. One failed item does not stop the rest.
    ///
    /// Version mismatch prompts are skipped: core mods target the installed version.
    pub async fn install_missing(
        &self,
        guard: &OperationGuard,
        missing: Vec<CoreModEntry>,
    ) -> RemediationReport {
        debug_assert!(guard.guards(&self.ctx.lock));

        let mut report = RemediationReport::default();
        for entry in missing {
            match self.install_one(&entry).await {
                Ok(()) => report.installed.push(entry.id),
                Err(e) => {
                    tracing::warn!(id = %entry.id, "Failed to install core mod: {e}");
                    report.failed.push((entry.id, e));
                }
            }
        }
        report
    }

    async fn install_one(&self, entry: &CoreModEntry) -> Result<(), ReconcileError> {
        let link = entry
            .download_link
            .as_deref()
            .ok_or_else(|| ReconcileError::MissingDownloadLink(entry.id.clone()))?;
        let url = self.ctx.mirrors.resolve(link).await;

        tokio::fs::create_dir_all(&self.ctx.scratch).await?;
        let download = tempfile::Builder::new()
            .prefix("coremod-")
            .suffix(".qmod")
            .tempfile_in(&self.ctx.scratch)?
            .into_temp_path();
        download_file(&self.ctx.client, &url, &download).await?;

        // Checked before parsing, which would replace whatever mod has that id.
        let manifest = ModRegistry::identify(&download)
            .await?
            .ok_or_else(|| ReconcileError::NotAMod { url: url.clone() })?;
        if manifest.id != entry.id {
            return Err(ReconcileError::UnexpectedMod {
                expected: entry.id.clone(),
                found: manifest.id,
            });
        }
        let outdated = match (
            ModVersion::parse(&entry.version),
            ModVersion::parse(&manifest.version),
        ) {
            (Ok(required), Ok(found)) => found < required,
            _ => false,
        };
        if outdated {
            return Err(ReconcileError::OutdatedDownload {
                id: entry.id.clone(),
                required: entry.version.clone(),
                found: manifest.version,
            });
        }

        let mut registry = self.ctx.registry.lock().await;
        let parsed = registry
            .parse_mod(&download)
            .await?
            .ok_or_else(|| ReconcileError::NotAMod { url: url.clone() })?;

        registry.install(parsed.id()).await?;
        registry.save().await?;
        tracing::info!(id = parsed.id(), version = %parsed.version(), "Installed core mod");
        Ok(())
    }

    /// Check, then ask the prompter how to handle anything missing.
    pub async fn reconcile(&self, guard: &OperationGuard) -> Result<ReconcileOutcome, ReconcileError> {
        match self.check(guard).await? {
            CoreModCheck::Compliant => Ok(ReconcileOutcome::Compliant),
            CoreModCheck::Unsupported { version } => {
                let supported = self.ctx.core_mods.supported_versions();
                let proceed = self
                    .ctx
                    .prompter
                    .confirm_unsupported_version(&version, &supported)
                    .await;
                Ok(ReconcileOutcome::Unsupported { version, proceed })
            }
            CoreModCheck::Missing(missing) => {
                if self.ctx.prompter.confirm_install_core_mods(&missing).await {
                    Ok(ReconcileOutcome::Remediated(
                        self.install_missing(guard, missing).await,
                    ))
                } else {
                    tracing::info!(count = missing.len(), "Core mod installation declined");
                    Ok(ReconcileOutcome::Declined(missing))
                }
            }
        }
    }
}
