//! Turning the installed app into a modded one.
//!
//! The pipeline walks a fixed sequence of stages. Progress is published on a
//! `watch` channel; a failed stage stops the run and is reported as
//! [`PipelineState::Failed`]. Nothing is retried or rolled back: if the
//! original was already uninstalled, the modded APK in the work directory is
//! left behind for a manual install.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use questkit_schema::{ModVersion, VersionParseError};

use crate::app::InstalledApp;
use crate::config::Config;
use crate::context::Context;
use crate::device::DeviceError;
use crate::lock::OperationGuard;
use crate::toolchain::{ApkToolchain, ToolchainError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchingStage {
    MovingToTemp,
    Patching,
    Signing,
    UninstallingOriginal,
    InstallingModded,
}

impl fmt::Display for PatchingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MovingToTemp => "Copying APK to temp",
            Self::Patching => "Patching",
            Self::Signing => "Signing",
            Self::UninstallingOriginal => "Uninstalling original",
            Self::InstallingModded => "Installing modded APK",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Running(PatchingStage),
    Succeeded,
    Failed(PatchingStage),
}

/// Checks run before anything touches the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightOptions {
    pub minimum_version: String,
    /// Empty accepts any installer.
    pub trusted_installers: Vec<String>,
}

impl PreflightOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            minimum_version: config.minimum_app_version.clone(),
            trusted_installers: config.trusted_installers.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("The app is not installed")]
    AppMissing,

    #[error("Cannot understand app version '{version}': {source}")]
    VersionUnparsable {
        version: String,
        source: VersionParseError,
    },

    #[error("App version {version} is older than the minimum supported {minimum}")]
    AppTooOld { version: String, minimum: String },

    #[error("The app was installed by {} instead of a trusted store", .installer.as_deref().unwrap_or("an unknown installer"))]
    AppTampered { installer: Option<String> },

    #[error("The app is already modded")]
    AlreadyModded,

    #[error("Invalid minimum app version: {0}")]
    MinimumVersion(VersionParseError),
}

#[derive(Error, Debug)]
pub enum StageFailure {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("Package manager reports no APK for {0}")]
    MissingApk(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: PatchingStage,
        source: StageFailure,
    },
}

/// Refuse apps that cannot or should not be patched.
pub fn preflight(app: Option<&InstalledApp>, options: &PreflightOptions) -> Result<(), PreflightError> {
    let app = app.ok_or(PreflightError::AppMissing)?;

    let version = app
        .parsed_version()
        .map_err(|source| PreflightError::VersionUnparsable {
            version: app.version.clone(),
            source,
        })?;
    let minimum =
        ModVersion::parse(&options.minimum_version).map_err(PreflightError::MinimumVersion)?;
    if version < minimum {
        return Err(PreflightError::AppTooOld {
            version: app.version.clone(),
            minimum: options.minimum_version.clone(),
        });
    }

    if !options.trusted_installers.is_empty() {
        let trusted = app
            .installer
            .as_ref()
            .is_some_and(|i| options.trusted_installers.contains(i));
        if !trusted {
            return Err(PreflightError::AppTampered {
                installer: app.installer.clone(),
            });
        }
    }

    if app.is_modded {
        return Err(PreflightError::AlreadyModded);
    }
    Ok(())
}

pub struct PatchingPipeline {
    ctx: Context,
    toolchain: Arc<dyn ApkToolchain>,
    options: PreflightOptions,
    work_root: PathBuf,
    state: watch::Sender<PipelineState>,
}

impl fmt::Debug for PatchingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchingPipeline")
            .field("toolchain", &self.toolchain)
            .field("options", &self.options)
            .field("work_root", &self.work_root)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl PatchingPipeline {
    pub fn new(
        ctx: Context,
        toolchain: Arc<dyn ApkToolchain>,
        options: PreflightOptions,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ctx,
            toolchain,
            options,
            work_root: work_root.into(),
            state: watch::Sender::new(PipelineState::NotStarted),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Preflight, then patch and reinstall the app.
    ///
    /// The caller holds the operation lock for the whole run; the device is
    /// unusable between uninstall and install.
    pub async fn run(&self, guard: &OperationGuard) -> Result<(), PatchError> {
        debug_assert!(guard.guards(&self.ctx.lock));

        let package_id = {
            let app = self.ctx.app.read().await;
            preflight(app.as_ref(), &self.options)?;
            app.as_ref()
                .map(|a| a.package_id.clone())
                .ok_or(PreflightError::AppMissing)?
        };

        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%3f");
        let work_dir = self.work_root.join(format!("patch-{stamp}"));
        tracing::info!(package_id = %package_id, work_dir = %work_dir.display(), "Patching app");

        let original = work_dir.join("original.apk");
        let patched = work_dir.join("patched.apk");
        let signed = work_dir.join("signed.apk");

        self.stage(PatchingStage::MovingToTemp, async {
            tokio::fs::create_dir_all(&work_dir).await?;
            let remote = self
                .ctx
                .device
                .apk_path(&package_id)
                .await?
                .ok_or_else(|| StageFailure::MissingApk(package_id.clone()))?;
            self.ctx.device.pull(&remote, &original).await?;
            Ok::<(), StageFailure>(())
        })
        .await?;

        self.stage(PatchingStage::Patching, async {
            self.toolchain.patch(&original, &patched).await.map_err(StageFailure::from)
        })
        .await?;

        self.stage(PatchingStage::Signing, async {
            self.toolchain.sign(&patched, &signed).await.map_err(StageFailure::from)
        })
        .await?;

        self.stage(PatchingStage::UninstallingOriginal, async {
            self.ctx.device.uninstall_app(&package_id).await.map_err(StageFailure::from)
        })
        .await?;

        self.stage(PatchingStage::InstallingModded, async {
            self.ctx.device.install_apk(&signed).await.map_err(StageFailure::from)
        })
        .await?;

        if let Some(app) = self.ctx.app.write().await.as_mut() {
            app.is_modded = true;
        }
        self.state.send_replace(PipelineState::Succeeded);
        remove_work_dir(&work_dir).await;

        tracing::info!(package_id = %package_id, "App patched");
        Ok(())
    }

    async fn stage<F>(&self, stage: PatchingStage, work: F) -> Result<(), PatchError>
    where
        F: Future<Output = Result<(), StageFailure>>,
    {
        self.state.send_replace(PipelineState::Running(stage));
        tracing::info!("{stage}");

        work.await.map_err(|source| {
            tracing::error!(%stage, "Patching failed: {source}");
            self.state.send_replace(PipelineState::Failed(stage));
            PatchError::Stage { stage, source }
        })
    }
}

async fn remove_work_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        tracing::debug!(dir = %dir.display(), "Could not remove work dir: {e}");
    }
}
