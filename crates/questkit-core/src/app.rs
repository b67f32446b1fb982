//! The target app as installed on the device.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use questkit_schema::{ModVersion, VersionParseError};

use crate::device::{Device, DeviceError};

/// Files the modloader leaves in a patched APK.
const MODDED_TAGS: [&str; 2] = ["modded.json", "BMBF.modded"];

/// Shared view of the target app. `None` until the startup probe found it.
pub type SharedApp = Arc<RwLock<Option<InstalledApp>>>;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Package manager reports no version for {0}")]
    MissingVersion(String),

    #[error("Package manager reports no APK for {0}")]
    MissingApk(String),

    #[error("Could not read the APK: {0}")]
    Apk(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub package_id: String,
    /// Version name as reported by the device, e.g. `1.28.0_4124311467`.
    pub version: String,
    pub is_modded: bool,
    /// Only 32-bit native libraries are present.
    pub is_32bit: bool,
    /// Package that installed the app, if the device reports one.
    pub installer: Option<String>,
}

/// What inspecting an APK found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApkInfo {
    pub is_modded: bool,
    pub is_32bit: bool,
}

impl InstalledApp {
    /// The version, parsed. Unparsable versions stay an error, never a default.
    pub fn parsed_version(&self) -> Result<ModVersion, VersionParseError> {
        ModVersion::parse(&self.version)
    }

    /// Look for `package_id` on the device. `Ok(None)` means it is not installed.
    ///
    /// The APK is pulled into `scratch` to check for the modloader tag and
    /// the native library layout.
    pub async fn probe(
        device: &Device,
        package_id: &str,
        scratch: &Path,
    ) -> Result<Option<Self>, ProbeError> {
        let Some(installer) = device.package_installer(package_id).await? else {
            tracing::info!(package_id, "App is not installed");
            return Ok(None);
        };

        let version = device
            .version_name(package_id)
            .await?
            .ok_or_else(|| ProbeError::MissingVersion(package_id.to_string()))?;
        let remote_apk = device
            .apk_path(package_id)
            .await?
            .ok_or_else(|| ProbeError::MissingApk(package_id.to_string()))?;

        tokio::fs::create_dir_all(scratch).await?;
        let local = tempfile::Builder::new()
            .prefix("probe-")
            .suffix(".apk")
            .tempfile_in(scratch)?
            .into_temp_path();
        device.pull(&remote_apk, &local).await?;

        let apk = local.to_path_buf();
        let info = tokio::task::spawn_blocking(move || inspect_apk(&apk)).await??;

        let app = Self {
            package_id: package_id.to_string(),
            version,
            is_modded: info.is_modded,
            is_32bit: info.is_32bit,
            installer,
        };
        tracing::info!(
            package_id,
            version = %app.version,
            modded = app.is_modded,
            "Found app"
        );
        Ok(Some(app))
    }
}

/// Check an APK for the modloader tag and its native architecture.
pub fn inspect_apk(path: &Path) -> Result<ApkInfo, ProbeError> {
    let archive = zip::ZipArchive::new(std::fs::File::open(path)?)?;

    let mut is_modded = false;
    let mut has_arm64 = false;
    let mut has_arm32 = false;
    for name in archive.file_names() {
        if MODDED_TAGS.contains(&name) {
            is_modded = true;
        } else if name.starts_with("lib/arm64-v8a/") {
            has_arm64 = true;
        } else if name.starts_with("lib/armeabi-v7a/") {
            has_arm32 = true;
        }
    }

    Ok(ApkInfo {
        is_modded,
        is_32bit: has_arm32 && !has_arm64,
    })
}
