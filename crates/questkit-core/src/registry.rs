//! The set of mods and libraries known for one app, and their installed state.
//!
//! Accepted archives are extracted into `<dir>/mods/<id>/`; the list itself
//! (in load order) is persisted to `<dir>/registry.json`. Installing a mod
//! pushes its files to the device, uninstalling removes them again.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use questkit_schema::{CopyExtension, MANIFEST_FILE_NAME, ManifestError, ModManifest, ModVersion};

use crate::device::{Device, DeviceError};
use crate::paths::{remote_libs_dir, remote_mods_dir};

const REGISTRY_FILE: &str = "registry.json";

/// Registry shared between the importer, the reconciler and the CLI.
pub type SharedRegistry = Arc<Mutex<ModRegistry>>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{} is not a readable mod archive: {source}", .path.display())]
    Archive {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("{} does not contain mod.json", .path.display())]
    MissingManifest { path: PathBuf },

    #[error("{}: invalid mod.json: {source}", .path.display())]
    InvalidManifest {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        source: ManifestError,
    },

    #[error("No mod with id '{0}'")]
    UnknownMod(String),

    #[error("Mod '{0}' is still installed; uninstall it before deleting")]
    StillInstalled(String),

    #[error("Mod '{id}' lists '{file}' but its archive does not contain it")]
    MissingFile { id: String, file: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A parsed mod or library.
#[derive(Debug, Clone, PartialEq)]
pub struct Mod {
    manifest: ModManifest,
    version: ModVersion,
    installed: bool,
}

impl Mod {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &ModVersion {
        &self.version
    }

    pub fn manifest(&self) -> &ModManifest {
        &self.manifest
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn is_library(&self) -> bool {
        self.manifest.is_library
    }

    /// App version the mod was built for, if it declares one.
    pub fn package_version(&self) -> Option<&str> {
        self.manifest.package_version.as_deref()
    }
}

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    mods: Vec<StoredMod>,
}

#[derive(Serialize, Deserialize)]
struct StoredMod {
    manifest: ModManifest,
    installed: bool,
}

/// Mods known for one app, in load order.
#[derive(Debug)]
pub struct ModRegistry {
    dir: PathBuf,
    device: Device,
    package_id: String,
    mods: Vec<Mod>,
}

impl ModRegistry {
    /// Open the registry stored in `dir`, starting empty if there is none yet.
    pub async fn open(
        dir: impl Into<PathBuf>,
        device: Device,
        package_id: &str,
    ) -> Result<Self, RegistryError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join("mods")).await?;

        let mut registry = Self {
            dir,
            device,
            package_id: package_id.to_string(),
            mods: Vec::new(),
        };
        registry.load().await?;
        Ok(registry)
    }

    /// Replace the in-memory list with the saved one.
    pub async fn reload(&mut self) -> Result<(), RegistryError> {
        self.reset();
        self.load().await
    }

    async fn load(&mut self) -> Result<(), RegistryError> {
        let content = match tokio::fs::read(self.registry_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let file: RegistryFile = serde_json::from_slice(&content)?;
        for stored in file.mods {
            match stored.manifest.validate() {
                Ok(version) => self.mods.push(Mod {
                    manifest: stored.manifest,
                    version,
                    installed: stored.installed,
                }),
                Err(e) => tracing::warn!(id = %stored.manifest.id, "Dropping unreadable registry entry: {e}"),
            }
        }

        tracing::debug!(count = self.mods.len(), "Loaded mod registry");
        Ok(())
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    fn payload_dir(&self, id: &str) -> PathBuf {
        self.dir.join("mods").join(id)
    }

    fn index_of(&self, id: &str) -> Result<usize, RegistryError> {
        self.mods
            .iter()
            .position(|m| m.id() == id)
            .ok_or_else(|| RegistryError::UnknownMod(id.to_string()))
    }

    /// Read the manifest of `path` without touching the registry.
    ///
    /// Classifies the file the same way [`parse_mod`](Self::parse_mod) does:
    /// `Ok(None)` for files that are not mods, an error for broken qmods.
    pub async fn identify(path: &Path) -> Result<Option<ModManifest>, RegistryError> {
        let source = path.to_path_buf();
        let opened = tokio::task::spawn_blocking(move || {
            let is_qmod = has_qmod_extension(&source);
            open_archive(&source, is_qmod)
        })
        .await??;
        Ok(opened.map(|(manifest, _)| manifest))
    }

    /// Try to read `path` as a mod archive and add it to the registry.
    ///
    /// Returns `Ok(None)` when the file simply is not a mod: not a zip, or a
    /// zip without `mod.json`, unless its extension is `.qmod`. An existing
    /// mod with the same id is uninstalled (if needed) and replaced in place.
    pub async fn parse_mod(&mut self, path: &Path) -> Result<Option<Mod>, RegistryError> {
        let is_qmod = has_qmod_extension(path);
        let staging_root = self.dir.join("mods");
        let source = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || {
            read_archive(&source, &staging_root, is_qmod)
        })
        .await??;

        let Some((manifest, version, staging)) = extracted else {
            tracing::debug!(path = %path.display(), "Not a mod archive");
            return Ok(None);
        };
        let id = manifest.id.clone();

        let existing = self.mods.iter().position(|m| m.id() == id);
        if let Some(index) = existing {
            tracing::info!(
                id = %id,
                old = %self.mods[index].version,
                new = %version,
                "Replacing existing mod"
            );
            self.uninstall(&id).await?;
        }

        let payload = self.payload_dir(&id);
        match tokio::fs::remove_dir_all(&payload).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        tokio::fs::rename(staging.path(), &payload).await?;

        let parsed = Mod {
            manifest,
            version,
            installed: false,
        };
        match existing {
            Some(index) => self.mods[index] = parsed.clone(),
            None => self.mods.push(parsed.clone()),
        }

        tracing::info!(id = %id, version = %parsed.version, "Imported mod");
        Ok(Some(parsed))
    }

    /// Local payload file and remote destination for every file the mod installs.
    fn transfers(&self, m: &Mod) -> Vec<(PathBuf, String)> {
        let payload = self.payload_dir(m.id());
        let mods_dir = remote_mods_dir(&self.package_id);
        let libs_dir = remote_libs_dir(&self.package_id);
        let manifest = &m.manifest;

        let file_name = |name: &str| name.rsplit('/').next().unwrap_or(name).to_string();

        manifest
            .mod_files
            .iter()
            .map(|f| (payload.join(f), format!("{mods_dir}/{}", file_name(f))))
            .chain(
                manifest
                    .library_files
                    .iter()
                    .map(|f| (payload.join(f), format!("{libs_dir}/{}", file_name(f)))),
            )
            .chain(
                manifest
                    .file_copies
                    .iter()
                    .map(|c| (payload.join(&c.name), c.destination.clone())),
            )
            .collect()
    }

    /// Push the mod's files to the device. Installing an installed mod is a no-op.
    ///
    /// Dependencies that are known but disabled are installed first.
    /// Dependencies that are not in the registry at all are logged and skipped;
    /// see [`missing_dependencies`](Self::missing_dependencies).
    ///
    /// If any push fails, the files already pushed for that mod are removed
    /// (best effort) and it stays uninstalled.
    pub async fn install(&mut self, id: &str) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        if self.mods[index].installed {
            tracing::debug!(id, "Already installed");
            return Ok(());
        }

        let missing = self.missing_dependencies(id);
        if !missing.is_empty() {
            tracing::warn!(id, missing = %missing.join(", "), "Dependencies are not imported");
        }
        for dependency in self.disabled_dependencies(id) {
            tracing::info!(id, dependency = %dependency, "Installing dependency");
            let index = self.index_of(&dependency)?;
            self.push_files(index).await?;
        }

        self.push_files(index).await
    }

    async fn push_files(&mut self, index: usize) -> Result<(), RegistryError> {
        let id = self.mods[index].id().to_string();
        let transfers = self.transfers(&self.mods[index]);
        let mut pushed: Vec<&str> = Vec::new();

        for (local, remote) in &transfers {
            let result = if local.is_file() {
                self.device
                    .push(local, remote)
                    .await
                    .map_err(RegistryError::from)
            } else {
                Err(RegistryError::MissingFile {
                    id: id.clone(),
                    file: local.display().to_string(),
                })
            };

            if let Err(e) = result {
                tracing::warn!(id = %id, "Install failed, removing pushed files: {e}");
                for remote in pushed {
                    if let Err(cleanup) = self.device.remove_file(remote).await {
                        tracing::debug!(remote, "Cleanup failed: {cleanup}");
                    }
                }
                return Err(e);
            }
            pushed.push(remote);
        }

        self.mods[index].installed = true;
        tracing::info!(id = %id, "Installed mod");
        Ok(())
    }

    /// Declared dependencies of `id` that are not in the registry.
    pub fn missing_dependencies(&self, id: &str) -> Vec<String> {
        self.get(id)
            .map(|m| {
                m.manifest
                    .dependencies
                    .iter()
                    .filter(|d| self.get(&d.id).is_none())
                    .map(|d| d.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Known but uninstalled dependencies of `id`, transitively, deepest first.
    fn disabled_dependencies(&self, id: &str) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen = vec![id.to_string()];
        let mut stack: Vec<(String, bool)> = vec![(id.to_string(), false)];

        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                if current != id {
                    order.push(current);
                }
                continue;
            }
            stack.push((current.clone(), true));
            let Some(m) = self.get(&current) else { continue };
            for dependency in &m.manifest.dependencies {
                let known = self.get(&dependency.id).is_some_and(|d| !d.installed);
                if known && !seen.contains(&dependency.id) {
                    seen.push(dependency.id.clone());
                    stack.push((dependency.id.clone(), false));
                }
            }
        }
        order
    }

    /// Remove the mod's files from the device. Uninstalling an uninstalled mod is a no-op.
    pub async fn uninstall(&mut self, id: &str) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        if !self.mods[index].installed {
            tracing::debug!(id, "Already uninstalled");
            return Ok(());
        }

        for (_, remote) in self.transfers(&self.mods[index]) {
            self.device.remove_file(&remote).await?;
        }

        self.mods[index].installed = false;
        tracing::info!(id, "Uninstalled mod");
        Ok(())
    }

    /// Forget a mod and its extracted payload. Installed mods are refused.
    pub async fn delete_mod(&mut self, id: &str) -> Result<(), RegistryError> {
        let index = self.index_of(id)?;
        if self.mods[index].installed {
            return Err(RegistryError::StillInstalled(id.to_string()));
        }

        self.mods.remove(index);
        match tokio::fs::remove_dir_all(self.payload_dir(id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::warn!(id, "Could not remove mod payload: {e}");
            }
            _ => {}
        }

        tracing::info!(id, "Deleted mod");
        Ok(())
    }

    /// Persist the registry. Writes to a temp file and renames it into place.
    pub async fn save(&self) -> Result<(), RegistryError> {
        let file = RegistryFile {
            mods: self
                .mods
                .iter()
                .map(|m| StoredMod {
                    manifest: m.manifest.clone(),
                    installed: m.installed,
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        let dir = self.dir.clone();
        let path = self.registry_path();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await??;

        tracing::debug!(count = self.mods.len(), "Saved mod registry");
        Ok(())
    }

    /// Forget every entry in memory. The device and the saved file are untouched.
    pub fn reset(&mut self) {
        self.mods.clear();
    }

    /// Record every mod as not installed, for when the app and its data are gone.
    pub fn forget_installed(&mut self) {
        for m in &mut self.mods {
            m.installed = false;
        }
    }

    pub fn get(&self, id: &str) -> Option<&Mod> {
        self.mods.iter().find(|m| m.id() == id)
    }

    /// Every entry, in load order.
    pub fn all(&self) -> &[Mod] {
        &self.mods
    }

    /// Entries that are not libraries.
    pub fn mods(&self) -> impl Iterator<Item = &Mod> {
        self.mods.iter().filter(|m| !m.is_library())
    }

    pub fn libraries(&self) -> impl Iterator<Item = &Mod> {
        self.mods.iter().filter(|m| m.is_library())
    }

    /// File types that installed mods accept, with the name of the declaring mod.
    pub fn copy_destinations(&self) -> Vec<(String, CopyExtension)> {
        self.mods
            .iter()
            .filter(|m| m.installed)
            .flat_map(|m| {
                m.manifest
                    .copy_extensions
                    .iter()
                    .map(|ext| (m.name().to_string(), ext.clone()))
            })
            .collect()
    }
}

fn has_qmod_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("qmod"))
}

type OpenedArchive = (ModManifest, zip::ZipArchive<std::fs::File>);

/// Open `path` as a zip and read its `mod.json`.
fn open_archive(path: &Path, is_qmod: bool) -> Result<Option<OpenedArchive>, RegistryError> {
    let file = std::fs::File::open(path)?;
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(_) if !is_qmod => return Ok(None),
        Err(source) => {
            return Err(RegistryError::Archive {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut raw = String::new();
    match archive.by_name(MANIFEST_FILE_NAME) {
        Ok(mut entry) => {
            entry.read_to_string(&mut raw)?;
        }
        Err(zip::result::ZipError::FileNotFound) if !is_qmod => return Ok(None),
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(RegistryError::MissingManifest {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(RegistryError::Archive {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    let manifest: ModManifest =
        serde_json::from_str(&raw).map_err(|source| RegistryError::InvalidManifest {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some((manifest, archive)))
}

type ExtractedMod = (ModManifest, ModVersion, tempfile::TempDir);

/// Read and validate `mod.json`, then extract the archive into a staging
/// folder under `staging_root`.
fn read_archive(
    path: &Path,
    staging_root: &Path,
    is_qmod: bool,
) -> Result<Option<ExtractedMod>, RegistryError> {
    let Some((manifest, mut archive)) = open_archive(path, is_qmod)? else {
        return Ok(None);
    };
    let version = manifest.validate().map_err(|source| RegistryError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;

    let staging = tempfile::tempdir_in(staging_root)?;
    archive
        .extract(staging.path())
        .map_err(|source| RegistryError::Archive {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Some((manifest, version, staging)))
}
