//! Mod identity and the qmod `mod.json` manifest.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::version::{ModVersion, VersionParseError};

/// File name of the declarative manifest inside a qmod archive.
pub const MANIFEST_FILE_NAME: &str = "mod.json";

/// Oldest and newest major schema versions (`_QPVersion`) understood by this crate.
pub const SUPPORTED_SCHEMA_MAJORS: std::ops::RangeInclusive<u64> = 0..=1;

/// A file inside a qmod that is copied to an arbitrary folder on the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCopy {
    /// Path of the file inside the archive.
    pub name: String,
    /// Full destination path on the device, including the file name.
    pub destination: String,
}

/// A file extension that an installed mod knows how to receive.
///
/// Files with this extension dropped onto the importer are pushed into
/// `destination` on the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CopyExtension {
    /// Extension without the leading dot (e.g. `qsaber`).
    pub extension: String,
    /// Destination folder on the device.
    pub destination: String,
}

/// A dependency declared by a mod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModDependency {
    /// Id of the required mod.
    pub id: String,
    /// Version range string as written by the author (e.g. `^0.15.0`).
    #[serde(default)]
    pub version: String,
    /// Where the dependency can be fetched from when it is absent.
    #[serde(default)]
    pub download_if_missing: Option<String>,
}

/// Errors found while validating a [`ModManifest`].
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// `_QPVersion` names a schema this crate does not understand.
    #[error("Unsupported mod schema version '{0}'")]
    UnsupportedSchema(String),

    /// A required field is empty.
    #[error("Empty field: {0}")]
    EmptyField(&'static str),

    /// An id or archive file name would resolve outside the mod's own folder.
    #[error("{field} '{value}' is not a plain relative name")]
    UnsafePath {
        /// Manifest field holding the value.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// The mod's own version does not parse.
    #[error("Invalid mod version: {0}")]
    Version(#[from] VersionParseError),
}

/// The `mod.json` manifest of a qmod archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModManifest {
    /// Schema version of this manifest.
    #[serde(rename = "_QPVersion")]
    pub schema_version: String,

    /// Unique mod id.
    pub id: String,

    /// Human readable name.
    pub name: String,

    /// Mod author.
    #[serde(default)]
    pub author: String,

    /// Mod version.
    pub version: String,

    /// Package id of the application the mod targets.
    #[serde(default)]
    pub package_id: Option<String>,

    /// Application version the mod was built for; `None` means any.
    #[serde(default)]
    pub package_version: Option<String>,

    /// Optional free text description.
    #[serde(default)]
    pub description: Option<String>,

    /// Libraries are support code for other mods rather than features.
    #[serde(default)]
    pub is_library: bool,

    /// Native mod binaries, copied to the mods folder.
    #[serde(default)]
    pub mod_files: Vec<String>,

    /// Native support libraries, copied to the libs folder.
    #[serde(default)]
    pub library_files: Vec<String>,

    /// Extra files copied to explicit destinations.
    #[serde(default)]
    pub file_copies: Vec<FileCopy>,

    /// File types this mod can receive through the importer.
    #[serde(default)]
    pub copy_extensions: Vec<CopyExtension>,

    /// Other mods this one needs.
    #[serde(default)]
    pub dependencies: Vec<ModDependency>,
}

impl ModManifest {
    /// Validates the manifest and returns its parsed version.
    ///
    /// The id names the mod's folder on disk and the file lists name paths
    /// inside its archive, so none of them may leave that folder.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnsupportedSchema`] if `_QPVersion` does not
    /// parse or has an unknown major version, [`ManifestError::EmptyField`] if
    /// `id` is empty, [`ManifestError::UnsafePath`] if the id or a listed file
    /// is not a plain relative name, or [`ManifestError::Version`] if
    /// `version` does not parse.
    pub fn validate(&self) -> Result<ModVersion, ManifestError> {
        let schema = ModVersion::parse(&self.schema_version)
            .map_err(|_| ManifestError::UnsupportedSchema(self.schema_version.clone()))?;
        if !SUPPORTED_SCHEMA_MAJORS.contains(&schema.major()) {
            return Err(ManifestError::UnsupportedSchema(self.schema_version.clone()));
        }

        if self.id.trim().is_empty() {
            return Err(ManifestError::EmptyField("id"));
        }
        if self.id.contains(['/', '\\']) || !is_enclosed(&self.id) {
            return Err(unsafe_path("id", &self.id));
        }

        let files = self
            .mod_files
            .iter()
            .map(|f| ("modFiles", f))
            .chain(self.library_files.iter().map(|f| ("libraryFiles", f)))
            .chain(self.file_copies.iter().map(|c| ("fileCopies", &c.name)));
        for (field, name) in files {
            if !is_enclosed(name) {
                return Err(unsafe_path(field, name));
            }
        }

        Ok(ModVersion::parse(&self.version)?)
    }
}

fn unsafe_path(field: &'static str, value: &str) -> ManifestError {
    ManifestError::UnsafePath {
        field,
        value: value.to_string(),
    }
}

/// Relative, made only of normal components, and free of backslashes and NULs.
fn is_enclosed(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['\\', '\0'])
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
