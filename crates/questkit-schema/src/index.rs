//! Remote JSON indexes: the per-app-version core-mod manifest and the
//! download mirror table.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::version::ModVersion;

/// A mod required for baseline functionality of one application version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreModEntry {
    /// Id of the required mod.
    pub id: String,
    /// Minimum required version, as published (may fail to parse).
    pub version: String,
    /// Where to download the qmod from.
    #[serde(default)]
    pub download_link: Option<String>,
    /// Suggested file name of the download.
    #[serde(default)]
    pub filename: Option<String>,
}

/// The required mods for one application version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoreModSet {
    /// Publication timestamp, informational only.
    #[serde(default)]
    pub last_updated: Option<String>,
    /// The required mods.
    #[serde(default)]
    pub mods: Vec<CoreModEntry>,
}

/// Core-mod manifest keyed by application version string.
///
/// ```json
/// { "1.28.0_4124311467": { "lastUpdated": "...", "mods": [ { "id": "...", "version": "...", "downloadLink": "..." } ] } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CoreModIndex(BTreeMap<String, CoreModSet>);

impl CoreModIndex {
    /// Required mods for an application version; empty if the version is unknown.
    pub fn get_required(&self, app_version: &str) -> Vec<CoreModEntry> {
        self.0
            .get(app_version)
            .map(|set| set.mods.clone())
            .unwrap_or_default()
    }

    /// Returns `true` if the manifest lists the given application version.
    pub fn supports(&self, app_version: &str) -> bool {
        self.0.contains_key(app_version)
    }

    /// Application versions listed in the manifest, oldest first.
    ///
    /// Keys that do not parse as versions are sorted after the parsable ones.
    pub fn versions(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
        keys.sort_by(|a, b| match (ModVersion::parse(a), ModVersion::parse(b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        });
        keys
    }

    /// Returns `true` if no application version is listed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One entry of the mirror table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MirrorEntry {
    /// Faster or regional copy of the original download.
    #[serde(default)]
    pub mirror_url: Option<String>,
}

/// Maps original download URLs to mirror URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct MirrorTable(HashMap<String, MirrorEntry>);

impl MirrorTable {
    /// Mirror URL for `original`, if one is published.
    pub fn lookup(&self, original: &str) -> Option<&str> {
        self.0
            .get(original)
            .and_then(|entry| entry.mirror_url.as_deref())
    }

    /// Number of originals with a usable mirror.
    pub fn len(&self) -> usize {
        self.0.values().filter(|e| e.mirror_url.is_some()).count()
    }

    /// Returns `true` if no usable mirror is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
