//! TOML configuration
//!
//! Lives at `<home>/config.toml`. Every key is optional; a missing file means
//! defaults for the stock target app.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Package id targeted when nothing else is configured.
pub const DEFAULT_APP_ID: &str = "com.beatgames.beatsaber";

/// Oldest app version the modloader supports.
pub const DEFAULT_MINIMUM_APP_VERSION: &str = "1.16.4";

const DEFAULT_CORE_MODS_URL: &str =
    "https://beatmods.wgzeyu.com/github/BMBFresources/com.beatgames.beatsaber/core-mods.json";

const DEFAULT_MIRROR_URL: &str = "https://bs.wgzeyu.com/localization/mods.json";

/// Errors that can occur when loading or saving the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Package id of the app being modded.
    pub app_id: String,
    /// Apps older than this are refused by the patching preflight.
    pub minimum_app_version: String,
    /// Installer package ids an untampered app may come from. Empty disables the check.
    pub trusted_installers: Vec<String>,
    pub core_mods: CoreModsConfig,
    pub mirror: MirrorConfig,
    pub toolchain: ToolchainConfig,
    pub device: DeviceConfig,
    /// Extra destinations for non-mod files, matched by extension.
    pub file_copies: Vec<FileCopyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            minimum_app_version: DEFAULT_MINIMUM_APP_VERSION.to_string(),
            trusted_installers: Vec::new(),
            core_mods: CoreModsConfig::default(),
            mirror: MirrorConfig::default(),
            toolchain: ToolchainConfig::default(),
            device: DeviceConfig::default(),
            file_copies: Vec::new(),
        }
    }
}

/// Where to fetch the core-mod manifest for each app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreModsConfig {
    /// Manifest URL keyed by package id.
    pub urls: BTreeMap<String, String>,
}

impl Default for CoreModsConfig {
    fn default() -> Self {
        Self {
            urls: BTreeMap::from([(
                DEFAULT_APP_ID.to_string(),
                DEFAULT_CORE_MODS_URL.to_string(),
            )]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Mirror table URL. `None` disables mirror resolution.
    pub url: Option<String>,
    /// How long a fetched table stays fresh.
    pub ttl_secs: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            url: Some(DEFAULT_MIRROR_URL.to_string()),
            ttl_secs: 300,
        }
    }
}

/// External commands for the patching and signing stages.
///
/// Each command is an argv array; `{input}` and `{output}` are replaced with
/// the APK paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    pub patch_command: Option<Vec<String>>,
    pub sign_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Explicit adb binary; looked up on `PATH` when unset.
    pub adb_path: Option<PathBuf>,
}

/// A folder on the device that accepts files with the given extensions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCopyConfig {
    pub name: String,
    /// Extensions without the leading dot.
    pub extensions: Vec<String>,
    pub destination: String,
}

impl Config {
    /// Load a config file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Core-mod manifest URL for `app_id`, if one is known.
    pub fn core_mods_url(&self, app_id: &str) -> Option<&str> {
        self.core_mods.urls.get(app_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.app_id, DEFAULT_APP_ID);
        assert_eq!(config.mirror.ttl_secs, 300);
        assert!(config.core_mods_url(DEFAULT_APP_ID).is_some());
        assert!(config.core_mods_url("com.other").is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            app_id = "com.example.game"
            minimum_app_version = "2.0.0"
            trusted_installers = ["com.android.vending"]

            [core_mods.urls]
            "com.example.game" = "https://example.com/core-mods.json"

            [mirror]
            ttl_secs = 60

            [toolchain]
            patch_command = ["patcher", "{input}", "{output}"]

            [device]
            adb_path = "/opt/adb"

            [[file_copies]]
            name = "Sabers"
            extensions = ["qsaber"]
            destination = "/sdcard/ModData/Sabers"
            "#,
        )
        .unwrap();

        assert_eq!(config.app_id, "com.example.game");
        assert_eq!(config.trusted_installers, vec!["com.android.vending"]);
        assert_eq!(
            config.core_mods_url("com.example.game"),
            Some("https://example.com/core-mods.json")
        );
        assert_eq!(config.mirror.ttl_secs, 60);
        // Keys missing from a present table keep their defaults.
        assert_eq!(config.mirror.url.as_deref(), Some(DEFAULT_MIRROR_URL));
        assert_eq!(config.toolchain.patch_command.as_ref().unwrap().len(), 3);
        assert_eq!(config.toolchain.sign_command, None);
        assert_eq!(config.device.adb_path, Some(PathBuf::from("/opt/adb")));
        assert_eq!(config.file_copies[0].extensions, vec!["qsaber"]);
    }

    #[test]
    fn test_load_missing_file_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        let mut config = Config::default();
        config.app_id = "com.example.game".to_string();
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
