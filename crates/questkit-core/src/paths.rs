use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the questkit home directory, or None if the user's home cannot be resolved.
///
/// `QUESTKIT_HOME` overrides the default of `~/.questkit`.
pub fn try_questkit_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("QUESTKIT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".questkit"))
}

/// Configuration file: `<home>/config.toml`
pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.toml")
}

/// Returns `true` for Android-style package ids such as `com.example.game`.
///
/// Each dot-separated segment starts with a letter and continues with
/// letters, digits or underscores, so a valid id is always a single plain
/// path component and a single shell word.
pub fn is_package_id(id: &str) -> bool {
    !id.is_empty()
        && id.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Per-app state (registry and extracted mods): `<home>/apps/<app_id>`
pub fn app_dir(home: &Path, app_id: &str) -> PathBuf {
    home.join("apps").join(app_id)
}

/// Scratch space for downloads and patching: `<home>/tmp`
pub fn tmp_path(home: &Path) -> PathBuf {
    home.join("tmp")
}

/// Folder on the device the modloader loads mods from.
pub fn remote_mods_dir(package_id: &str) -> String {
    format!("/sdcard/Android/data/{package_id}/files/mods")
}

/// Folder on the device the modloader loads support libraries from.
pub fn remote_libs_dir(package_id: &str) -> String {
    format!("/sdcard/Android/data/{package_id}/files/libs")
}
