//! Prompter trait for dependency injection
//!
//! Core flows sometimes need a decision from the user. They ask through this
//! trait so that they are not coupled to a terminal, a GUI or a test script.

use std::path::Path;

use async_trait::async_trait;

use questkit_schema::CoreModEntry;

#[async_trait]
pub trait Prompter: Send + Sync + std::fmt::Debug {
    /// No core mods are published for `app_version`. Continue anyway?
    async fn confirm_unsupported_version(&self, app_version: &str, supported: &[String]) -> bool;

    /// Required core mods are missing. Download and install them?
    async fn confirm_install_core_mods(&self, missing: &[CoreModEntry]) -> bool;

    /// A mod targets `mod_app_version` but `app_version` is installed. Install it anyway?
    async fn confirm_version_mismatch(
        &self,
        mod_name: &str,
        mod_app_version: &str,
        app_version: &str,
    ) -> bool;

    /// Several destinations accept `path`. Returns the chosen index, or `None` to skip the file.
    async fn choose_destination(&self, path: &Path, options: &[String]) -> Option<usize>;

    /// Remove `package_id` and its data from the device?
    async fn confirm_uninstall_app(&self, package_id: &str) -> bool;
}

/// Answers every question the same way, for unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPrompter {
    /// Say yes to confirmations and take the first destination offered.
    pub assume_yes: bool,
}

#[async_trait]
impl Prompter for AutoPrompter {
    async fn confirm_unsupported_version(&self, app_version: &str, _supported: &[String]) -> bool {
        tracing::debug!(app_version, answer = self.assume_yes, "Unsupported app version");
        self.assume_yes
    }

    async fn confirm_install_core_mods(&self, missing: &[CoreModEntry]) -> bool {
        tracing::debug!(count = missing.len(), answer = self.assume_yes, "Missing core mods");
        self.assume_yes
    }

    async fn confirm_version_mismatch(
        &self,
        mod_name: &str,
        _mod_app_version: &str,
        _app_version: &str,
    ) -> bool {
        tracing::debug!(mod_name, answer = self.assume_yes, "Mod version mismatch");
        self.assume_yes
    }

    async fn choose_destination(&self, _path: &Path, options: &[String]) -> Option<usize> {
        (self.assume_yes && !options.is_empty()).then_some(0)
    }

    async fn confirm_uninstall_app(&self, package_id: &str) -> bool {
        tracing::debug!(package_id, answer = self.assume_yes, "Uninstall app");
        self.assume_yes
    }
}
