//! Shared handles passed to every operation.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;

use crate::app::{InstalledApp, ProbeError, SharedApp};
use crate::coremods::CoreModManifest;
use crate::device::Device;
use crate::lock::{LockError, OperationGuard, OperationLock};
use crate::mirror::MirrorResolver;
use crate::prompt::Prompter;
use crate::registry::{RegistryError, SharedRegistry};

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("The device is in use by another operation")]
    DeviceUnavailable,

    #[error(transparent)]
    Busy(#[from] LockError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl ReloadError {
    /// Returns `true` when no usable device answered, as opposed to a failed command.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Probe(ProbeError::Device(e)) if e.is_connection_error())
    }
}

/// Everything a long-running operation needs, cheap to clone.
#[derive(Debug, Clone)]
pub struct Context {
    pub lock: OperationLock,
    pub app: SharedApp,
    pub registry: SharedRegistry,
    pub core_mods: Arc<CoreModManifest>,
    pub mirrors: Arc<MirrorResolver>,
    pub device: Device,
    pub client: Client,
    pub prompter: Arc<dyn Prompter>,
    /// Scratch space for downloads; same volume as the registry.
    pub scratch: PathBuf,
}

impl Context {
    /// Version of the loaded app, if any.
    pub async fn app_version(&self) -> Option<String> {
        self.app.read().await.as_ref().map(|app| app.version.clone())
    }

    /// Forget the loaded app and the in-memory registry, then read both again.
    ///
    /// Runs as an operation of its own; nothing else may start while the app
    /// state is unknown.
    pub async fn reload(&self) -> Result<Option<InstalledApp>, ReloadError> {
        if !self.lock.is_device_available() {
            return Err(ReloadError::DeviceUnavailable);
        }
        let _guard = self.lock.try_start(false)?;

        *self.app.write().await = None;
        let package_id = {
            let mut registry = self.registry.lock().await;
            registry.reload().await?;
            registry.package_id().to_string()
        };

        let app = InstalledApp::probe(&self.device, &package_id, &self.scratch).await?;
        *self.app.write().await = app.clone();
        Ok(app)
    }

    /// Remove the app from the device.
    ///
    /// Android deletes the app's data folder with it, so every mod is
    /// recorded as uninstalled. The caller should hold the lock with the
    /// device marked unavailable.
    pub async fn uninstall_app(&self, guard: &OperationGuard) -> Result<(), RegistryError> {
        debug_assert!(guard.guards(&self.lock));

        let mut registry = self.registry.lock().await;
        self.device.uninstall_app(registry.package_id()).await?;
        *self.app.write().await = None;

        registry.forget_installed();
        registry.save().await?;
        tracing::info!(package_id = registry.package_id(), "Uninstalled app");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedPrompter, TEST_PKG, TestEnv, apk_bytes};

    #[tokio::test]
    async fn test_reload_probes_again_from_saved_state() {
        let env = TestEnv::new(None, None, ScriptedPrompter::yes()).await;
        env.add_mod("saved", "1.0.0", true).await;
        env.ctx.registry.lock().await.save().await.unwrap();
        env.add_mod("unsaved", "1.0.0", false).await;
        env.set_app("1.0.0", true).await;
        env.runner
            .install_app(TEST_PKG, "1.28.0_77", Some("com.oculus.vrshell"), &apk_bytes(true, true));

        let app = env.ctx.reload().await.unwrap().unwrap();
        assert_eq!(app.version, "1.28.0_77");
        assert!(app.is_modded);
        assert_eq!(env.ctx.app.read().await.as_ref(), Some(&app));

        let registry = env.ctx.registry.lock().await;
        assert!(registry.get("saved").unwrap().is_installed());
        assert!(registry.get("unsaved").is_none());
        assert!(env.ctx.lock.is_free());
    }

    #[tokio::test]
    async fn test_reload_waits_for_the_device() {
        let env = TestEnv::new(None, None, ScriptedPrompter::yes()).await;
        env.set_app("1.28.0", true).await;

        let guard = env.ctx.lock.try_start(true).unwrap();
        assert!(matches!(
            env.ctx.reload().await,
            Err(ReloadError::DeviceUnavailable)
        ));
        drop(guard);

        let guard = env.ctx.lock.try_start(false).unwrap();
        assert!(matches!(env.ctx.reload().await, Err(ReloadError::Busy(_))));
        drop(guard);

        // Nothing reports the package, so the app is gone.
        assert_eq!(env.ctx.reload().await.unwrap(), None);
        assert!(env.ctx.app.read().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_errors_are_recognised() {
        let env = TestEnv::new(None, None, ScriptedPrompter::yes()).await;
        env.runner
            .fail_matching("pm list packages", "adb: no devices/emulators found");

        let err = env.ctx.reload().await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_uninstall_app_forgets_installed_mods() {
        let env = TestEnv::new(None, None, ScriptedPrompter::yes()).await;
        env.runner
            .install_app(TEST_PKG, "1.28.0", None, &apk_bytes(true, true));
        env.set_app("1.28.0", true).await;
        env.add_mod("a", "1.0.0", true).await;
        assert!(env.runner.remote_files().iter().any(|f| f.contains("/Android/data/")));

        let guard = env.ctx.lock.try_start(true).unwrap();
        env.ctx.uninstall_app(&guard).await.unwrap();
        drop(guard);

        assert!(env.ctx.app.read().await.is_none());
        assert!(env.runner.installed_apk().is_none());
        assert!(env.runner.remote_files().iter().all(|f| !f.contains("/Android/data/")));
        assert!(env.runner.commands().contains(&format!("uninstall {TEST_PKG}")));

        env.ctx.registry.lock().await.reload().await.unwrap();
        assert!(!env.ctx.registry.lock().await.get("a").unwrap().is_installed());
    }
}
