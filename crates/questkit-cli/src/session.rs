//! Wiring shared by every command: config, registry, device and manifests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use tokio::sync::{Mutex, RwLock};

use questkit_core::config::Config;
use questkit_core::coremods::{CoreModManifest, RefreshOutcome};
use questkit_core::device::Device;
use questkit_core::import::{FileCopyDestination, ImportQueue};
use questkit_core::mirror::MirrorResolver;
use questkit_core::patching::{PatchingPipeline, PreflightOptions};
use questkit_core::registry::ModRegistry;
use questkit_core::toolchain::ExternalToolchain;
use questkit_core::{AutoPrompter, Context, OperationLock, Prompter};
use questkit_core::{app_dir, config_path, is_package_id, tmp_path, try_questkit_home};

use crate::USER_AGENT;
use crate::device::AdbRunner;
use crate::prompt::TerminalPrompter;

/// Global flags that shape a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub app: Option<String>,
    pub assume_yes: bool,
}

#[derive(Debug)]
pub struct Session {
    pub home: PathBuf,
    pub config: Config,
    pub ctx: Context,
}

impl Session {
    /// Load config and open the registry without touching the device.
    pub async fn open_offline(opts: &SessionOptions) -> Result<Self> {
        let home = try_questkit_home().context("Could not determine the questkit home directory")?;
        let config_file = config_path(&home);
        let mut config = Config::load(&config_file)
            .with_context(|| format!("Failed to load {}", config_file.display()))?;
        if let Some(app) = &opts.app {
            config.app_id.clone_from(app);
        }
        let app_id = config.app_id.clone();
        if !is_package_id(&app_id) {
            bail!("'{app_id}' is not a valid package id");
        }
        tracing::debug!(app_id = %app_id, home = %home.display(), "Opening session");

        let runner = AdbRunner::locate(&config.device);
        let device = Device::new(Arc::new(runner));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let registry = ModRegistry::open(app_dir(&home, &app_id), device.clone(), &app_id)
            .await
            .context("Failed to open the mod registry")?;

        let prompter: Arc<dyn Prompter> = if opts.assume_yes {
            Arc::new(AutoPrompter { assume_yes: true })
        } else {
            Arc::new(TerminalPrompter)
        };

        let ctx = Context {
            lock: OperationLock::new(),
            app: Arc::new(RwLock::new(None)),
            registry: Arc::new(Mutex::new(registry)),
            core_mods: Arc::new(CoreModManifest::new(
                client.clone(),
                config.core_mods.urls.clone(),
                &app_id,
            )),
            mirrors: Arc::new(MirrorResolver::new(
                client.clone(),
                config.mirror.url.clone(),
                Duration::from_secs(config.mirror.ttl_secs),
            )),
            device,
            client,
            prompter,
            scratch: tmp_path(&home),
        };

        Ok(Self { home, config, ctx })
    }

    /// Open, then probe the device for the app and refresh the core mod manifest.
    pub async fn open(opts: &SessionOptions) -> Result<Self> {
        let session = Self::open_offline(opts).await?;
        session.reload().await?;
        Ok(session)
    }

    /// Re-read the registry, probe the device again and refresh the core mod manifest.
    pub async fn reload(&self) -> Result<()> {
        let ctx = &self.ctx;
        let app_id = self.app_id();

        let (probe, refresh) = tokio::join!(ctx.reload(), ctx.core_mods.refresh());
        if let Err(e) = probe {
            let hint = if e.is_connection_error() {
                ". Check that the headset is connected and this computer is allowed to debug it"
            } else {
                ""
            };
            return Err(anyhow::Error::new(e).context(format!("Failed to inspect {app_id} on the device{hint}")));
        }

        if refresh == RefreshOutcome::NoManifestForApp {
            tracing::debug!(app_id = %app_id, "No core mod manifest configured");
        }
        Ok(())
    }

    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    /// Configured destinations for non-mod files.
    pub fn copy_table(&self) -> Vec<FileCopyDestination> {
        self.config
            .file_copies
            .iter()
            .map(|copy| {
                let extensions: Vec<&str> = copy.extensions.iter().map(String::as_str).collect();
                FileCopyDestination::push_to_dir(
                    copy.name.clone(),
                    &extensions,
                    self.ctx.device.clone(),
                    copy.destination.clone(),
                )
            })
            .collect()
    }

    pub fn import_queue(&self) -> ImportQueue {
        ImportQueue::new(self.ctx.clone(), self.copy_table())
    }

    pub fn pipeline(&self) -> PatchingPipeline {
        PatchingPipeline::new(
            self.ctx.clone(),
            Arc::new(ExternalToolchain::new(&self.config.toolchain)),
            PreflightOptions::from_config(&self.config),
            tmp_path(&self.home),
        )
    }
}
