//! Batched file import.
//!
//! Files are classified one at a time: first as a mod archive, then by
//! extension against the copy destination table. A batch holds the
//! [`OperationLock`](crate::lock::OperationLock) from the first file to the
//! last; files enqueued while a batch is draining join that batch.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Mutex;

use questkit_schema::ModVersion;

use crate::context::Context;
use crate::device::{Device, DeviceError};
use crate::lock::{LockError, OperationGuard};
use crate::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
use crate::registry::{ModRegistry, RegistryError};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Another operation is in progress")]
    Busy,

    #[error("No destination accepts '.{0}' files")]
    UnrecognizedFileType(String),

    #[error("The app has not been loaded")]
    AppNotLoaded,

    #[error("The app is not patched for mods")]
    AppNotModded,

    #[error("{} changed while it was being imported", .0.display())]
    NotAMod(PathBuf),

    #[error("No core mods exist for app version {0}")]
    CoreModsUnsupported(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LockError> for ImportError {
    fn from(_: LockError) -> Self {
        Self::Busy
    }
}

impl ImportError {
    /// Failures a user can cause by importing the wrong thing.
    ///
    /// Anything else points at the device, the disk or a bug.
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Busy
            | Self::UnrecognizedFileType(_)
            | Self::AppNotLoaded
            | Self::AppNotModded
            | Self::NotAMod(_)
            | Self::CoreModsUnsupported(_) => true,
            Self::Registry(e) => matches!(
                e,
                RegistryError::Archive { .. }
                    | RegistryError::MissingManifest { .. }
                    | RegistryError::InvalidManifest { .. }
                    | RegistryError::Manifest { .. }
                    | RegistryError::MissingFile { .. }
            ),
            Self::Reconcile(_) | Self::Device(_) | Self::Io(_) => false,
        }
    }
}

type CopyFn = dyn Fn(PathBuf) -> BoxFuture<'static, Result<(), ImportError>> + Send + Sync;

/// Somewhere non-mod files of certain extensions can be copied.
#[derive(Clone)]
pub struct FileCopyDestination {
    pub name: String,
    /// Lowercase, without the leading dot.
    pub extensions: Vec<String>,
    perform_copy: Arc<CopyFn>,
}

impl fmt::Debug for FileCopyDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCopyDestination")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl FileCopyDestination {
    pub fn new<F>(name: impl Into<String>, extensions: &[&str], perform_copy: F) -> Self
    where
        F: Fn(PathBuf) -> BoxFuture<'static, Result<(), ImportError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            perform_copy: Arc::new(perform_copy),
        }
    }

    /// Push matching files into `remote_dir`, keeping their file name.
    pub fn push_to_dir(
        name: impl Into<String>,
        extensions: &[&str],
        device: Device,
        remote_dir: impl Into<String>,
    ) -> Self {
        let remote_dir = remote_dir.into();
        let remote_dir = remote_dir.trim_end_matches('/').to_string();
        Self::new(name, extensions, move |path: PathBuf| {
            let device = device.clone();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let remote = format!("{remote_dir}/{file_name}");
            async move {
                device.push(&path, &remote).await?;
                tracing::info!(remote = %remote, "Copied file to device");
                Ok::<(), ImportError>(())
            }
            .boxed()
        })
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub async fn copy(&self, path: &Path) -> Result<(), ImportError> {
        (self.perform_copy)(path.to_path_buf()).await
    }
}

/// One file waiting to be imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportItem {
    pub path: PathBuf,
    /// Destination name to use if it accepts the file.
    pub preferred: Option<String>,
}

/// What happened to one batch.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub processed: usize,
    pub imported: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    /// In processing order.
    pub failures: Vec<(PathBuf, ImportError)>,
}

impl ImportSummary {
    /// Number of failures that were not [expected](ImportError::is_expected).
    pub fn unexpected_failures(&self) -> usize {
        self.failures.iter().filter(|(_, e)| !e.is_expected()).count()
    }
}

#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Joined a batch that was already draining; that call reports the result.
    Merged,
    Completed(ImportSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Imported,
    Skipped,
}

/// Per-batch core mod gate: evaluated before the first mod install.
#[derive(Debug, Default)]
enum Gate {
    #[default]
    Pending,
    Open,
    Closed(String),
}

#[derive(Debug)]
pub struct ImportQueue {
    ctx: Context,
    copy_table: Vec<FileCopyDestination>,
    /// `Some` while a batch is draining.
    pending: Mutex<Option<VecDeque<ImportItem>>>,
}

impl ImportQueue {
    pub fn new(ctx: Context, copy_table: Vec<FileCopyDestination>) -> Self {
        Self {
            ctx,
            copy_table,
            pending: Mutex::new(None),
        }
    }

    /// Import `paths`, or add them to the batch already in progress.
    pub async fn enqueue(
        &self,
        paths: Vec<PathBuf>,
        preferred: Option<String>,
    ) -> Result<EnqueueOutcome, ImportError> {
        let items = paths.into_iter().map(|path| ImportItem {
            path,
            preferred: preferred.clone(),
        });

        let guard = {
            let mut pending = self.pending.lock().await;
            if let Some(queue) = pending.as_mut() {
                queue.extend(items);
                tracing::debug!(queued = queue.len(), "Merged into running import");
                return Ok(EnqueueOutcome::Merged);
            }

            let guard = self.ctx.lock.try_start(false)?;
            *pending = Some(items.collect());
            guard
        };

        Ok(EnqueueOutcome::Completed(self.drain(guard).await))
    }

    async fn drain(&self, guard: OperationGuard) -> ImportSummary {
        let mut summary = ImportSummary::default();
        let mut gate = Gate::default();

        loop {
            let item = {
                let mut pending = self.pending.lock().await;
                match pending.as_mut().and_then(VecDeque::pop_front) {
                    Some(item) => item,
                    None => {
                        // Release while the queue is still closed to newcomers.
                        *pending = None;
                        drop(guard);
                        break;
                    }
                }
            };

            summary.processed += 1;
            tracing::info!(path = %item.path.display(), "Importing");
            match self.import_file(&item, &guard, &mut gate).await {
                Ok(FileOutcome::Imported) => summary.imported.push(item.path),
                Ok(FileOutcome::Skipped) => {
                    tracing::info!(path = %item.path.display(), "Skipped");
                    summary.skipped.push(item.path);
                }
                Err(e) => {
                    if e.is_expected() {
                        tracing::warn!(path = %item.path.display(), "Import failed: {e}");
                    } else {
                        tracing::error!(path = %item.path.display(), "Import failed: {e}");
                    }
                    summary.failures.push((item.path, e));
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            imported = summary.imported.len(),
            skipped = summary.skipped.len(),
            failed = summary.failures.len(),
            "Import finished"
        );
        summary
    }

    async fn import_file(
        &self,
        item: &ImportItem,
        guard: &OperationGuard,
        gate: &mut Gate,
    ) -> Result<FileOutcome, ImportError> {
        match ModRegistry::identify(&item.path).await? {
            Some(_) => self.import_mod(item, guard, gate).await,
            None => self.copy_file(item).await,
        }
    }

    /// The gate runs before the archive is parsed, so reconciliation cannot
    /// replace the version the user is importing.
    async fn import_mod(
        &self,
        item: &ImportItem,
        guard: &OperationGuard,
        gate: &mut Gate,
    ) -> Result<FileOutcome, ImportError> {
        let (app_version, is_modded) = {
            let app = self.ctx.app.read().await;
            let app = app.as_ref().ok_or(ImportError::AppNotLoaded)?;
            (app.version.clone(), app.is_modded)
        };
        if !is_modded {
            return Err(ImportError::AppNotModded);
        }

        if matches!(gate, Gate::Pending) {
            *gate = self.evaluate_gate(guard).await?;
        }
        if let Gate::Closed(version) = gate {
            return Err(ImportError::CoreModsUnsupported(version.clone()));
        }

        let mut registry = self.ctx.registry.lock().await;
        let m = registry
            .parse_mod(&item.path)
            .await?
            .ok_or_else(|| ImportError::NotAMod(item.path.clone()))?;
        registry.save().await?;

        let mismatch = m
            .package_version()
            .filter(|target| !same_app_version(target, &app_version));
        if let Some(target) = mismatch {
            let confirmed = self
                .ctx
                .prompter
                .confirm_version_mismatch(m.name(), target, &app_version)
                .await;
            if !confirmed {
                return Ok(FileOutcome::Skipped);
            }
        }

        registry.install(m.id()).await?;
        registry.save().await?;

        let missing = registry.missing_dependencies(m.id());
        if !missing.is_empty() {
            tracing::warn!(id = m.id(), missing = %missing.join(", "), "Import the missing dependencies too");
        }
        Ok(FileOutcome::Imported)
    }

    async fn evaluate_gate(&self, guard: &OperationGuard) -> Result<Gate, ImportError> {
        let outcome = Reconciler::new(&self.ctx).reconcile(guard).await?;
        Ok(match outcome {
            ReconcileOutcome::Compliant => Gate::Open,
            ReconcileOutcome::Remediated(report) => {
                for (id, e) in &report.failed {
                    tracing::warn!(id = %id, "Core mod unavailable: {e}");
                }
                Gate::Open
            }
            ReconcileOutcome::Declined(missing) => {
                tracing::warn!(count = missing.len(), "Continuing without core mods");
                Gate::Open
            }
            ReconcileOutcome::Unsupported { proceed: true, .. } => Gate::Open,
            ReconcileOutcome::Unsupported {
                version,
                proceed: false,
            } => Gate::Closed(version),
        })
    }

    async fn copy_file(&self, item: &ImportItem) -> Result<FileOutcome, ImportError> {
        let extension = item
            .path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let mut candidates: Vec<FileCopyDestination> = self
            .copy_table
            .iter()
            .filter(|d| d.supports(&extension))
            .cloned()
            .collect();
        {
            let registry = self.ctx.registry.lock().await;
            for (mod_name, ext) in registry.copy_destinations() {
                if ext.extension.eq_ignore_ascii_case(&extension) {
                    candidates.push(FileCopyDestination::push_to_dir(
                        mod_name,
                        &[ext.extension.as_str()],
                        self.ctx.device.clone(),
                        ext.destination,
                    ));
                }
            }
        }

        if let Some(preferred) = &item.preferred {
            if let Some(pos) = candidates.iter().position(|d| &d.name == preferred) {
                let destination = candidates.swap_remove(pos);
                candidates = vec![destination];
            } else {
                tracing::debug!(preferred = %preferred, "Preferred destination does not accept this file");
            }
        }

        let destination = match candidates.len() {
            0 => return Err(ImportError::UnrecognizedFileType(extension)),
            1 => &candidates[0],
            _ => {
                let names: Vec<String> = candidates.iter().map(|d| d.name.clone()).collect();
                let Some(choice) = self
                    .ctx
                    .prompter
                    .choose_destination(&item.path, &names)
                    .await
                else {
                    return Ok(FileOutcome::Skipped);
                };
                candidates
                    .get(choice)
                    .ok_or(ImportError::UnrecognizedFileType(extension.clone()))?
            }
        };

        tracing::debug!(destination = %destination.name, "Copying file");
        destination.copy(&item.path).await?;
        Ok(FileOutcome::Imported)
    }
}

/// Versions compare by precedence when both parse, so build suffixes are ignored.
fn same_app_version(a: &str, b: &str) -> bool {
    match (ModVersion::parse(a), ModVersion::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::remote_mods_dir;
    use crate::testing::{ScriptedPrompter, TEST_PKG, TestEnv, manifest_json, write_qmod, write_simple_mod};
    use tokio::sync::Notify;

    async fn modded_env(prompter: ScriptedPrompter) -> TestEnv {
        let env = TestEnv::new(None, None, prompter).await;
        env.set_app("1.28.0", true).await;
        env
    }

    fn playlists(env: &TestEnv) -> FileCopyDestination {
        FileCopyDestination::push_to_dir("Playlists", &["bplist"], env.ctx.device.clone(), "/sdcard/playlists/")
    }

    fn touch(env: &TestEnv, name: &str) -> PathBuf {
        let path = env.dir.path().join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    async fn run(queue: &ImportQueue, paths: Vec<PathBuf>, preferred: Option<&str>) -> ImportSummary {
        match queue
            .enqueue(paths, preferred.map(str::to_string))
            .await
            .unwrap()
        {
            EnqueueOutcome::Completed(summary) => summary,
            EnqueueOutcome::Merged => panic!("nothing else was draining"),
        }
    }

    #[tokio::test]
    async fn test_mods_are_installed_after_one_gate_check() {
        let env = modded_env(ScriptedPrompter::yes()).await;
        let a = write_simple_mod(env.dir.path(), "a", "1.0.0");
        let b = write_simple_mod(env.dir.path(), "b", "1.0.0");
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);

        let summary = run(&queue, vec![a.clone(), b.clone()], None).await;
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.imported, vec![a, b]);
        assert!(summary.failures.is_empty());

        // No manifest is configured, so the version counts as unsupported.
        assert_eq!(env.prompter.calls(), vec!["unsupported 1.28.0"]);
        let mods_dir = remote_mods_dir(TEST_PKG);
        assert!(env.runner.remote_file(&format!("{mods_dir}/liba.so")).is_some());
        assert!(env.runner.remote_file(&format!("{mods_dir}/libb.so")).is_some());
        assert!(env.ctx.lock.is_free());
    }

    #[tokio::test]
    async fn test_unsupported_version_blocks_mod_installs() {
        let env = modded_env(ScriptedPrompter::default()).await;
        let a = write_simple_mod(env.dir.path(), "a", "1.0.0");
        let b = write_simple_mod(env.dir.path(), "b", "1.0.0");
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);

        let summary = run(&queue, vec![a, b], None).await;
        assert_eq!(summary.failures.len(), 2);
        assert!(
            summary
                .failures
                .iter()
                .all(|(_, e)| matches!(e, ImportError::CoreModsUnsupported(v) if v == "1.28.0"))
        );
        assert_eq!(env.prompter.calls(), vec!["unsupported 1.28.0"]);

        assert!(env.ctx.registry.lock().await.all().is_empty());
    }

    #[tokio::test]
    async fn test_declined_version_mismatch_skips_mod() {
        let mut prompter = ScriptedPrompter::yes();
        prompter.version_mismatch = false;
        let env = TestEnv::new(None, None, prompter).await;
        env.set_app("1.29.0_88", true).await;
        let a = write_simple_mod(env.dir.path(), "a", "1.0.0");
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);

        let summary = run(&queue, vec![a.clone()], None).await;
        assert_eq!(summary.skipped, vec![a]);
        assert_eq!(
            env.prompter.calls(),
            vec!["unsupported 1.29.0_88", "mismatch a mod 1.28.0 1.29.0_88"]
        );
        assert!(!env.ctx.registry.lock().await.get("a").unwrap().is_installed());
    }

    #[tokio::test]
    async fn test_build_suffix_is_not_a_mismatch() {
        let env = TestEnv::new(None, None, ScriptedPrompter::yes()).await;
        env.set_app("1.28.0_4124311467", true).await;
        let a = write_simple_mod(env.dir.path(), "a", "1.0.0");
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);

        let summary = run(&queue, vec![a], None).await;
        assert_eq!(summary.imported.len(), 1);
        assert!(env.prompter.calls().iter().all(|c| !c.starts_with("mismatch")));
    }

    #[tokio::test]
    async fn test_mods_need_a_patched_app() {
        let env = TestEnv::new(None, None, ScriptedPrompter::yes()).await;
        let a = write_simple_mod(env.dir.path(), "a", "1.0.0");
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);

        let summary = run(&queue, vec![a.clone()], None).await;
        assert!(matches!(summary.failures[0].1, ImportError::AppNotLoaded));

        env.set_app("1.28.0", false).await;
        let summary = run(&queue, vec![a], None).await;
        assert!(matches!(summary.failures[0].1, ImportError::AppNotModded));
        assert!(summary.failures[0].1.is_expected());
        assert!(env.ctx.registry.lock().await.get("a").is_none());
    }

    #[tokio::test]
    async fn test_user_import_can_downgrade_a_core_mod() {
        let mut server = mockito::Server::new_async().await;
        let _manifest = server
            .mock("GET", "/core-mods.json")
            .with_status(200)
            .with_body(
                serde_json::json!({ "1.28.0": { "mods": [
                    { "id": "core", "version": "2.0.0", "downloadLink": "https://unused/core.qmod" }
                ] } })
                .to_string(),
            )
            .create_async()
            .await;
        let env = TestEnv::new(
            Some(format!("{}/core-mods.json", server.url())),
            None,
            ScriptedPrompter::yes(),
        )
        .await;
        env.set_app("1.28.0", true).await;
        env.ctx.core_mods.refresh().await;
        env.add_mod("core", "2.0.0", true).await;
        let older = write_simple_mod(env.dir.path(), "core", "1.0.0");
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);

        let summary = run(&queue, vec![older.clone()], None).await;
        assert_eq!(summary.imported, vec![older]);
        assert!(summary.failures.is_empty());
        assert!(env.prompter.calls().is_empty());

        let registry = env.ctx.registry.lock().await;
        let core = registry.get("core").unwrap();
        assert_eq!(core.version().as_str(), "1.0.0");
        assert!(core.is_installed());
        assert_eq!(registry.all().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_file() {
        let env = modded_env(ScriptedPrompter::yes()).await;
        let broken = touch(&env, "broken.qmod");
        let unknown = touch(&env, "notes.xyz");
        let good = write_simple_mod(env.dir.path(), "good", "1.0.0");
        let playlist = touch(&env, "favourites.bplist");
        env.runner.fail_matching("/sdcard/playlists", "Permission denied");
        let queue = ImportQueue::new(env.ctx.clone(), vec![playlists(&env)]);

        let summary = run(
            &queue,
            vec![broken.clone(), unknown.clone(), good.clone(), playlist.clone()],
            None,
        )
        .await;

        assert_eq!(summary.processed, 4);
        assert_eq!(summary.imported, vec![good]);
        let failed: Vec<&PathBuf> = summary.failures.iter().map(|(p, _)| p).collect();
        assert_eq!(failed, vec![&broken, &unknown, &playlist]);
        assert!(matches!(
            summary.failures[0].1,
            ImportError::Registry(RegistryError::Archive { .. })
        ));
        assert!(matches!(
            summary.failures[1].1,
            ImportError::UnrecognizedFileType(ref ext) if ext == "xyz"
        ));
        assert!(matches!(summary.failures[2].1, ImportError::Device(_)));
        assert_eq!(summary.unexpected_failures(), 1);

        env.runner.clear_failures();
        let summary = run(&queue, vec![playlist], None).await;
        assert_eq!(summary.imported.len(), 1);
        assert!(env.runner.remote_file("/sdcard/playlists/favourites.bplist").is_some());
    }

    #[tokio::test]
    async fn test_destination_choice() {
        let mut prompter = ScriptedPrompter::yes();
        prompter.choice = Some(1);
        let env = modded_env(prompter).await;
        let backups = FileCopyDestination::push_to_dir(
            "Backups",
            &[".BPLIST"],
            env.ctx.device.clone(),
            "/sdcard/backups",
        );
        let queue = ImportQueue::new(env.ctx.clone(), vec![playlists(&env), backups]);
        let file = touch(&env, "Mix.BPlist");

        let summary = run(&queue, vec![file.clone()], None).await;
        assert_eq!(summary.imported.len(), 1);
        assert!(env.runner.remote_file("/sdcard/backups/Mix.BPlist").is_some());
        assert_eq!(env.prompter.calls(), vec!["choose Mix.BPlist Playlists|Backups"]);

        // A preferred destination that accepts the file skips the prompt.
        run(&queue, vec![file.clone()], Some("Playlists")).await;
        assert!(env.runner.remote_file("/sdcard/playlists/Mix.BPlist").is_some());
        assert_eq!(env.prompter.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_choice_skips_file() {
        let mut prompter = ScriptedPrompter::yes();
        prompter.choice = None;
        let env = modded_env(prompter).await;
        let other = FileCopyDestination::push_to_dir("Other", &["bplist"], env.ctx.device.clone(), "/sdcard/other");
        let queue = ImportQueue::new(env.ctx.clone(), vec![playlists(&env), other]);
        let file = touch(&env, "a.bplist");

        let summary = run(&queue, vec![file.clone()], Some("Sabers")).await;
        assert_eq!(summary.skipped, vec![file]);
        assert!(env.runner.remote_files().is_empty());
    }

    #[tokio::test]
    async fn test_installed_mods_add_destinations() {
        let env = modded_env(ScriptedPrompter::yes()).await;
        let mut manifest = manifest_json("sabers", "1.0.0");
        manifest["copyExtensions"] =
            serde_json::json!([{ "extension": "qsaber", "destination": "/sdcard/sabers" }]);
        let qmod = write_qmod(env.dir.path(), "sabers.qmod", &manifest);
        let saber = touch(&env, "red.qsaber");
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);

        let summary = run(&queue, vec![saber.clone()], None).await;
        assert!(matches!(summary.failures[0].1, ImportError::UnrecognizedFileType(_)));

        let summary = run(&queue, vec![qmod, saber], None).await;
        assert_eq!(summary.imported.len(), 2);
        assert!(env.runner.remote_file("/sdcard/sabers/red.qsaber").is_some());
    }

    #[tokio::test]
    async fn test_enqueue_while_draining_joins_the_batch() {
        let env = modded_env(ScriptedPrompter::yes()).await;
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let recorder = {
            let (order, started, release) = (order.clone(), started.clone(), release.clone());
            FileCopyDestination::new("Recorder", &["txt"], move |path: PathBuf| {
                let (order, started, release) = (order.clone(), started.clone(), release.clone());
                async move {
                    let first = {
                        let mut order = order.lock().unwrap();
                        order.push(path.file_name().unwrap().to_string_lossy().into_owned());
                        order.len() == 1
                    };
                    if first {
                        started.notify_one();
                        release.notified().await;
                    }
                    Ok::<(), ImportError>(())
                }
                .boxed()
            })
        };

        let f3 = touch(&env, "f3.txt");
        let f1 = touch(&env, "f1.txt");
        let f2 = touch(&env, "f2.txt");
        let queue = ImportQueue::new(env.ctx.clone(), vec![recorder]);

        let first = queue.enqueue(vec![f3.clone()], None);
        let second = async {
            started.notified().await;
            let outcome = queue.enqueue(vec![f1.clone(), f2.clone()], None).await;
            release.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(second.unwrap(), EnqueueOutcome::Merged));
        let EnqueueOutcome::Completed(summary) = first.unwrap() else {
            panic!("first enqueue should drain");
        };
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.imported, vec![f3, f1, f2.clone()]);
        assert_eq!(*order.lock().unwrap(), vec!["f3.txt", "f1.txt", "f2.txt"]);
        assert!(env.ctx.lock.is_free());

        // The next call starts a fresh batch.
        let summary = run(&queue, vec![f2], None).await;
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn test_busy_lock_rejects_new_batch() {
        let env = modded_env(ScriptedPrompter::yes()).await;
        let queue = ImportQueue::new(env.ctx.clone(), vec![]);
        let guard = env.ctx.lock.try_start(false).unwrap();

        let result = queue.enqueue(vec![touch(&env, "a.txt")], None).await;
        assert!(matches!(result, Err(ImportError::Busy)));
        drop(guard);
        assert!(queue.enqueue(vec![], None).await.is_ok());
    }
}
