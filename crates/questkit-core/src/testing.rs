//! In-memory device and qmod fixtures shared by the unit tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use zip::write::SimpleFileOptions;

use crate::device::{CommandOutput, CommandRunner, Device, DeviceError};

#[derive(Debug, Default)]
struct FakeState {
    commands: Vec<String>,
    responses: HashMap<String, String>,
    failures: Vec<(String, String)>,
    remote: HashMap<String, Vec<u8>>,
    installed_apk: Option<Vec<u8>>,
}

/// Records every command and emulates push/pull/rm against an in-memory filesystem.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn device(&self) -> Device {
        Device::new(Arc::new(self.clone()))
    }

    /// Answer the exact command line with `stdout`.
    pub(crate) fn respond(&self, command: &str, stdout: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(command.to_string(), stdout.to_string());
    }

    /// Fail every command whose line contains `pattern`.
    pub(crate) fn fail_matching(&self, pattern: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((pattern.to_string(), stderr.to_string()));
    }

    pub(crate) fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub(crate) fn clear_commands(&self) {
        self.state.lock().unwrap().commands.clear();
    }

    pub(crate) fn set_remote_file(&self, path: &str, contents: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .remote
            .insert(path.to_string(), contents.to_vec());
    }

    pub(crate) fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().remote.get(path).cloned()
    }

    pub(crate) fn remote_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.state.lock().unwrap().remote.keys().cloned().collect();
        files.sort();
        files
    }

    pub(crate) fn installed_apk(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().installed_apk.clone()
    }

    /// Make the package manager report `package_id` at `version`, with `apk` as its base APK.
    pub(crate) fn install_app(
        &self,
        package_id: &str,
        version: &str,
        installer: Option<&str>,
        apk: &[u8],
    ) {
        let apk_path = format!("/data/app/{package_id}-1/base.apk");
        self.respond(
            &format!("shell pm list packages -i {package_id}"),
            &format!(
                "package:{package_id}  installer={}\n",
                installer.unwrap_or("null")
            ),
        );
        self.respond(
            &format!("shell dumpsys package {package_id}"),
            &format!("  versionCode=1\n  versionName={version}\n"),
        );
        self.respond(
            &format!("shell pm path {package_id}"),
            &format!("package:{apk_path}\n"),
        );
        self.set_remote_file(&apk_path, apk);
    }

    fn execute(state: &mut FakeState, args: &[String]) -> CommandOutput {
        let line = args.join(" ");
        if let Some((_, stderr)) = state.failures.iter().find(|(p, _)| line.contains(p.as_str())) {
            return CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: stderr.clone(),
            };
        }

        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        match argv.as_slice() {
            ["push", local, remote] => match std::fs::read(local) {
                Ok(bytes) => {
                    state.remote.insert((*remote).to_string(), bytes);
                    CommandOutput::ok("1 file pushed")
                }
                Err(e) => failed(&format!("adb: error: cannot stat '{local}': {e}")),
            },
            ["pull", remote, local] => match state.remote.get(*remote) {
                Some(bytes) => match std::fs::write(local, bytes) {
                    Ok(()) => CommandOutput::ok("1 file pulled"),
                    Err(e) => failed(&e.to_string()),
                },
                None => failed(&format!("adb: error: remote object '{remote}' does not exist")),
            },
            ["shell", "rm", "-f", remote] => {
                state.remote.remove(&unquote(remote));
                CommandOutput::ok("")
            }
            ["uninstall", package] => {
                let prefix = format!("/sdcard/Android/data/{package}/");
                state.remote.retain(|path, _| !path.starts_with(&prefix));
                state.installed_apk = None;
                CommandOutput::ok("Success")
            }
            ["install", local] => match std::fs::read(local) {
                Ok(bytes) => {
                    state.installed_apk = Some(bytes);
                    CommandOutput::ok("Success")
                }
                Err(e) => failed(&e.to_string()),
            },
            _ => CommandOutput::ok(state.responses.get(&line).cloned().unwrap_or_default()),
        }
    }
}

/// Undo [`shell_quote`](crate::device::shell_quote).
fn unquote(arg: &str) -> String {
    arg.strip_prefix('\'')
        .and_then(|a| a.strip_suffix('\''))
        .map_or_else(|| arg.to_string(), |a| a.replace(r"'\''", "'"))
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        status: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutput, DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(args.join(" "));
        Ok(Self::execute(&mut state, args))
    }
}

/// Minimal valid `mod.json` with one mod binary named `lib<id>.so`.
pub(crate) fn manifest_json(id: &str, version: &str) -> serde_json::Value {
    serde_json::json!({
        "_QPVersion": "0.1.1",
        "id": id,
        "name": format!("{id} mod"),
        "author": "tester",
        "version": version,
        "packageId": "com.example.game",
        "packageVersion": "1.28.0",
        "modFiles": [format!("lib{id}.so")],
        "libraryFiles": [],
    })
}

/// Write a zip containing `mod.json` (when given) and `files`.
pub(crate) fn write_archive(
    dir: &Path,
    file_name: &str,
    manifest: Option<&str>,
    files: &[(&str, &[u8])],
) -> PathBuf {
    let path = dir.join(file_name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    if let Some(manifest) = manifest {
        zip.start_file("mod.json", options).unwrap();
        zip.write_all(manifest.as_bytes()).unwrap();
    }
    for (name, contents) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Write a qmod whose manifest is `manifest` and whose mod files all exist.
pub(crate) fn write_qmod(dir: &Path, file_name: &str, manifest: &serde_json::Value) -> PathBuf {
    let mut names: Vec<String> = Vec::new();
    for key in ["modFiles", "libraryFiles"] {
        if let Some(list) = manifest[key].as_array() {
            names.extend(list.iter().filter_map(|v| v.as_str().map(str::to_string)));
        }
    }
    if let Some(copies) = manifest["fileCopies"].as_array() {
        names.extend(
            copies
                .iter()
                .filter_map(|c| c["name"].as_str().map(str::to_string)),
        );
    }

    let files: Vec<(&str, &[u8])> = names
        .iter()
        .map(|n| (n.as_str(), n.as_bytes()))
        .collect();
    write_archive(dir, file_name, Some(&manifest.to_string()), &files)
}

/// A qmod for `id` at `version`, named `<id>-<version>.qmod`.
pub(crate) fn write_simple_mod(dir: &Path, id: &str, version: &str) -> PathBuf {
    write_qmod(
        dir,
        &format!("{id}-{version}.qmod"),
        &manifest_json(id, version),
    )
}

/// An APK-shaped zip; `modded` adds the modloader tag.
pub(crate) fn apk_bytes(modded: bool, arm64: bool) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = SimpleFileOptions::default();
        zip.start_file("AndroidManifest.xml", options).unwrap();
        zip.write_all(b"manifest").unwrap();
        let lib = if arm64 {
            "lib/arm64-v8a/libunity.so"
        } else {
            "lib/armeabi-v7a/libunity.so"
        };
        zip.start_file(lib, options).unwrap();
        zip.write_all(b"so").unwrap();
        if modded {
            zip.start_file("modded.json", options).unwrap();
            zip.write_all(b"{}").unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

/// Answers from fields and records every question asked.
#[derive(Debug, Default)]
pub(crate) struct ScriptedPrompter {
    pub(crate) unsupported: bool,
    pub(crate) install_core_mods: bool,
    pub(crate) version_mismatch: bool,
    pub(crate) choice: Option<usize>,
    pub(crate) uninstall_app: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    /// Says yes to everything and picks the first destination.
    pub(crate) fn yes() -> Self {
        Self {
            unsupported: true,
            install_core_mods: true,
            version_mismatch: true,
            choice: Some(0),
            uninstall_app: true,
            calls: Mutex::default(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl crate::prompt::Prompter for ScriptedPrompter {
    async fn confirm_unsupported_version(&self, app_version: &str, _supported: &[String]) -> bool {
        self.record(format!("unsupported {app_version}"));
        self.unsupported
    }

    async fn confirm_install_core_mods(&self, missing: &[questkit_schema::CoreModEntry]) -> bool {
        let ids: Vec<&str> = missing.iter().map(|m| m.id.as_str()).collect();
        self.record(format!("install-core-mods {}", ids.join(",")));
        self.install_core_mods
    }

    async fn confirm_version_mismatch(
        &self,
        mod_name: &str,
        mod_app_version: &str,
        app_version: &str,
    ) -> bool {
        self.record(format!("mismatch {mod_name} {mod_app_version} {app_version}"));
        self.version_mismatch
    }

    async fn choose_destination(&self, path: &Path, options: &[String]) -> Option<usize> {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        self.record(format!("choose {name} {}", options.join("|")));
        self.choice
    }

    async fn confirm_uninstall_app(&self, package_id: &str) -> bool {
        self.record(format!("uninstall-app {package_id}"));
        self.uninstall_app
    }
}

pub(crate) const TEST_PKG: &str = "com.example.game";

/// A sandboxed [`Context`](crate::context::Context) over a [`FakeRunner`].
pub(crate) struct TestEnv {
    pub(crate) dir: tempfile::TempDir,
    pub(crate) runner: FakeRunner,
    pub(crate) prompter: Arc<ScriptedPrompter>,
    pub(crate) ctx: crate::context::Context,
}

impl TestEnv {
    /// `core_mods_url` and `mirror_url` point at mock servers, if the test needs them.
    pub(crate) async fn new(
        core_mods_url: Option<String>,
        mirror_url: Option<String>,
        prompter: ScriptedPrompter,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let client = reqwest::Client::new();
        let prompter = Arc::new(prompter);

        let registry = crate::registry::ModRegistry::open(
            dir.path().join("state"),
            runner.device(),
            TEST_PKG,
        )
        .await
        .unwrap();

        let urls = core_mods_url
            .map(|url| (TEST_PKG.to_string(), url))
            .into_iter()
            .collect();

        let ctx = crate::context::Context {
            lock: crate::lock::OperationLock::new(),
            app: Arc::new(tokio::sync::RwLock::new(None)),
            registry: Arc::new(tokio::sync::Mutex::new(registry)),
            core_mods: Arc::new(crate::coremods::CoreModManifest::new(
                client.clone(),
                urls,
                TEST_PKG,
            )),
            mirrors: Arc::new(crate::mirror::MirrorResolver::new(
                client.clone(),
                mirror_url,
                std::time::Duration::from_secs(300),
            )),
            device: runner.device(),
            client,
            prompter: prompter.clone(),
            scratch: dir.path().join("tmp"),
        };

        Self {
            dir,
            runner,
            prompter,
            ctx,
        }
    }

    pub(crate) async fn set_app(&self, version: &str, is_modded: bool) {
        *self.ctx.app.write().await = Some(crate::app::InstalledApp {
            package_id: TEST_PKG.to_string(),
            version: version.to_string(),
            is_modded,
            is_32bit: false,
            installer: None,
        });
    }

    /// Parse (and optionally install) a mod straight into the registry.
    pub(crate) async fn add_mod(&self, id: &str, version: &str, installed: bool) {
        let path = write_simple_mod(self.dir.path(), id, version);
        let mut registry = self.ctx.registry.lock().await;
        registry.parse_mod(&path).await.unwrap().unwrap();
        if installed {
            registry.install(id).await.unwrap();
        }
    }
}
