//! Shared fakes for the integration tests.
//!
//! `FakeExecutor` runs `mkdir -p`, `cp`, `ls` and `rm` against the real
//! filesystem so persisted-copy assertions can inspect the temp directory.
//! `FakeNative` implements the native module API over an in-memory table.

#![allow(dead_code)]

use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kpm_manager::error::{BridgeError, ExecError};
use kpm_manager::kpm::ModuleBridge;
use kpm_manager::models::BridgeReply;
use kpm_manager::system::{ExecOutput, PrivilegedExecutor};
use kpm_manager::{
    extract_identifier, BlockingBridge, ModuleDescriptor, ModuleManager, NativeModuleApi,
    StagedInstall,
};
use tempfile::TempDir;
use tokio::sync::Notify;

fn output(exit_code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[derive(Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<Vec<String>>>,
    exit_overrides: Mutex<HashMap<String, i32>>,
    transport_failures: Mutex<HashSet<String>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeExecutor {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|argv| argv[0].clone()).collect()
    }

    /// Make `program` exit with `code` without touching the filesystem.
    pub fn fail_with_exit(&self, program: &str, code: i32) {
        self.exit_overrides
            .lock()
            .unwrap()
            .insert(program.to_string(), code);
    }

    /// Make `program` fail as if the privileged helper could not run it.
    pub fn fail_transport(&self, program: &str) {
        self.transport_failures
            .lock()
            .unwrap()
            .insert(program.to_string());
    }

    /// Park every `program` call until the returned `Notify` fires.
    pub fn hold(&self, program: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert(program.to_string(), notify.clone());
        notify
    }
}

fn run_locally(argv: &[String]) -> ExecOutput {
    let result = match argv.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["mkdir", "-p", dir] => fs::create_dir_all(dir),
        ["cp", from, to] => fs::copy(from, to).map(|_| ()),
        ["ls", path] => {
            if Path::new(path).exists() {
                Ok(())
            } else {
                return output(2, "No such file or directory");
            }
        }
        ["rm", path] => fs::remove_file(path),
        other => return output(127, &format!("unsupported command {:?}", other)),
    };
    match result {
        Ok(()) => output(0, ""),
        Err(e) => output(1, &e.to_string()),
    }
}

impl PrivilegedExecutor for FakeExecutor {
    fn run(&self, argv: Vec<String>) -> BoxFuture<'static, Result<ExecOutput, ExecError>> {
        self.calls.lock().unwrap().push(argv.clone());
        let program = argv.first().cloned().unwrap_or_default();
        let hold = self.holds.lock().unwrap().get(&program).cloned();
        let exit_override = self.exit_overrides.lock().unwrap().get(&program).copied();
        let transport_failure = self.transport_failures.lock().unwrap().contains(&program);

        Box::pin(async move {
            if let Some(hold) = hold {
                hold.notified().await;
            }
            if transport_failure {
                return Err(ExecError::Spawn {
                    program,
                    reason: "permission denied".to_string(),
                });
            }
            if let Some(code) = exit_override {
                return Ok(output(code, "simulated failure"));
            }
            Ok(run_locally(&argv))
        })
    }
}

/// In-memory kernel: loading a staged `<id>.kpm` registers `<id>`.
#[derive(Default)]
pub struct FakeNative {
    modules: Mutex<Vec<ModuleDescriptor>>,
    pub load_calls: AtomicUsize,
    pub unload_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub control_calls: Mutex<Vec<(String, String)>>,
    pub fail_list: AtomicBool,
    reject_loads: AtomicBool,
    reject_unloads: AtomicBool,
    control_status: Mutex<i32>,
    list_gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FakeNative {
    pub fn with_modules(ids: &[&str]) -> Self {
        let native = FakeNative::default();
        {
            let mut modules = native.modules.lock().unwrap();
            for id in ids {
                modules.push(ModuleDescriptor {
                    has_action: true,
                    ..ModuleDescriptor::new(*id)
                });
            }
        }
        native
    }

    pub fn reject_loads(&self) {
        self.reject_loads.store(true, Ordering::SeqCst);
    }

    pub fn reject_unloads(&self) {
        self.reject_unloads.store(true, Ordering::SeqCst);
    }

    /// Block every `list_modules` until the returned sender is dropped.
    pub fn hang_lists(&self) -> mpsc::Sender<()> {
        let (release, gate) = mpsc::channel();
        *self.list_gate.lock().unwrap() = Some(gate);
        release
    }

    pub fn set_control_status(&self, code: i32) {
        *self.control_status.lock().unwrap() = code;
    }

    pub fn remove_behind_our_back(&self, id: &str) {
        self.modules.lock().unwrap().retain(|m| m.id != id);
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        self.modules
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect()
    }
}

impl NativeModuleApi for FakeNative {
    fn load(&self, path: &Path) -> String {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return format!("Error: {} does not exist", path.display());
        }
        if self.reject_loads.load(Ordering::SeqCst) {
            return "Error: invalid module".to_string();
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some(id) = extract_identifier(&file_name) else {
            return "Error: not a module".to_string();
        };
        let mut modules = self.modules.lock().unwrap();
        if !modules.iter().any(|m| m.id == id) {
            modules.push(ModuleDescriptor::new(id));
        }
        "OK".to_string()
    }

    fn unload(&self, id: &str) -> String {
        self.unload_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_unloads.load(Ordering::SeqCst) {
            return "Error: module busy".to_string();
        }
        self.modules.lock().unwrap().retain(|m| m.id != id);
        "OK".to_string()
    }

    fn list_modules(&self) -> Result<Vec<ModuleDescriptor>, String> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.list_gate.lock().unwrap().as_ref() {
            let _ = gate.recv_timeout(Duration::from_secs(30));
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err("daemon unreachable".to_string());
        }
        Ok(self.modules.lock().unwrap().clone())
    }

    fn module_info(&self, id: &str) -> Result<ModuleDescriptor, String> {
        self.modules
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| format!("no module '{}'", id))
    }

    fn control(&self, id: &str, args: &str) -> i32 {
        self.control_calls
            .lock()
            .unwrap()
            .push((id.to_string(), args.to_string()));
        *self.control_status.lock().unwrap()
    }

    fn version(&self) -> String {
        "0.10.0".to_string()
    }
}

/// Answers queries from the native fake; load and unload fail in transport.
pub struct BrokenTransportBridge {
    queries: BlockingBridge<FakeNative>,
    pub load_calls: Arc<AtomicUsize>,
    pub unload_calls: Arc<AtomicUsize>,
}

impl BrokenTransportBridge {
    pub fn new(native: Arc<FakeNative>) -> Self {
        BrokenTransportBridge {
            queries: BlockingBridge::new(native),
            load_calls: Arc::new(AtomicUsize::new(0)),
            unload_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ModuleBridge for BrokenTransportBridge {
    fn load(&self, _path: PathBuf) -> BoxFuture<'static, Result<BridgeReply, BridgeError>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(BridgeError::Worker("native worker panicked".to_string())) })
    }

    fn unload(&self, _id: String) -> BoxFuture<'static, Result<BridgeReply, BridgeError>> {
        self.unload_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(BridgeError::Worker("native worker panicked".to_string())) })
    }

    fn list_modules(&self) -> BoxFuture<'static, Result<Vec<ModuleDescriptor>, BridgeError>> {
        self.queries.list_modules()
    }

    fn module_info(&self, id: String) -> BoxFuture<'static, Result<ModuleDescriptor, BridgeError>> {
        self.queries.module_info(id)
    }

    fn control(&self, id: String, args: String) -> BoxFuture<'static, Result<i32, BridgeError>> {
        self.queries.control(id, args)
    }

    fn version(&self) -> BoxFuture<'static, Result<String, BridgeError>> {
        self.queries.version()
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub staging_dir: PathBuf,
    pub module_dir: PathBuf,
    pub executor: Arc<FakeExecutor>,
    pub native: Arc<FakeNative>,
    pub manager: ModuleManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_native(FakeNative::default())
    }

    pub fn with_native(native: FakeNative) -> Self {
        Self::build(native, |native| Arc::new(BlockingBridge::new(native)))
    }

    /// Native bridge whose calls give up after `timeout`.
    pub fn with_bridge_timeout(native: FakeNative, timeout: Duration) -> Self {
        Self::build(native, move |native| {
            Arc::new(BlockingBridge::with_timeout(native, timeout))
        })
    }

    /// Bridge whose load and unload always fail in transport.
    pub fn with_broken_transport(native: FakeNative) -> (Self, Arc<BrokenTransportBridge>) {
        let mut broken = None;
        let h = Self::build(native, |native| {
            let bridge = Arc::new(BrokenTransportBridge::new(native));
            broken = Some(bridge.clone());
            bridge
        });
        (h, broken.expect("bridge built"))
    }

    fn build<F>(native: FakeNative, make_bridge: F) -> Self
    where
        F: FnOnce(Arc<FakeNative>) -> Arc<dyn ModuleBridge>,
    {
        let temp = TempDir::new().expect("temp dir");
        let staging_dir = temp.path().join("cache");
        let module_dir = temp.path().join("adb").join("kpm");
        fs::create_dir_all(&staging_dir).expect("staging dir");

        let executor = Arc::new(FakeExecutor::default());
        let native = Arc::new(native);
        let bridge = make_bridge(native.clone());
        let manager = ModuleManager::new(executor.clone(), bridge, module_dir.clone());

        Harness {
            temp,
            staging_dir,
            module_dir,
            executor,
            native,
            manager,
        }
    }

    /// Write `file_name` into the staging directory and adopt it.
    pub fn stage(&self, file_name: &str) -> (StagedInstall, PathBuf) {
        let path = self.staging_dir.join(file_name);
        fs::write(&path, b"\x7fELF kpm").expect("write staged file");
        let staged = StagedInstall::adopt(&path).expect("staged file passes the gate");
        (staged, path)
    }

    pub fn staging_is_empty(&self) -> bool {
        fs::read_dir(&self.staging_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    /// Place a persisted copy as if an earlier Embed install had run.
    pub fn persist(&self, id: &str) -> PathBuf {
        fs::create_dir_all(&self.module_dir).expect("module dir");
        let path = self.manager.persisted_path(id);
        fs::write(&path, b"persisted").expect("persisted copy");
        path
    }
}
