//! Module lifecycle manager.
//!
//! Owns the descriptor cache and orchestrates install, uninstall, refresh and
//! control invocation against a `ModuleBridge` and a `PrivilegedExecutor`.
//!
//! # Cache discipline
//!
//! The cache is an immutable `ModuleSnapshot` behind a `RwLock` that is only
//! ever swapped wholesale. Refreshes serialize on an async writer gate that is
//! held across the bridge query, so two refreshes never interleave and readers
//! always see a complete list.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, oneshot, Mutex};

use super::identifier::{extract_identifier, validate_identifier};
use super::staging::StagedInstall;
use super::ModuleBridge;
use crate::error::{InstallFailure, KpmError, PersistenceWarning, Result, UninstallFailure, ValidationError};
use crate::log_parsed;
use crate::models::{
    persisted_module_path, BridgeReply, ControlStatus, InstallMode, InstallOutcome,
    ModuleDescriptor, ModuleSnapshot, UninstallOutcome,
};
use crate::system::PrivilegedExecutor;

/// Default directory holding persisted (embedded) modules.
pub const DEFAULT_MODULE_DIR: &str = "/data/adb/kpm";

/// Notifications emitted after manager operations complete.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    CacheRefreshed { module_count: usize },
    RefreshFailed(String),
    Installed(InstallOutcome),
    Uninstalled(UninstallOutcome),
    ControlInvoked { id: String, status: ControlStatus },
}

/// Confirmation token produced by `request_uninstall`.
///
/// Committing consumes it; dropping it declines the uninstall.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "an uninstall only happens when the token is committed"]
pub struct PendingUninstall {
    id: String,
    persisted_path: PathBuf,
    persisted_copy_exists: bool,
    check_failed: bool,
}

impl PendingUninstall {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn persisted_path(&self) -> &Path {
        &self.persisted_path
    }

    /// The existence check found a persisted copy to delete.
    pub fn persisted_copy_exists(&self) -> bool {
        self.persisted_copy_exists
    }

    /// The existence check itself failed; treated as "no persisted copy".
    pub fn check_failed(&self) -> bool {
        self.check_failed
    }
}

struct ManagerInner {
    executor: Arc<dyn PrivilegedExecutor>,
    bridge: Arc<dyn ModuleBridge>,
    module_dir: PathBuf,
    cache: RwLock<ModuleSnapshot>,
    write_gate: Mutex<()>,
    events: Option<mpsc::Sender<ManagerEvent>>,
}

/// Cheaply clonable handle to the shared manager state.
#[derive(Clone)]
pub struct ModuleManager {
    inner: Arc<ManagerInner>,
}

impl ModuleManager {
    pub fn new(
        executor: Arc<dyn PrivilegedExecutor>,
        bridge: Arc<dyn ModuleBridge>,
        module_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::build(executor, bridge, module_dir.into(), None)
    }

    /// Like `new`, additionally sending a `ManagerEvent` after each operation.
    ///
    /// Events are dropped when the channel is full.
    pub fn with_events(
        executor: Arc<dyn PrivilegedExecutor>,
        bridge: Arc<dyn ModuleBridge>,
        module_dir: impl Into<PathBuf>,
        events: mpsc::Sender<ManagerEvent>,
    ) -> Self {
        Self::build(executor, bridge, module_dir.into(), Some(events))
    }

    fn build(
        executor: Arc<dyn PrivilegedExecutor>,
        bridge: Arc<dyn ModuleBridge>,
        module_dir: PathBuf,
        events: Option<mpsc::Sender<ManagerEvent>>,
    ) -> Self {
        ModuleManager {
            inner: Arc::new(ManagerInner {
                executor,
                bridge,
                module_dir,
                cache: RwLock::new(ModuleSnapshot::default()),
                write_gate: Mutex::new(()),
                events,
            }),
        }
    }

    /// Where the persisted copy of `id` lives.
    pub fn persisted_path(&self, id: &str) -> PathBuf {
        persisted_module_path(&self.inner.module_dir, id)
    }

    /// Current cache contents.
    pub fn snapshot(&self) -> ModuleSnapshot {
        self.inner
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(events) = &self.inner.events {
            if let Err(e) = events.try_send(event) {
                log::debug!("[ModuleManager] Event not delivered: {}", e);
            }
        }
    }

    /// Re-query the bridge and replace the cache.
    ///
    /// On failure the previous cache stays in place.
    pub async fn refresh(&self) -> Result<ModuleSnapshot> {
        let _gate = self.inner.write_gate.lock().await;

        match self.inner.bridge.list_modules().await {
            Ok(modules) => {
                let snapshot = ModuleSnapshot::from_modules(modules);
                *self
                    .inner
                    .cache
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot.clone();
                log::debug!("[ModuleManager] Cache refreshed: {} modules", snapshot.len());
                self.emit(ManagerEvent::CacheRefreshed {
                    module_count: snapshot.len(),
                });
                Ok(snapshot)
            }
            Err(e) => {
                log::warn!("[ModuleManager] [REFRESH] Module query failed: {}", e);
                self.emit(ManagerEvent::RefreshFailed(e.to_string()));
                Err(KpmError::Transport(e.to_string()))
            }
        }
    }

    /// Refresh after an action; failures are logged only.
    async fn refresh_after(&self, action: &str) {
        if let Err(e) = self.refresh().await {
            log::warn!(
                "[ModuleManager] [REFRESH] Refresh after {} failed, keeping previous cache: {}",
                action,
                e
            );
        }
    }

    /// Install a staged module.
    ///
    /// The staged file is removed before this returns. Dropping the returned
    /// future before the bridge load is issued abandons the install; once the
    /// load is issued it runs to completion in the background.
    pub async fn install(&self, staged: StagedInstall, mode: InstallMode) -> Result<InstallOutcome> {
        let (abandon_guard, abandon_rx) = oneshot::channel::<()>();
        let manager = self.clone();
        let worker =
            tokio::spawn(async move { manager.install_staged(staged, mode, abandon_rx).await });

        let joined = worker.await;
        drop(abandon_guard);
        match joined {
            Ok(result) => result,
            Err(e) => {
                log::warn!("[ModuleManager] [INSTALL] Install worker failed: {}", e);
                Err(InstallFailure::Transport(format!("install worker failed: {}", e)).into())
            }
        }
    }

    async fn install_staged(
        &self,
        staged: StagedInstall,
        mode: InstallMode,
        mut abandon_rx: oneshot::Receiver<()>,
    ) -> Result<InstallOutcome> {
        let file_name = staged.file_name();
        let id = extract_identifier(&file_name).ok_or_else(|| {
            log::warn!("[ModuleManager] [INSTALL] No module identifier in '{}'", file_name);
            ValidationError::InvalidIdentifier(file_name.clone())
        })?;
        validate_identifier(&id)?;

        log::info!(
            "[ModuleManager] [INSTALL] Installing '{}' from {} ({})",
            id,
            staged.path().display(),
            mode
        );

        let persistence_warning = match mode {
            InstallMode::Embed => self.persist_copy(staged.path(), &id).await,
            InstallMode::Load => None,
        };

        if matches!(
            abandon_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ) {
            log::info!("[ModuleManager] [INSTALL] Install of '{}' abandoned before load", id);
            return Err(InstallFailure::Abandoned.into());
        }

        let reply = self.inner.bridge.load(staged.path().to_path_buf()).await;
        staged.discard();

        let bridge_message = match reply {
            Ok(BridgeReply::Accepted(message)) => message,
            Ok(BridgeReply::Rejected(message)) => {
                log::warn!("[ModuleManager] [INSTALL] Bridge rejected '{}': {}", id, message);
                return Err(InstallFailure::BridgeRejected(message).into());
            }
            Err(e) => {
                log::warn!("[ModuleManager] [INSTALL] Load of '{}' failed: {}", id, e);
                return Err(InstallFailure::Transport(e.to_string()).into());
            }
        };

        log_parsed!("KPM INSTALL: loaded {} ({})", id, mode);
        self.refresh_after("install").await;

        let outcome = InstallOutcome {
            id,
            mode,
            bridge_message,
            persistence_warning,
        };
        self.emit(ManagerEvent::Installed(outcome.clone()));
        Ok(outcome)
    }

    /// `mkdir -p` the module directory and copy the staged file into it.
    async fn persist_copy(&self, staged_path: &Path, id: &str) -> Option<PersistenceWarning> {
        let target = self.persisted_path(id);
        let module_dir = self.inner.module_dir.to_string_lossy().to_string();

        let steps = [
            vec!["mkdir".to_string(), "-p".to_string(), module_dir],
            vec![
                "cp".to_string(),
                staged_path.to_string_lossy().to_string(),
                target.to_string_lossy().to_string(),
            ],
        ];

        for argv in steps {
            let program = argv[0].clone();
            let reason = match self.inner.executor.run(argv).await {
                Ok(output) if output.success() => continue,
                Ok(output) => format!(
                    "{} exited with status {} {}",
                    program,
                    output.exit_code,
                    output.diagnostic()
                )
                .trim_end()
                .to_string(),
                Err(e) => format!("{} failed: {}", program, e),
            };

            let warning = PersistenceWarning { target, reason };
            log::warn!("[ModuleManager] [PERSIST] {}, loading anyway", warning);
            return Some(warning);
        }

        log::debug!("[ModuleManager] Persisted '{}' to {}", id, target.display());
        None
    }

    /// First uninstall phase: verify the id and check for a persisted copy.
    ///
    /// Mutates nothing.
    pub async fn request_uninstall(&self, id: &str) -> Result<PendingUninstall> {
        if !self.snapshot().contains(id) {
            log::warn!("[ModuleManager] [UNINSTALL] '{}' is not loaded", id);
            return Err(UninstallFailure::UnknownModule(id.to_string()).into());
        }

        let persisted_path = self.persisted_path(id);
        let argv = vec!["ls".to_string(), persisted_path.to_string_lossy().to_string()];
        let (persisted_copy_exists, check_failed) = match self.inner.executor.run(argv).await {
            Ok(output) => (output.success(), false),
            Err(e) => {
                log::warn!(
                    "[ModuleManager] [UNINSTALL] Could not check {}: {}, assuming no persisted copy",
                    persisted_path.display(),
                    e
                );
                (false, true)
            }
        };

        Ok(PendingUninstall {
            id: id.to_string(),
            persisted_path,
            persisted_copy_exists,
            check_failed,
        })
    }

    /// Second uninstall phase: unload, delete the persisted copy, refresh.
    ///
    /// The persisted copy is never touched when the unload fails. A failed
    /// deletion is reported on the outcome; the module still counts as unloaded.
    pub async fn commit_uninstall(&self, token: PendingUninstall) -> Result<UninstallOutcome> {
        let PendingUninstall {
            id,
            persisted_path,
            persisted_copy_exists,
            ..
        } = token;

        match self.inner.bridge.unload(id.clone()).await {
            Ok(BridgeReply::Accepted(_)) => {}
            Ok(BridgeReply::Rejected(message)) => {
                log::warn!("[ModuleManager] [UNINSTALL] Bridge rejected unload of '{}': {}", id, message);
                return Err(UninstallFailure::BridgeRejected(message).into());
            }
            Err(e) => {
                log::warn!("[ModuleManager] [UNINSTALL] Unload of '{}' failed: {}", id, e);
                return Err(UninstallFailure::Transport(e.to_string()).into());
            }
        }

        let mut removed_persisted_copy = false;
        let mut deletion_error = None;
        if persisted_copy_exists {
            let argv = vec!["rm".to_string(), persisted_path.to_string_lossy().to_string()];
            match self.inner.executor.run(argv).await {
                Ok(output) if output.success() => removed_persisted_copy = true,
                Ok(output) => {
                    deletion_error = Some(format!(
                        "rm exited with status {}: {}",
                        output.exit_code,
                        output.diagnostic()
                    ))
                }
                Err(e) => deletion_error = Some(e.to_string()),
            }
        }

        if let Some(reason) = &deletion_error {
            log::warn!(
                "[ModuleManager] [UNINSTALL] '{}' unloaded but {} was not deleted: {}",
                id,
                persisted_path.display(),
                reason
            );
        }

        log_parsed!("KPM UNINSTALL: unloaded {}", id);
        self.refresh_after("uninstall").await;

        let outcome = UninstallOutcome {
            id,
            removed_persisted_copy,
            deletion_error,
        };
        self.emit(ManagerEvent::Uninstalled(outcome.clone()));
        Ok(outcome)
    }

    /// Decline a pending uninstall.
    pub fn cancel_uninstall(&self, token: PendingUninstall) {
        log::debug!("[ModuleManager] Uninstall of '{}' declined", token.id);
    }

    /// Both uninstall phases with a confirmation step in between.
    ///
    /// Returns `Ok(None)` when `confirm` declines.
    pub async fn uninstall<F, Fut>(&self, id: &str, confirm: F) -> Result<Option<UninstallOutcome>>
    where
        F: FnOnce(&PendingUninstall) -> Fut,
        Fut: Future<Output = bool>,
    {
        let token = self.request_uninstall(id).await?;
        if confirm(&token).await {
            self.commit_uninstall(token).await.map(Some)
        } else {
            self.cancel_uninstall(token);
            Ok(None)
        }
    }

    /// Send `args` to a module's control entry point.
    ///
    /// The cache is refreshed afterwards whatever the status. No retries.
    pub async fn invoke_control(&self, id: &str, args: &str) -> Result<ControlStatus> {
        let result = self
            .inner
            .bridge
            .control(id.to_string(), args.to_string())
            .await;
        self.refresh_after("control").await;

        match result {
            Ok(code) => {
                let status = ControlStatus(code);
                if status.is_success() {
                    log_parsed!("KPM CONTROL: {} accepted '{}'", id, args);
                } else {
                    log::warn!("[ModuleManager] [CONTROL] '{}' returned status {}", id, code);
                }
                self.emit(ManagerEvent::ControlInvoked {
                    id: id.to_string(),
                    status,
                });
                Ok(status)
            }
            Err(e) => {
                log::warn!("[ModuleManager] [CONTROL] Control of '{}' failed: {}", id, e);
                Err(KpmError::ControlFailed(e.to_string()))
            }
        }
    }

    /// Query one module's descriptor without touching the cache.
    pub async fn module_info(&self, id: &str) -> Result<ModuleDescriptor> {
        self.inner
            .bridge
            .module_info(id.to_string())
            .await
            .map_err(|e| {
                log::warn!("[ModuleManager] Info query for '{}' failed: {}", id, e);
                KpmError::from(e)
            })
    }

    pub async fn kpm_version(&self) -> Result<String> {
        let version = self.inner.bridge.version().await?;
        if version.is_empty() {
            return Err(KpmError::Transport("daemon reported an empty KPM version".to_string()));
        }
        Ok(version)
    }

    /// Whether the running kernel exposes KPM support.
    pub async fn is_supported(&self) -> bool {
        match self.kpm_version().await {
            Ok(version) => {
                log::debug!("[ModuleManager] KPM version {}", version);
                true
            }
            Err(e) => {
                log::info!("[ModuleManager] KPM not supported: {}", e);
                false
            }
        }
    }
}
