//! Bridge implementations.
//!
//! `CliModuleBridge` drives the root daemon's `kpm` sub-commands through a
//! `PrivilegedExecutor`. `BlockingBridge` adapts a synchronous native API
//! (string replies, `Error` prefix on failure) onto blocking worker threads.

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::ModuleBridge;
use crate::error::BridgeError;
use crate::models::{BridgeReply, ModuleDescriptor, ERROR_MARKER};
use crate::system::{ExecOutput, PrivilegedExecutor, DEFAULT_COMMAND_TIMEOUT};

/// Default root daemon binary.
pub const DEFAULT_DAEMON_BINARY: &str = "ksud";

/// Bridge backed by `<daemon> kpm <sub-command>` calls.
#[derive(Clone)]
pub struct CliModuleBridge {
    executor: Arc<dyn PrivilegedExecutor>,
    daemon_binary: String,
}

impl CliModuleBridge {
    pub fn new(executor: Arc<dyn PrivilegedExecutor>, daemon_binary: impl Into<String>) -> Self {
        CliModuleBridge {
            executor,
            daemon_binary: daemon_binary.into(),
        }
    }

    fn argv(&self, sub: &str, args: &[&str]) -> Vec<String> {
        let mut argv = vec![self.daemon_binary.clone(), "kpm".to_string(), sub.to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }
}

async fn run_kpm(
    executor: Arc<dyn PrivilegedExecutor>,
    argv: Vec<String>,
) -> Result<ExecOutput, BridgeError> {
    let sub = argv.get(2).cloned().unwrap_or_default();
    let output = executor.run(argv).await?;
    log::debug!("[CliModuleBridge] kpm {} -> exit {}", sub, output.exit_code);
    Ok(output)
}

/// Load/unload reply: a non-zero exit is a rejection even without the marker.
fn reply_from_output(output: &ExecOutput) -> BridgeReply {
    if output.success() {
        BridgeReply::from_raw(&output.stdout)
    } else {
        let diagnostic = output.diagnostic();
        if diagnostic.starts_with(ERROR_MARKER) {
            BridgeReply::Rejected(diagnostic)
        } else {
            BridgeReply::Rejected(format!(
                "{}: exit status {} {}",
                ERROR_MARKER, output.exit_code, diagnostic
            )
            .trim_end()
            .to_string())
        }
    }
}

/// Query reply: success yields trimmed stdout, anything else a daemon error.
fn query_text(output: &ExecOutput) -> Result<String, BridgeError> {
    if !output.success() {
        return Err(BridgeError::Daemon(format!(
            "exit status {}: {}",
            output.exit_code,
            output.diagnostic()
        )));
    }
    let text = output.stdout.trim();
    if text.starts_with(ERROR_MARKER) {
        return Err(BridgeError::Daemon(text.to_string()));
    }
    Ok(text.to_string())
}

/// Parses `key=value` lines from `kpm info`.
///
/// Unknown keys and lines without `=` are ignored. A missing `name` falls
/// back to the id.
pub fn parse_module_info(id: &str, text: &str) -> ModuleDescriptor {
    let mut descriptor = ModuleDescriptor {
        id: id.to_string(),
        ..Default::default()
    };

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "name" => descriptor.name = value,
            "version" => descriptor.version = value,
            "license" => descriptor.license = value,
            "author" => descriptor.author = value,
            "description" => descriptor.description = value,
            "args" => descriptor.args = value,
            "has_action" => {
                descriptor.has_action =
                    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
            }
            _ => {}
        }
    }

    if descriptor.name.is_empty() {
        descriptor.name = id.to_string();
    }
    descriptor
}

/// Module ids from `kpm list` output, one per non-blank line.
pub fn parse_module_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

async fn fetch_info(
    executor: Arc<dyn PrivilegedExecutor>,
    argv: Vec<String>,
    id: String,
) -> Result<ModuleDescriptor, BridgeError> {
    let output = run_kpm(executor, argv).await?;
    let text = query_text(&output)?;
    Ok(parse_module_info(&id, &text))
}

impl ModuleBridge for CliModuleBridge {
    fn load(&self, path: PathBuf) -> BoxFuture<'static, Result<BridgeReply, BridgeError>> {
        let executor = self.executor.clone();
        let path = path.to_string_lossy().to_string();
        let argv = self.argv("load", &[path.as_str()]);
        Box::pin(async move {
            let output = run_kpm(executor, argv).await?;
            Ok(reply_from_output(&output))
        })
    }

    fn unload(&self, id: String) -> BoxFuture<'static, Result<BridgeReply, BridgeError>> {
        let executor = self.executor.clone();
        let argv = self.argv("unload", &[id.as_str()]);
        Box::pin(async move {
            let output = run_kpm(executor, argv).await?;
            Ok(reply_from_output(&output))
        })
    }

    fn list_modules(&self) -> BoxFuture<'static, Result<Vec<ModuleDescriptor>, BridgeError>> {
        let bridge = self.clone();
        Box::pin(async move {
            let output = run_kpm(bridge.executor.clone(), bridge.argv("list", &[])).await?;
            let text = query_text(&output)?;

            let mut modules = Vec::new();
            for id in parse_module_list(&text) {
                let argv = bridge.argv("info", &[id.as_str()]);
                match fetch_info(bridge.executor.clone(), argv, id.clone()).await {
                    Ok(descriptor) => modules.push(descriptor),
                    Err(e) => {
                        log::warn!(
                            "[CliModuleBridge] [WARN] info for '{}' failed, listing id only: {}",
                            id,
                            e
                        );
                        modules.push(ModuleDescriptor::new(id));
                    }
                }
            }
            Ok(modules)
        })
    }

    fn module_info(&self, id: String) -> BoxFuture<'static, Result<ModuleDescriptor, BridgeError>> {
        let executor = self.executor.clone();
        let argv = self.argv("info", &[id.as_str()]);
        Box::pin(fetch_info(executor, argv, id))
    }

    fn control(&self, id: String, args: String) -> BoxFuture<'static, Result<i32, BridgeError>> {
        let executor = self.executor.clone();
        let argv = self.argv("control", &[id.as_str(), args.as_str()]);
        Box::pin(async move {
            let output = run_kpm(executor, argv).await?;
            if !output.success() {
                log::debug!(
                    "[CliModuleBridge] control '{}' returned {}: {}",
                    id,
                    output.exit_code,
                    output.diagnostic()
                );
            }
            Ok(output.exit_code)
        })
    }

    fn version(&self) -> BoxFuture<'static, Result<String, BridgeError>> {
        let executor = self.executor.clone();
        let argv = self.argv("version", &[]);
        Box::pin(async move {
            let output = run_kpm(executor, argv).await?;
            query_text(&output)
        })
    }
}

/// Synchronous native module interface.
///
/// Mirrors the in-process API exposed by the kernel patch runtime: load and
/// unload answer with a string that starts with `Error` on failure.
pub trait NativeModuleApi: Send + Sync {
    fn load(&self, path: &Path) -> String;
    fn unload(&self, id: &str) -> String;
    fn list_modules(&self) -> Result<Vec<ModuleDescriptor>, String>;
    fn module_info(&self, id: &str) -> Result<ModuleDescriptor, String>;
    fn control(&self, id: &str, args: &str) -> i32;
    fn version(&self) -> String;
}

/// Runs a `NativeModuleApi` on tokio's blocking pool.
///
/// Every call is bounded by `timeout`. A call that overruns is reported as
/// `BridgeError::TimedOut`; its worker thread is left to finish on its own.
pub struct BlockingBridge<T> {
    api: Arc<T>,
    timeout: Duration,
}

impl<T> BlockingBridge<T> {
    pub fn new(api: Arc<T>) -> Self {
        Self::with_timeout(api, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(api: Arc<T>, timeout: Duration) -> Self {
        BlockingBridge { api, timeout }
    }
}

impl<T> Clone for BlockingBridge<T> {
    fn clone(&self) -> Self {
        BlockingBridge {
            api: self.api.clone(),
            timeout: self.timeout,
        }
    }
}

async fn blocking<T, R, F>(api: Arc<T>, timeout: Duration, f: F) -> Result<R, BridgeError>
where
    T: NativeModuleApi + 'static,
    R: Send + 'static,
    F: FnOnce(&T) -> R + Send + 'static,
{
    let worker = tokio::task::spawn_blocking(move || f(api.as_ref()));
    match tokio::time::timeout(timeout, worker).await {
        Ok(joined) => joined.map_err(|e| BridgeError::Worker(e.to_string())),
        Err(_) => {
            log::warn!("[BlockingBridge] Native call exceeded {:?}", timeout);
            Err(BridgeError::TimedOut(timeout))
        }
    }
}

impl<T: NativeModuleApi + 'static> ModuleBridge for BlockingBridge<T> {
    fn load(&self, path: PathBuf) -> BoxFuture<'static, Result<BridgeReply, BridgeError>> {
        let (api, timeout) = (self.api.clone(), self.timeout);
        Box::pin(async move {
            let raw = blocking(api, timeout, move |api| api.load(&path)).await?;
            Ok(BridgeReply::from_raw(&raw))
        })
    }

    fn unload(&self, id: String) -> BoxFuture<'static, Result<BridgeReply, BridgeError>> {
        let (api, timeout) = (self.api.clone(), self.timeout);
        Box::pin(async move {
            let raw = blocking(api, timeout, move |api| api.unload(&id)).await?;
            Ok(BridgeReply::from_raw(&raw))
        })
    }

    fn list_modules(&self) -> BoxFuture<'static, Result<Vec<ModuleDescriptor>, BridgeError>> {
        let (api, timeout) = (self.api.clone(), self.timeout);
        Box::pin(async move {
            blocking(api, timeout, |api| api.list_modules())
                .await?
                .map_err(BridgeError::Daemon)
        })
    }

    fn module_info(&self, id: String) -> BoxFuture<'static, Result<ModuleDescriptor, BridgeError>> {
        let (api, timeout) = (self.api.clone(), self.timeout);
        Box::pin(async move {
            blocking(api, timeout, move |api| api.module_info(&id))
                .await?
                .map_err(BridgeError::Daemon)
        })
    }

    fn control(&self, id: String, args: String) -> BoxFuture<'static, Result<i32, BridgeError>> {
        let (api, timeout) = (self.api.clone(), self.timeout);
        Box::pin(async move { blocking(api, timeout, move |api| api.control(&id, &args)).await })
    }

    fn version(&self) -> BoxFuture<'static, Result<String, BridgeError>> {
        let (api, timeout) = (self.api.clone(), self.timeout);
        Box::pin(async move {
            let raw = blocking(api, timeout, |api| api.version()).await?;
            let raw = raw.trim().to_string();
            if raw.starts_with(ERROR_MARKER) {
                Err(BridgeError::Daemon(raw))
            } else {
                Ok(raw)
            }
        })
    }
}
