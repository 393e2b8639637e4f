//! Kernel-Patch Module Management
//!
//! Handles the lifecycle of kernel-patch modules (KPM):
//! - Identifier extraction and staging of user-selected module files
//! - Bridge to the root daemon (load, unload, list, control)
//! - The lifecycle manager owning the module cache
//! - Periodic cache refresh

pub mod bridge;
pub mod identifier;
pub mod manager;
pub mod poller;
pub mod staging;

use futures::future::BoxFuture;
use std::path::PathBuf;

use crate::error::BridgeError;
use crate::models::{BridgeReply, ModuleDescriptor};

pub use bridge::{BlockingBridge, CliModuleBridge, NativeModuleApi};
pub use identifier::{extract_identifier, validate_identifier};
pub use manager::{ManagerEvent, ModuleManager, PendingUninstall};
pub use poller::{spawn_refresh_loop, DEFAULT_REFRESH_INTERVAL};
pub use staging::StagedInstall;

/// Trait for kernel module operations against the running kernel
///
/// String replies from the daemon are translated into `BridgeReply` by the
/// implementation; callers never inspect raw `Error...` prefixes.
pub trait ModuleBridge: Send + Sync {
    fn load(&self, path: PathBuf) -> BoxFuture<'static, Result<BridgeReply, BridgeError>>;
    fn unload(&self, id: String) -> BoxFuture<'static, Result<BridgeReply, BridgeError>>;
    fn list_modules(&self) -> BoxFuture<'static, Result<Vec<ModuleDescriptor>, BridgeError>>;
    fn module_info(&self, id: String) -> BoxFuture<'static, Result<ModuleDescriptor, BridgeError>>;
    /// Returns the module's status code, `0` meaning success.
    fn control(&self, id: String, args: String) -> BoxFuture<'static, Result<i32, BridgeError>>;
    fn version(&self) -> BoxFuture<'static, Result<String, BridgeError>>;
}
