//! KPM Manager
//!
//! Lifecycle manager for kernel-patch modules (KPM): installs, tracks,
//! invokes and removes modules through a privileged root daemon.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Module descriptors, snapshots, install modes and outcomes
//! - **system**: Privileged command execution and logging macros
//! - **kpm**: Identifier extraction, staging, bridge, manager and poller
//! - **config**: Settings loading and persistence
//! - **log_collector**: Decoupled on-disk logging pipeline

// Core foundational modules
pub mod error;
pub mod models;

// Privileged execution (su wrapper, logging macros)
pub mod system;

// Module lifecycle
pub mod kpm;

// Settings management
pub mod config;

// Robust, decoupled logging system
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    BridgeError, ConfigError, ExecError, InstallFailure, KpmError, MessageCategory,
    PersistenceWarning, Result, UninstallFailure, ValidationError,
};

pub use models::{
    BridgeReply, ControlStatus, InstallMode, InstallOutcome, ModuleDescriptor, ModuleSnapshot,
    UninstallOutcome,
};

pub use system::{ExecOutput, PrivilegedExecutor, SuExecutor};

pub use kpm::{
    extract_identifier, spawn_refresh_loop, BlockingBridge, CliModuleBridge, ManagerEvent,
    ModuleBridge, ModuleManager, NativeModuleApi, PendingUninstall, StagedInstall,
};

pub use config::{ManagerConfig, SettingsManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
