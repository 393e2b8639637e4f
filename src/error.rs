//! Unified error type hierarchy for KPM Manager
//!
//! Provides structured error handling with ExecError, BridgeError, ConfigError,
//! ValidationError, InstallFailure, UninstallFailure and the crate-level KpmError.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Privileged command execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("No command given to the privileged executor")]
    EmptyCommand,

    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Command '{command}' timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("IO error while running privileged command: {0}")]
    Io(String),
}

/// Errors raised while talking to the kernel module bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Executor failure: {0}")]
    Exec(#[from] ExecError),

    #[error("Daemon reported failure: {0}")]
    Daemon(String),

    #[error("Bridge call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Bridge worker failed: {0}")]
    Worker(String),
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Staged file validation errors. No bridge call is ever attempted after one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Not a kernel-patch module (expected .kpm): {0}")]
    WrongExtension(String),

    #[error("Cannot derive a module identifier from: {0}")]
    InvalidIdentifier(String),
}

/// Reasons an install attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallFailure {
    #[error("Bridge rejected the module: {0}")]
    BridgeRejected(String),

    #[error("Source file could not be read or copied: {0}")]
    SourceUnreadable(String),

    #[error("Transport failure during load: {0}")]
    Transport(String),

    #[error("Install abandoned before the module was loaded")]
    Abandoned,
}

/// Reasons an uninstall attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UninstallFailure {
    #[error("No loaded module with id '{0}'")]
    UnknownModule(String),

    #[error("Bridge rejected the unload: {0}")]
    BridgeRejected(String),

    #[error("Transport failure during unload: {0}")]
    Transport(String),
}

/// Embed-mode persistence failed but the load was still attempted.
///
/// Never returned as an error; carried on the install outcome and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceWarning {
    pub target: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for PersistenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "could not persist module copy to {}: {}",
            self.target.display(),
            self.reason
        )
    }
}

/// Short user-facing message categories. Detailed text goes to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    InstallSucceeded,
    InstallFailed,
    UninstallSucceeded,
    UninstallFailed,
    ValidationFailed,
    ControlSucceeded,
    ControlFailed,
    RefreshFailed,
}

impl MessageCategory {
    pub fn message(self) -> &'static str {
        match self {
            MessageCategory::InstallSucceeded => "Module installed",
            MessageCategory::InstallFailed => "Module install failed",
            MessageCategory::UninstallSucceeded => "Module uninstalled",
            MessageCategory::UninstallFailed => "Module uninstall failed",
            MessageCategory::ValidationFailed => "Invalid file type, a .kpm module is required",
            MessageCategory::ControlSucceeded => "Control command sent",
            MessageCategory::ControlFailed => "Control command failed",
            MessageCategory::RefreshFailed => "Could not query loaded modules",
        }
    }
}

/// Global error type for the module lifecycle manager.
///
/// Every lower-level failure (executor, bridge, IO) is converted into one of
/// these before it leaves the manager.
#[derive(Error, Debug)]
pub enum KpmError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Install failed: {0}")]
    InstallFailed(#[from] InstallFailure),

    #[error("Uninstall failed: {0}")]
    UninstallFailed(#[from] UninstallFailure),

    #[error("Control invocation failed: {0}")]
    ControlFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl KpmError {
    /// Category used to pick the short message shown to the user
    pub fn category(&self) -> MessageCategory {
        match self {
            KpmError::Validation(_) => MessageCategory::ValidationFailed,
            KpmError::InstallFailed(_) => MessageCategory::InstallFailed,
            KpmError::UninstallFailed(_) => MessageCategory::UninstallFailed,
            KpmError::ControlFailed(_) => MessageCategory::ControlFailed,
            KpmError::Transport(_) | KpmError::Config(_) => MessageCategory::RefreshFailed,
        }
    }

    /// Get a user-facing error message suitable for display
    pub fn user_message(&self) -> &'static str {
        self.category().message()
    }
}

impl From<BridgeError> for KpmError {
    fn from(e: BridgeError) -> Self {
        KpmError::Transport(e.to_string())
    }
}

impl From<ExecError> for KpmError {
    fn from(e: ExecError) -> Self {
        KpmError::Transport(e.to_string())
    }
}

/// Top-level result type for manager operations.
pub type Result<T> = std::result::Result<T, KpmError>;
