//! Core data types for KPM Manager.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::PersistenceWarning;

/// Prefix the root daemon uses to signal a failed operation.
pub const ERROR_MARKER: &str = "Error";

/// File extension of kernel-patch modules.
pub const MODULE_EXTENSION: &str = ".kpm";

/// One loaded kernel-patch module as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleDescriptor {
    /// Kernel-scoped identity, derived from the module file name.
    pub id: String,
    pub name: String,
    pub version: String,
    pub license: String,
    pub author: String,
    pub description: String,
    /// Last-known or default control arguments.
    pub args: String,
    /// Whether the module accepts runtime control invocation.
    pub has_action: bool,
}

impl ModuleDescriptor {
    /// Descriptor carrying only an id (name falls back to the id).
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        ModuleDescriptor {
            name: id.clone(),
            id,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.version)
        }
    }

    fn matches(&self, needle: &str) -> bool {
        [&self.id, &self.name, &self.author, &self.description]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Immutable view of the module cache.
///
/// Cloning is cheap; readers holding a snapshot never observe later writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSnapshot {
    modules: Arc<[ModuleDescriptor]>,
}

impl ModuleSnapshot {
    /// Builds a snapshot, keeping the first descriptor for any repeated id.
    pub fn from_modules(modules: Vec<ModuleDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(modules.len());
        for module in modules {
            if seen.insert(module.id.clone()) {
                unique.push(module);
            } else {
                log::warn!(
                    "[ModuleSnapshot] Duplicate module id '{}' reported by bridge, keeping first entry",
                    module.id
                );
            }
        }
        ModuleSnapshot {
            modules: unique.into(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }

    /// Case-insensitive substring search over id, name, author and description.
    ///
    /// A blank query returns every module.
    pub fn search(&self, query: &str) -> Vec<ModuleDescriptor> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.modules.to_vec();
        }
        self.modules
            .iter()
            .filter(|m| m.matches(&needle))
            .cloned()
            .collect()
    }
}

/// How a staged module is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Load into the running kernel only.
    Load,
    /// Persist a copy under the module directory, then load.
    Embed,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMode::Load => "load",
            InstallMode::Embed => "embed",
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "load" => Ok(InstallMode::Load),
            "embed" => Ok(InstallMode::Embed),
            other => Err(format!(
                "Unknown install mode '{}', expected 'load' or 'embed'",
                other
            )),
        }
    }
}

/// Structured result of a bridge load/unload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeReply {
    /// Operation succeeded; may carry diagnostic text.
    Accepted(String),
    /// Operation refused by the daemon.
    Rejected(String),
}

impl BridgeReply {
    /// Translates a raw daemon reply: an `Error` prefix means failure.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with(ERROR_MARKER) {
            BridgeReply::Rejected(trimmed.to_string())
        } else {
            BridgeReply::Accepted(trimmed.to_string())
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, BridgeReply::Accepted(_))
    }

    pub fn message(&self) -> &str {
        match self {
            BridgeReply::Accepted(msg) | BridgeReply::Rejected(msg) => msg,
        }
    }
}

/// Status code returned by a control invocation. `0` means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStatus(pub i32);

impl ControlStatus {
    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

/// Successful install result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub id: String,
    pub mode: InstallMode,
    /// Diagnostic text returned by the bridge on load.
    pub bridge_message: String,
    /// Set when Embed persistence failed; the load still went ahead.
    pub persistence_warning: Option<PersistenceWarning>,
}

/// Successful uninstall result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallOutcome {
    pub id: String,
    /// The persisted copy existed and was removed.
    pub removed_persisted_copy: bool,
    /// Deletion of the persisted copy was attempted and failed.
    /// The module is still considered unloaded.
    pub deletion_error: Option<String>,
}

/// Path of the persisted module copy for `id` under `module_dir`.
pub fn persisted_module_path(module_dir: &std::path::Path, id: &str) -> PathBuf {
    module_dir.join(format!("{}{}", id, MODULE_EXTENSION))
}
