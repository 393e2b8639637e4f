//! Configuration for the KPM manager.
//!
//! `ManagerConfig` holds every tunable the manager and CLI read at startup:
//! where modules persist, where files are staged, which privileged binaries
//! to call and how long to wait for them.
//!
//! # Settings Management
//!
//! The `SettingsManager` loads and persists `ManagerConfig`:
//! - Reads `settings.json` from the global settings path (see `loader`)
//! - Falls back to defaults when the file is missing or unparseable
//! - `load_with_warning()` hands the fallback reason back to the caller, for
//!   startup code that reads settings before a logger exists

pub mod loader;

use crate::error::ConfigError;
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings, persisted as JSON.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory holding persisted module copies.
    pub module_dir: PathBuf,
    /// Application-private directory for staged files.
    pub staging_dir: PathBuf,
    pub log_dir: PathBuf,
    pub su_binary: String,
    pub daemon_binary: String,
    /// Upper bound on each privileged command.
    pub command_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kpm-manager");

        ManagerConfig {
            module_dir: PathBuf::from(crate::kpm::manager::DEFAULT_MODULE_DIR),
            staging_dir: std::env::temp_dir().join("kpm-manager").join("staging"),
            log_dir: data_dir.join("logs"),
            su_binary: "su".to_string(),
            daemon_binary: crate::kpm::bridge::DEFAULT_DAEMON_BINARY.to_string(),
            command_timeout_secs: crate::system::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            refresh_interval_secs: crate::kpm::DEFAULT_REFRESH_INTERVAL.as_secs(),
            log_level: "info".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Parsed `log_level`; unknown values fall back to `Info`.
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }

    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.module_dir.is_absolute() {
            return Err(ConfigError::ValidationFailed(format!(
                "module_dir must be an absolute path, got '{}'",
                self.module_dir.display()
            )));
        }
        if self.staging_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "staging_dir cannot be empty".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "command_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        for (field, value) in [
            ("su_binary", &self.su_binary),
            ("daemon_binary", &self.daemon_binary),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Loads and persists `ManagerConfig`.
pub struct SettingsManager;

impl SettingsManager {
    /// Load settings from the global settings path, or defaults if absent.
    pub fn load() -> Result<ManagerConfig, ConfigError> {
        let path = loader::get_global_settings_path()?;
        Self::load_from(&path)
    }

    /// Like `load`, returning the parse-fallback warning instead of logging it.
    pub fn load_with_warning() -> Result<(ManagerConfig, Option<String>), ConfigError> {
        let path = loader::get_global_settings_path()?;
        Self::load_from_with_warning(&path)
    }

    /// Load settings from `path`.
    ///
    /// A missing file yields defaults. A file that fails to parse logs a
    /// warning and yields defaults. Other IO errors are returned.
    pub fn load_from(path: &Path) -> Result<ManagerConfig, ConfigError> {
        let (config, warning) = Self::load_from_with_warning(path)?;
        if let Some(warning) = warning {
            log::warn!("{}", warning);
        }
        Ok(config)
    }

    pub fn load_from_with_warning(
        path: &Path,
    ) -> Result<(ManagerConfig, Option<String>), ConfigError> {
        match loader::load_config_from_file(path) {
            Ok(config) => Ok((config, None)),
            Err(ConfigError::FileNotFound(_)) => {
                log::debug!("[Config] No settings at {}, using defaults", path.display());
                Ok((ManagerConfig::default(), None))
            }
            Err(ConfigError::InvalidJson(e)) => {
                let warning = format!(
                    "[Config] [WARNING] Failed to parse {}, falling back to defaults: {}",
                    path.display(),
                    e
                );
                Ok((ManagerConfig::default(), Some(warning)))
            }
            Err(e) => Err(e),
        }
    }

    /// Save settings to the global settings path.
    pub fn save(config: &ManagerConfig) -> Result<(), ConfigError> {
        let path = loader::get_global_settings_path()?;
        Self::save_to(config, &path)
    }

    pub fn save_to(config: &ManagerConfig, path: &Path) -> Result<(), ConfigError> {
        config.validate()?;
        loader::save_config_to_file(config, path)
    }
}
