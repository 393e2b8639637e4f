//! Reading and writing the KPM manager's `settings.json`.
//!
//! The file lives at `$KPM_MANAGER_CONFIG` when set, otherwise under the
//! user config directory. It holds one `ManagerConfig` as pretty-printed
//! JSON; fields it omits take their defaults, unknown fields are ignored.

use super::ManagerConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the settings file location.
pub const CONFIG_PATH_ENV: &str = "KPM_MANAGER_CONFIG";

/// Get the global settings path: `$KPM_MANAGER_CONFIG`, else
/// `<config dir>/kpm-manager/settings.json`
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine config directory".to_string())
    })?;
    Ok(config_dir.join("kpm-manager").join("settings.json"))
}

/// Load config from JSON file.
pub fn load_config_from_file(path: &Path) -> Result<ManagerConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: ManagerConfig = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save config to JSON file, creating the parent directory.
pub fn save_config_to_file(config: &ManagerConfig, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(config)?;
    fs::write(path, json_content)?;
    Ok(())
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Configuration file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Configuration file must have .json extension".to_string(),
            ))
        }
    }

    Ok(())
}
