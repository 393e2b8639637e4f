//! Integration tests for settings loading and persistence.

use kpm_manager::config::{loader, ManagerConfig, SettingsManager};
use kpm_manager::error::ConfigError;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config() -> ManagerConfig {
    ManagerConfig {
        module_dir: PathBuf::from("/data/adb/kpm"),
        staging_dir: PathBuf::from("/data/local/tmp/kpm-staging"),
        log_dir: PathBuf::from("/data/local/tmp/kpm-logs"),
        su_binary: "/system/bin/su".to_string(),
        daemon_binary: "ksud".to_string(),
        command_timeout_secs: 15,
        refresh_interval_secs: 10,
        log_level: "debug".to_string(),
    }
}

#[test]
fn test_settings_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("kpm-manager").join("settings.json");
    let config = create_test_config();

    SettingsManager::save_to(&config, &path).expect("save settings");
    let loaded = SettingsManager::load_from(&path).expect("load settings");

    assert_eq!(loaded, config);
    assert_eq!(loaded.command_timeout(), Duration::from_secs(15));
    assert_eq!(loaded.refresh_interval(), Duration::from_secs(10));
}

#[test]
fn test_missing_settings_yield_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let loaded = SettingsManager::load_from(&temp_dir.path().join("settings.json")).unwrap();
    assert_eq!(loaded, ManagerConfig::default());
}

#[test]
fn test_malformed_settings_yield_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");
    fs::write(&path, r#"{"module_dir": 42"#).unwrap();

    let loaded = SettingsManager::load_from(&path).unwrap();
    assert_eq!(loaded, ManagerConfig::default());
}

#[test]
fn test_wrong_extension_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = SettingsManager::load_from(&temp_dir.path().join("settings.toml"));
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
}

#[test]
fn test_invalid_settings_are_not_saved() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");
    let config = ManagerConfig {
        module_dir: PathBuf::from("relative/kpm"),
        ..create_test_config()
    };

    assert!(matches!(
        SettingsManager::save_to(&config, &path),
        Err(ConfigError::ValidationFailed(_))
    ));
    assert!(!path.exists());
}

#[test]
fn test_loader_keeps_unknown_fields_out() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{"su_binary": "/sbin/su", "theme": "dark", "refresh_interval_secs": 3}"#,
    )
    .unwrap();

    let loaded = loader::load_config_from_file(&path).unwrap();
    assert_eq!(loaded.su_binary, "/sbin/su");
    assert_eq!(loaded.refresh_interval_secs, 3);
    assert_eq!(loaded.daemon_binary, ManagerConfig::default().daemon_binary);

    let saved = serde_json::to_string(&loaded).unwrap();
    assert!(!saved.contains("theme"));
}

#[test]
fn test_parse_fallback_warning_is_handed_back() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.json");

    let (config, warning) = SettingsManager::load_from_with_warning(&path).unwrap();
    assert_eq!(config, ManagerConfig::default());
    assert!(warning.is_none());

    fs::write(&path, "{ broken").unwrap();
    let (config, warning) = SettingsManager::load_from_with_warning(&path).unwrap();
    assert_eq!(config, ManagerConfig::default());
    let warning = warning.expect("parse failure is reported");
    assert!(warning.contains("falling back to defaults"));
    assert!(warning.contains(&path.display().to_string()));
}
