//! Configuration resolution against the real process environment
//!
//! Uses serial_test so tests that set CDP_* variables never race each other.

use cdp_common::config::{ConfigOverrides, EngineConfig};
use serial_test::serial;
use std::env;

fn clear_env() {
    for key in [
        "CDP_DATABASE_URL",
        "CDP_RESOLUTION_BATCH_SIZE",
        "CDP_WINDOW_INTERVAL_SECS",
        "CDP_LOG_LEVEL",
    ] {
        env::remove_var(key);
    }
}

fn empty_config_file() -> (tempfile::TempDir, ConfigOverrides) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.toml");
    std::fs::write(&path, "").unwrap();
    let overrides = ConfigOverrides {
        config_path: Some(path),
        ..Default::default()
    };
    (dir, overrides)
}

#[test]
#[serial]
fn test_environment_supplies_database_url() {
    clear_env();
    let (_dir, overrides) = empty_config_file();

    env::set_var("CDP_DATABASE_URL", "sqlite::memory:");
    env::set_var("CDP_WINDOW_INTERVAL_SECS", "30");

    let config = EngineConfig::load(&overrides).expect("config should load");
    assert_eq!(config.database.url.as_deref(), Some("sqlite::memory:"));
    assert_eq!(config.scheduler.window_interval_secs, 30);

    clear_env();
}

#[test]
#[serial]
fn test_missing_database_url_fails_startup() {
    clear_env();
    let (_dir, overrides) = empty_config_file();

    let result = EngineConfig::load(&overrides);
    assert!(matches!(result, Err(cdp_common::Error::Config(_))));
}

#[test]
#[serial]
fn test_invalid_numeric_environment_value_fails_startup() {
    clear_env();
    let (_dir, overrides) = empty_config_file();

    env::set_var("CDP_DATABASE_URL", "sqlite::memory:");
    env::set_var("CDP_RESOLUTION_BATCH_SIZE", "0");

    let result = EngineConfig::load(&overrides);
    assert!(result.is_err(), "zero batch size must be rejected");

    clear_env();
}

#[test]
#[serial]
fn test_missing_explicit_config_file_is_an_error() {
    clear_env();
    let overrides = ConfigOverrides {
        config_path: Some("/nonexistent/cdp-resolver.toml".into()),
        database_url: Some("sqlite::memory:".to_string()),
        log_level: None,
    };
    assert!(EngineConfig::load(&overrides).is_err());
}
