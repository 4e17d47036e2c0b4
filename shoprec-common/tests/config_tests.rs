//! Integration tests for configuration loading and graceful degradation
//!
//! Tests that touch XDG_CONFIG_HOME are marked #[serial] so environment
//! changes do not race between test threads.

use serial_test::serial;
use shoprec_common::config::EngineConfig;
use shoprec_common::Error;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("write config");
    path
}

#[test]
fn test_explicit_path_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "engine.toml",
        r#"
        catalog_path = "/srv/catalog.toml"

        [server]
        port = 6000

        [session]
        capacity = 25
        "#,
    );

    let config = EngineConfig::load(Some(&path)).unwrap();
    assert_eq!(config.server.port, 6000);
    assert_eq!(config.session.capacity, 25);
    assert_eq!(config.catalog_path, Some(PathBuf::from("/srv/catalog.toml")));
    // Untouched sections keep compiled defaults
    assert_eq!(config.cache.personalized_ttl_secs, 1800);
}

#[test]
fn test_explicit_missing_path_is_config_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = EngineConfig::load(Some(&missing)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "broken.toml", "[server\nport = ");

    let err = EngineConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "zero.toml",
        r#"
        [trending]
        decay_interval_secs = 0
        "#,
    );

    let err = EngineConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("decay_interval_secs"));
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_user_config_dir_is_discovered() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("shoprec")).unwrap();
    fs::write(
        dir.path().join("shoprec").join("config.toml"),
        "[ensemble]\nrealtime_count = 4\n",
    )
    .unwrap();

    env::set_var("XDG_CONFIG_HOME", dir.path());
    let config = EngineConfig::load(None).unwrap();
    env::remove_var("XDG_CONFIG_HOME");

    assert_eq!(config.ensemble.realtime_count, 4);
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_missing_config_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();

    env::set_var("XDG_CONFIG_HOME", dir.path());
    let config = EngineConfig::load(None).unwrap();
    env::remove_var("XDG_CONFIG_HOME");

    if !PathBuf::from("/etc/shoprec/config.toml").exists() {
        assert_eq!(config, EngineConfig::default());
    }
}
