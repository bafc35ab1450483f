//! Tests for configuration file resolution and graceful degradation
//!
//! Uses serial_test: tests that touch MDAGG_TEST_CONFIG run sequentially.

use mdagg_common::config::{apply_env_override, env_override, load_toml_config, resolve_config_path};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
struct SampleConfig {
    port: u16,
    fanart_key: String,
}

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var("MDAGG_TEST_CONFIG", "/from/env.toml");

    let resolved = resolve_config_path(
        Some(Path::new("/from/cli.toml")),
        "MDAGG_TEST_CONFIG",
        "mdagg-test",
    );

    assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));
    env::remove_var("MDAGG_TEST_CONFIG");
}

#[test]
#[serial]
fn test_environment_used_without_cli_argument() {
    env::set_var("MDAGG_TEST_CONFIG", "/from/env.toml");

    let resolved = resolve_config_path(None, "MDAGG_TEST_CONFIG", "mdagg-test");

    assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
    env::remove_var("MDAGG_TEST_CONFIG");
}

#[test]
#[serial]
fn test_blank_environment_value_is_ignored() {
    env::set_var("MDAGG_TEST_CONFIG", "   ");
    assert_eq!(env_override("MDAGG_TEST_CONFIG"), None);
    env::remove_var("MDAGG_TEST_CONFIG");
}

#[test]
#[serial]
fn test_apply_env_override_replaces_value() {
    env::set_var("MDAGG_TEST_SECRET", "from-env");
    let mut secret = "from-file".to_string();

    apply_env_override(&mut secret, "MDAGG_TEST_SECRET");

    assert_eq!(secret, "from-env");
    env::remove_var("MDAGG_TEST_SECRET");
}

#[test]
fn test_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    let config: SampleConfig = load_toml_config(Some(&path)).unwrap();

    assert_eq!(config, SampleConfig::default());
}

#[test]
fn test_no_path_uses_defaults() {
    let config: SampleConfig = load_toml_config(None).unwrap();
    assert_eq!(config, SampleConfig::default());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "port = 5001\n").unwrap();

    let config: SampleConfig = load_toml_config(Some(&path)).unwrap();

    assert_eq!(config.port, 5001);
    assert_eq!(config.fanart_key, "");
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "port = [not toml").unwrap();

    let result: mdagg_common::Result<SampleConfig> = load_toml_config(Some(&path));

    assert!(matches!(result, Err(mdagg_common::Error::Config(_))));
}

#[tokio::test]
async fn test_init_database_creates_file_and_parent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("cache.db");

    let pool = mdagg_common::db::init_database(&db_path).await.unwrap();
    mdagg_common::db::create_cache_table(&pool, "artist").await.unwrap();

    assert!(db_path.exists());
}
