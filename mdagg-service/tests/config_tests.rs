//! Service configuration loading
//!
//! Uses serial_test: tests that touch MDAGG_* secrets run sequentially.

use mdagg_service::config::{RateLimitBackend, ServiceConfig};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("mdagg.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_load_reads_file_and_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [server]
        port = 9100

        [ttl]
        artist = 120

        [rate_limit]
        backend = "memory"
        queue_size = 5
        "#,
    );

    let config = ServiceConfig::load(Some(&path)).unwrap();

    assert_eq!(config.server.port, 9100);
    assert_eq!(config.ttl.artist().num_seconds(), 120);
    assert_eq!(config.rate_limit.backend, RateLimitBackend::Memory);
    assert_eq!(config.rate_limit.queue_size, 5);
    assert_eq!(config.edge_cache.batch_size, 500);
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();

    let config = ServiceConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();

    assert_eq!(config.server.port, ServiceConfig::default().server.port);
}

#[test]
#[serial]
fn test_secrets_overridden_from_environment() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [providers]
        fanart_key = "from-file"
        theaudiodb_key = "file-audiodb"
        "#,
    );
    env::set_var("MDAGG_FANART_KEY", "from-env");
    env::set_var("MDAGG_THEAUDIODB_KEY", "   ");

    let config = ServiceConfig::load(Some(&path)).unwrap();

    assert_eq!(config.providers.fanart_key, "from-env");
    // Blank values are ignored
    assert_eq!(config.providers.theaudiodb_key, "file-audiodb");

    env::remove_var("MDAGG_FANART_KEY");
    env::remove_var("MDAGG_THEAUDIODB_KEY");
}

#[test]
#[serial]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [crawler]
        artist_batch_size = 0
        "#,
    );

    assert!(ServiceConfig::load(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_malformed_toml_is_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[server\nport = ");

    assert!(ServiceConfig::load(Some(&path)).is_err());
}
