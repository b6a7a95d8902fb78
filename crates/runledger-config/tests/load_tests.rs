//! Loading configuration from files and the process environment.

use std::io::Write;

use runledger_config::{ServiceConfig, env};
use runledger_core::CoreError;
use serial_test::serial;
use tempfile::NamedTempFile;

const ALL_VARS: [&str; 6] = [
    env::PORT,
    env::LISTEN_ADDR,
    env::DATABASE,
    env::API_KEY,
    env::PRICING_URL,
    env::PRICING_API_KEY,
];

fn clear_env() {
    for var in ALL_VARS {
        unsafe { std::env::remove_var(var) };
    }
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_file_then_env() {
    clear_env();
    let file = write_config(
        r#"
listen_addr: 127.0.0.1:4000
database_path: /tmp/ledger.db
api_key: from-file
pricing:
  base_url: https://prices.example.com
"#,
    );
    unsafe { std::env::set_var(env::API_KEY, "from-env") };
    unsafe { std::env::set_var(env::PORT, "4100") };

    let config = ServiceConfig::load(Some(file.path())).unwrap();
    clear_env();

    assert_eq!(config.api_key, "from-env");
    assert_eq!(config.listen_addr.to_string(), "127.0.0.1:4100");
    assert_eq!(config.database_path.to_str(), Some("/tmp/ledger.db"));
    assert_eq!(config.pricing.base_url, "https://prices.example.com");
}

#[test]
#[serial]
fn test_explicit_missing_file_is_not_found() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");

    let err = ServiceConfig::load(Some(&missing)).unwrap_err();
    assert!(matches!(err, CoreError::ConfigNotFound { .. }));
    assert!(err.guidance().is_some());
}

#[test]
#[serial]
fn test_missing_api_key_fails_validation() {
    clear_env();
    let file = write_config("pricing:\n  timeout_secs: 3\n");

    let err = ServiceConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, CoreError::ConfigMissingField { .. }));
    assert!(err.to_string().contains("RUNS_SERVICE_API_KEY"));
}

#[test]
#[serial]
fn test_env_only_configuration() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("empty.yaml");
    std::fs::write(&file, "").unwrap();
    unsafe { std::env::set_var(env::API_KEY, "k") };
    unsafe { std::env::set_var(env::PRICING_URL, "http://localhost:7000") };
    unsafe { std::env::set_var(env::PRICING_API_KEY, "pk") };

    let config = ServiceConfig::load(Some(&file)).unwrap();
    clear_env();

    assert_eq!(config.pricing.base_url, "http://localhost:7000");
    assert_eq!(config.pricing.api_key.as_deref(), Some("pk"));
}
