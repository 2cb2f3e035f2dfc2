//! Tests for [`Config`]: TOML loading and validation.

use std::io::Write;
use std::time::Duration;

use huginn::{Config, Expiration, HuginnError};

#[test]
fn full_document_parses() {
    let config = Config::from_toml_str(
        r#"
        [cache]
        prefix_len = 5
        purge_interval_secs = 60
        expiry_secs = 120
        default_expiration_secs = 600
        cleanup_interval_secs = 30
        fetch_timeout_ms = 1500
        "#,
    )
    .unwrap();

    assert_eq!(config.prefix_len, 5);
    assert_eq!(config.purge_interval, Duration::from_secs(60));
    assert_eq!(config.expiration, Expiration::After(Duration::from_secs(120)));
    assert_eq!(config.default_expiration, Duration::from_secs(600));
    assert_eq!(config.cleanup_interval, Duration::from_secs(30));
    assert_eq!(config.fetch_timeout, Some(Duration::from_millis(1500)));
}

#[test]
fn expiry_sentinels() {
    let never = Config::from_toml_str("[cache]\nexpiry_secs = -1\n").unwrap();
    assert_eq!(never.expiration, Expiration::Never);

    let default = Config::from_toml_str("[cache]\nexpiry_secs = 0\n").unwrap();
    assert_eq!(default.expiration, Expiration::Default);
}

#[test]
fn zero_purge_interval_disables_sweep() {
    let config = Config::from_toml_str("[cache]\npurge_interval_secs = 0\n").unwrap();
    assert!(config.purge_interval.is_zero());
}

#[test]
fn unknown_field_is_rejected() {
    let result = Config::from_toml_str("[cache]\npurge_intervall_secs = 5\n");
    assert!(matches!(result, Err(HuginnError::Toml(_))));
}

#[test]
fn invalid_values_are_rejected() {
    let result = Config::from_toml_str("[cache]\ndefault_expiration_secs = 0\n");
    assert!(matches!(result, Err(HuginnError::Configuration(_))));
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[cache]\nprefix_len = 3\nexpiry_secs = -1").unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.prefix_len, 3);
    assert_eq!(config.expiration, Expiration::Never);
    assert_eq!(config.purge_interval, Config::default().purge_interval);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(HuginnError::Io(_))));
}
