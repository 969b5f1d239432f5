//! Unit tests for configuration resolution and graceful degradation
//!
//! Tests that manipulate environment variables are marked #[serial].

use mcq_common::config::{
    is_valid_key, load_toml_config, resolve_secret, write_toml_config, ConfigFileResolver,
    LoggingConfig,
};
use serde::{Deserialize, Serialize};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct SampleConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_logging_defaults() {
    let logging = LoggingConfig::default();
    assert_eq!(logging.level, "info");
    assert!(logging.file.is_none());
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let config: SampleConfig = load_toml_config(Some(&path)).unwrap();
    assert!(config.name.is_none());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_no_path_yields_defaults() {
    let config: SampleConfig = load_toml_config(None).unwrap();
    assert!(config.name.is_none());
}

#[test]
fn test_write_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let config = SampleConfig {
        name: Some("quiz".to_string()),
        logging: LoggingConfig {
            level: "debug".to_string(),
            file: None,
        },
    };
    write_toml_config(&config, &path).unwrap();

    let loaded: SampleConfig = load_toml_config(Some(&path)).unwrap();
    assert_eq!(loaded.name.as_deref(), Some("quiz"));
    assert_eq!(loaded, config);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "name = [unterminated").unwrap();
    let result: mcq_common::Result<SampleConfig> = load_toml_config(Some(&path));
    assert!(matches!(result, Err(mcq_common::Error::Config(_))));
}

#[test]
#[serial]
fn test_resolver_cli_beats_env() {
    env::set_var("MCQ_TEST_CONFIG", "/tmp/from-env.toml");
    let resolver = ConfigFileResolver::new("mcq-test", "MCQ_TEST_CONFIG");
    let cli = PathBuf::from("/tmp/from-cli.toml");
    assert_eq!(resolver.resolve(Some(&cli)), Some(cli.clone()));
    env::remove_var("MCQ_TEST_CONFIG");
}

#[test]
#[serial]
fn test_resolver_env_var() {
    env::set_var("MCQ_TEST_CONFIG", "/tmp/from-env.toml");
    let resolver = ConfigFileResolver::new("mcq-test", "MCQ_TEST_CONFIG");
    assert_eq!(resolver.resolve(None), Some(PathBuf::from("/tmp/from-env.toml")));
    env::remove_var("MCQ_TEST_CONFIG");
}

#[test]
#[serial]
fn test_resolve_secret_priority() {
    env::remove_var("MCQ_TEST_SECRET");
    assert_eq!(resolve_secret("MCQ_TEST_SECRET", Some("toml-key")).as_deref(), Some("toml-key"));
    assert_eq!(resolve_secret("MCQ_TEST_SECRET", Some("   ")), None);

    env::set_var("MCQ_TEST_SECRET", "env-key");
    assert_eq!(resolve_secret("MCQ_TEST_SECRET", Some("toml-key")).as_deref(), Some("env-key"));
    env::remove_var("MCQ_TEST_SECRET");
}

#[test]
fn test_is_valid_key() {
    assert!(is_valid_key("abc"));
    assert!(!is_valid_key(""));
    assert!(!is_valid_key(" \t"));
}
