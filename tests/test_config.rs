//! Integration tests for configuration loading and validation through the
//! public crate API.

use linkadapt::config::LinkAdaptConfig;
use linkadapt::error::ConfigError;
use std::path::PathBuf;

/// The shipped defaults describe the reference operating point and must
/// always validate.
#[test]
fn defaults_validate() {
    let cfg = LinkAdaptConfig::default();
    cfg.validate().unwrap();
    assert_eq!(cfg.network_variant, 7);
    assert_eq!(cfg.model_dir, PathBuf::from("model_v1"));
}

/// A config written to disk must load back identically, including the
/// snapshot path layout derived from it.
#[test]
fn file_round_trip_preserves_snapshot_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested").join("config.json");

    let mut cfg = LinkAdaptConfig::default();
    cfg.model_dir = PathBuf::from("runs/v7");
    cfg.save_interval = 100;
    cfg.to_json(&path).unwrap();

    let loaded = LinkAdaptConfig::from_json(&path).unwrap();
    assert_eq!(loaded.snapshot_path(300), PathBuf::from("runs/v7/model.ckpt-300"));
    assert_eq!(loaded.save_interval, 100);
}

/// Loading a nonexistent file is a `FileRead` error, not a panic or a
/// silent fallback to defaults.
#[test]
fn missing_file_is_a_read_error() {
    let result = LinkAdaptConfig::from_json(std::path::Path::new("/nonexistent/config.json"));
    assert!(matches!(result, Err(ConfigError::FileRead { .. })));
}

/// A config file with out-of-domain values is rejected at load time.
#[test]
fn invalid_values_are_rejected_at_load() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.json");

    let mut cfg = LinkAdaptConfig::default();
    cfg.to_json(&path).unwrap();
    let text = std::fs::read_to_string(&path)
        .unwrap()
        .replace("\"network_variant\": 7", "\"network_variant\": 9");
    std::fs::write(&path, text).unwrap();

    assert!(LinkAdaptConfig::from_json(&path).is_err());
}
