//! E2E tests for persistent tester configuration
//!
//! Tests config round-trip, defaults and backward compatibility with
//! partial files.

use std::fs;
use taptone::{AnalyserConfig, TesterConfig};

#[test]
fn test_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("taptone.json");

    let config = TesterConfig {
        sample_rate: 44100,
        output_latency_ms: 400,
        recording_enabled: false,
        analyser: AnalyserConfig {
            edge_threshold: 0.02,
            ..Default::default()
        },
        ..Default::default()
    };
    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = TesterConfig::load(&path);
    assert_eq!(loaded, config);
    assert_eq!(loaded.analysis_window_ms(), 200 + 400 + 250);
    assert_eq!(loaded.settle_delay_frames(), 17640);
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = TesterConfig::load(&dir.path().join("absent.json"));
    assert_eq!(loaded, TesterConfig::default());
}

#[test]
fn test_corrupt_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taptone.json");
    fs::write(&path, "{ not json").unwrap();
    assert_eq!(TesterConfig::load(&path), TesterConfig::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taptone.json");
    fs::write(&path, r#"{"margin_ms": 100, "analyser": {"high_pass_alpha": 0.9}}"#).unwrap();

    let loaded = TesterConfig::load(&path);
    assert_eq!(loaded.margin_ms, 100);
    assert_eq!(loaded.sample_rate, 48000);
    assert_eq!(loaded.analyser.high_pass_alpha, 0.9);
    assert_eq!(loaded.analyser.refractory_ms, 20.0);
    assert_eq!(loaded.analysis_window_frames(), 43200);
}

#[test]
fn test_saved_file_is_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taptone.json");
    TesterConfig::default().save(&path).unwrap();

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["sample_rate"], 48000);
    assert_eq!(value["analyser"]["refractory_ms"], 20.0);
}
