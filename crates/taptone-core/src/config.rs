//! Tester configuration
//!
//! Capture, timing and detector parameters, stored as JSON. Every field
//! has a default so partial files (or none at all) still load.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_capture_seconds() -> f64 {
    2.0
}

fn default_touch_latency_ms() -> u32 {
    crate::TOUCH_LATENCY_BOUND_MS
}

fn default_output_latency_ms() -> u32 {
    crate::OUTPUT_LATENCY_BOUND_MS
}

fn default_margin_ms() -> u32 {
    crate::ANALYSIS_MARGIN_MS
}

fn default_true() -> bool {
    true
}

fn default_high_pass_alpha() -> f32 {
    0.8
}

fn default_envelope_droop() -> f32 {
    0.995
}

fn default_fast_coefficient() -> f32 {
    0.10
}

fn default_slow_coefficient() -> f32 {
    0.01
}

fn default_edge_threshold() -> f32 {
    0.01
}

fn default_relative_threshold() -> f32 {
    0.5
}

fn default_release_fraction() -> f32 {
    0.5
}

fn default_refractory_ms() -> f64 {
    20.0
}

fn default_settle_ms() -> f64 {
    5.0
}

/// Detector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyserConfig {
    /// High-pass filter coefficient (closer to 1.0 = lower cutoff)
    #[serde(default = "default_high_pass_alpha")]
    pub high_pass_alpha: f32,
    /// Per-sample decay of the peak envelope
    #[serde(default = "default_envelope_droop")]
    pub envelope_droop: f32,
    /// Coefficient of the fast envelope tracker
    #[serde(default = "default_fast_coefficient")]
    pub fast_coefficient: f32,
    /// Coefficient of the slow envelope tracker
    #[serde(default = "default_slow_coefficient")]
    pub slow_coefficient: f32,
    /// Fast-minus-slow excursion required to register an edge
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: f32,
    /// Threshold as a fraction of the slow tracker, used when it exceeds
    /// `edge_threshold` (keeps a noisy floor from triggering)
    #[serde(default = "default_relative_threshold")]
    pub relative_threshold: f32,
    /// Fraction of the threshold below which the detector re-arms
    #[serde(default = "default_release_fraction")]
    pub release_fraction: f32,
    /// Edges closer than this to the previous event are merged into it
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: f64,
    /// Leading span used to seed the envelope and trackers with the
    /// starting signal level
    #[serde(default = "default_settle_ms")]
    pub settle_ms: f64,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            high_pass_alpha: default_high_pass_alpha(),
            envelope_droop: default_envelope_droop(),
            fast_coefficient: default_fast_coefficient(),
            slow_coefficient: default_slow_coefficient(),
            edge_threshold: default_edge_threshold(),
            relative_threshold: default_relative_threshold(),
            release_fraction: default_release_fraction(),
            refractory_ms: default_refractory_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl AnalyserConfig {
    /// Refractory distance in frames at the given rate (at least one frame)
    pub fn refractory_frames(&self, sample_rate: u32) -> usize {
        ((self.refractory_ms * sample_rate as f64 / 1000.0) as usize).max(1)
    }

    /// Seeding span in frames at the given rate (at least one frame)
    pub fn settle_frames(&self, sample_rate: u32) -> usize {
        ((self.settle_ms.max(0.0) * sample_rate as f64 / 1000.0) as usize).max(1)
    }
}

/// Tap-to-tone tester configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TesterConfig {
    /// Capture sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Ring buffer length in seconds
    #[serde(default = "default_capture_seconds")]
    pub capture_seconds: f64,
    /// Upper bound on touch latency (ms)
    #[serde(default = "default_touch_latency_ms")]
    pub touch_latency_ms: u32,
    /// Upper bound on output latency (ms); also the settle delay
    #[serde(default = "default_output_latency_ms")]
    pub output_latency_ms: u32,
    /// Extra margin in the analysis window (ms)
    #[serde(default = "default_margin_ms")]
    pub margin_ms: u32,
    /// When false, analysis is skipped and returns no result
    #[serde(default = "default_true")]
    pub recording_enabled: bool,
    /// Detector tuning
    #[serde(default)]
    pub analyser: AnalyserConfig,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            capture_seconds: default_capture_seconds(),
            touch_latency_ms: default_touch_latency_ms(),
            output_latency_ms: default_output_latency_ms(),
            margin_ms: default_margin_ms(),
            recording_enabled: true,
            analyser: AnalyserConfig::default(),
        }
    }
}

impl TesterConfig {
    fn ms_to_frames(&self, ms: u32) -> usize {
        (ms as u64 * self.sample_rate as u64 / 1000) as usize
    }

    /// Total analysis window: touch bound + output bound + margin
    pub fn analysis_window_ms(&self) -> u32 {
        self.touch_latency_ms + self.output_latency_ms + self.margin_ms
    }

    /// Analysis window in frames
    pub fn analysis_window_frames(&self) -> usize {
        self.ms_to_frames(self.analysis_window_ms())
    }

    /// Delay between the trigger and analysis, in frames
    pub fn settle_delay_frames(&self) -> u64 {
        self.ms_to_frames(self.output_latency_ms) as u64
    }

    /// Ring capacity in frames, never smaller than the analysis window
    pub fn capture_capacity_frames(&self) -> usize {
        let requested = (self.capture_seconds.max(0.0) * self.sample_rate as f64) as usize;
        requested.max(self.analysis_window_frames()).max(1)
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TesterConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.analysis_window_ms(), 850);
        assert_eq!(config.analysis_window_frames(), 40800);
        assert_eq!(config.settle_delay_frames(), 28800);
        assert!(config.recording_enabled);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"sample_rate": 44100, "analyser": {"refractory_ms": 5.0}}"#;
        let config: TesterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.output_latency_ms, 600);
        assert_eq!(config.analyser.refractory_ms, 5.0);
        assert_eq!(config.analyser.edge_threshold, 0.01);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: TesterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TesterConfig::default());
    }

    #[test]
    fn test_capacity_covers_window() {
        let config = TesterConfig {
            capture_seconds: 0.1,
            ..Default::default()
        };
        assert_eq!(
            config.capture_capacity_frames(),
            config.analysis_window_frames()
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("taptone.json");
        let config = TesterConfig {
            touch_latency_ms: 150,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(TesterConfig::load(&path), config);
    }

    #[test]
    fn test_refractory_frames() {
        let analyser = AnalyserConfig::default();
        assert_eq!(analyser.refractory_frames(48000), 960);

        let tiny = AnalyserConfig {
            refractory_ms: 0.0,
            ..Default::default()
        };
        assert_eq!(tiny.refractory_frames(48000), 1);
    }

    #[test]
    fn test_settle_frames() {
        let analyser = AnalyserConfig::default();
        assert_eq!(analyser.settle_frames(48000), 240);

        let negative = AnalyserConfig {
            settle_ms: -3.0,
            ..Default::default()
        };
        assert_eq!(negative.settle_frames(48000), 1);
    }
}
