//! Taptone Core - Capture, detection, and statistics for tap-to-tone latency
//!
//! This library measures the round-trip latency of a device's audio input
//! path. Audio is recorded into a ring buffer, a window around a physical
//! tap is analysed for a tap event followed by the resulting tone, and the
//! distance between the two feeds running statistics across trials.

pub mod audio;
pub mod config;
pub mod error;
pub mod stats;

pub use audio::{
    capture::{AudioCapture, RecordingStats},
    detector::TapLatencyAnalyser,
    latency::{EventKind, LatencyEvent, TapLatency, TestResult},
    tester::{TapToToneTester, TesterState},
};
pub use config::{AnalyserConfig, TesterConfig};
pub use error::TapToToneError;
pub use stats::{running::RunningStatistic, store::StatsStore};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default capture sample rate (48kHz is native on most mobile codecs)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Upper bound on touch-to-event latency (ms)
pub const TOUCH_LATENCY_BOUND_MS: u32 = 200;

/// Upper bound on output latency, also the settle delay before analysis (ms)
pub const OUTPUT_LATENCY_BOUND_MS: u32 = 600;

/// Extra margin added to the analysis window (ms)
pub const ANALYSIS_MARGIN_MS: u32 = 250;
