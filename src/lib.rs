//! Taptone - tap-to-tone latency tester
//!
//! This library re-exports the capture, detection and statistics
//! functionality from `taptone-core`.

pub use taptone_core::audio;
pub use taptone_core::config;
pub use taptone_core::error;
pub use taptone_core::stats;

pub use taptone_core::{
    AnalyserConfig, AudioCapture, EventKind, LatencyEvent, RunningStatistic, StatsStore,
    TapLatency, TapLatencyAnalyser, TapToToneError, TapToToneTester, TestResult, TesterConfig,
    TesterState,
};
pub use taptone_core::{BUILD_DATE, DEFAULT_SAMPLE_RATE, VERSION};
