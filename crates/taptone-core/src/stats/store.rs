//! Per-trial history and aggregate statistics
//!
//! Every analysed trial is recorded: successful ones feed the latency and
//! amplitude statistics, failed ones are counted with their reason so the
//! caller can report why a measurement is missing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use super::running::RunningStatistic;
use crate::audio::latency::{TapLatency, TestResult};
use crate::error::{Result, TapToToneError};

/// Maximum number of trials kept in history
const MAX_HISTORY_SIZE: usize = 1000;

/// How a trial ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TrialOutcome {
    /// Tap and tone found
    Measured {
        /// Tap-to-tone latency (ms)
        latency_ms: f64,
    },
    /// The window lacked a tap or a tone
    Failed {
        /// Number of events that were found
        events_found: usize,
    },
}

/// One recorded trial
#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    /// When the trial was recorded
    pub timestamp: DateTime<Utc>,
    /// Result of the trial
    pub outcome: TrialOutcome,
}

/// Serializable snapshot of a [`StatsStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    /// Trials recorded, successful or not
    pub trial_count: u64,
    /// Trials without a tap and a tone
    pub failed_trials: u64,
    /// Successful measurements
    pub measurement_count: usize,
    /// Most recent latency (ms)
    pub last_latency_ms: Option<f64>,
    /// Smallest latency (ms)
    pub min_latency_ms: Option<f64>,
    /// Largest latency (ms)
    pub max_latency_ms: Option<f64>,
    /// Mean latency (ms)
    pub mean_latency_ms: Option<f64>,
    /// Mean absolute deviation of latency (ms)
    pub latency_deviation_ms: Option<f64>,
    /// Mean envelope level of tap events
    pub mean_tap_amplitude: Option<f64>,
    /// Mean envelope level of tone events
    pub mean_tone_amplitude: Option<f64>,
}

/// Statistics across repeated trials
#[derive(Debug)]
pub struct StatsStore {
    latency_ms: RunningStatistic,
    tap_amplitude: RunningStatistic,
    tone_amplitude: RunningStatistic,
    history: VecDeque<TrialRecord>,
    max_size: usize,
    trial_count: u64,
    failed_trials: u64,
}

impl StatsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            latency_ms: RunningStatistic::new(),
            tap_amplitude: RunningStatistic::new(),
            tone_amplitude: RunningStatistic::new(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            max_size: MAX_HISTORY_SIZE,
            trial_count: 0,
            failed_trials: 0,
        }
    }

    /// Record the outcome of one analysis pass
    ///
    /// # Errors
    /// `InsufficientEvents` if the result lacks a tap or a tone; the
    /// failure is recorded before it is returned.
    pub fn record_result(&mut self, result: &TestResult) -> Result<TapLatency> {
        match result.latency() {
            Ok(latency) => {
                self.record_latency(&latency);
                Ok(latency)
            }
            Err(TapToToneError::InsufficientEvents { found }) => {
                self.record_failure(found);
                Err(TapToToneError::InsufficientEvents { found })
            }
            Err(e) => Err(e),
        }
    }

    /// Record a successful trial
    pub fn record_latency(&mut self, latency: &TapLatency) {
        self.latency_ms.add(latency.latency_ms);
        self.tap_amplitude.add(latency.tap.amplitude as f64);
        self.tone_amplitude.add(latency.tone.amplitude as f64);
        self.push_record(TrialOutcome::Measured {
            latency_ms: latency.latency_ms,
        });
        tracing::info!(
            latency_ms = %format!("{:.2}", latency.latency_ms),
            measurement = self.latency_ms.count(),
            "Tap-to-tone latency measured"
        );
    }

    /// Record a trial that did not find both events
    pub fn record_failure(&mut self, events_found: usize) {
        self.failed_trials += 1;
        self.push_record(TrialOutcome::Failed { events_found });
        tracing::warn!(
            events_found,
            failed_trials = self.failed_trials,
            "Trial failed: insufficient events"
        );
    }

    fn push_record(&mut self, outcome: TrialOutcome) {
        self.trial_count += 1;
        if self.history.len() >= self.max_size {
            self.history.pop_front();
        }
        self.history.push_back(TrialRecord {
            timestamp: Utc::now(),
            outcome,
        });
    }

    /// Latency statistic (ms)
    pub fn latency(&self) -> &RunningStatistic {
        &self.latency_ms
    }

    /// Tap amplitude statistic
    pub fn tap_amplitude(&self) -> &RunningStatistic {
        &self.tap_amplitude
    }

    /// Tone amplitude statistic
    pub fn tone_amplitude(&self) -> &RunningStatistic {
        &self.tone_amplitude
    }

    /// Recent trials, oldest first
    pub fn history(&self) -> &VecDeque<TrialRecord> {
        &self.history
    }

    /// Trials that failed
    pub fn failed_trials(&self) -> u64 {
        self.failed_trials
    }

    /// Snapshot for display or export
    pub fn summary(&self) -> StatsSummary {
        let mean = self.latency_ms.mean().ok();
        StatsSummary {
            trial_count: self.trial_count,
            failed_trials: self.failed_trials,
            measurement_count: self.latency_ms.count(),
            last_latency_ms: self.latency_ms.last().ok(),
            min_latency_ms: self.latency_ms.min(),
            max_latency_ms: self.latency_ms.max(),
            mean_latency_ms: mean,
            latency_deviation_ms: mean
                .and_then(|m| self.latency_ms.mean_absolute_deviation(m).ok()),
            mean_tap_amplitude: self.tap_amplitude.mean().ok(),
            mean_tone_amplitude: self.tone_amplitude.mean().ok(),
        }
    }

    /// Latency values for plotting (last N measured trials)
    ///
    /// # Returns
    /// Vector of (time_offset_seconds, latency_ms) pairs, newest first
    pub fn latency_plot_data(&self, count: usize) -> Vec<(f64, f64)> {
        let now = Utc::now();
        self.history
            .iter()
            .rev()
            .filter_map(|r| match r.outcome {
                TrialOutcome::Measured { latency_ms } => Some((r.timestamp, latency_ms)),
                TrialOutcome::Failed { .. } => None,
            })
            .take(count)
            .map(|(timestamp, latency_ms)| {
                let time_offset = (now - timestamp).num_milliseconds() as f64 / 1000.0;
                (-time_offset, latency_ms)
            })
            .collect()
    }

    /// Clear all history and statistics
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for StatsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::latency::{EventKind, LatencyEvent};

    fn result_with(indices: &[usize]) -> TestResult {
        let events = indices
            .iter()
            .enumerate()
            .map(|(n, &i)| LatencyEvent {
                kind: if n == 0 { EventKind::Tap } else { EventKind::Tone },
                sample_index: i,
                time_ms: i as f64 / 48.0,
                amplitude: 0.25 * (n + 1) as f32,
            })
            .collect();
        TestResult {
            samples: vec![0.0; 48000],
            filtered: vec![0.0; 48000],
            frame_rate: 48000,
            events,
        }
    }

    #[test]
    fn test_store_creation() {
        let store = StatsStore::new();
        assert!(store.history().is_empty());
        assert_eq!(store.summary(), StatsSummary::default());
    }

    #[test]
    fn test_record_result() {
        let mut store = StatsStore::new();

        let latency = store.record_result(&result_with(&[1000, 5800])).unwrap();
        assert!((latency.latency_ms - 100.0).abs() < 1e-9);
        store.record_result(&result_with(&[1000, 10600])).unwrap();

        let summary = store.summary();
        assert_eq!(summary.trial_count, 2);
        assert_eq!(summary.measurement_count, 2);
        assert_eq!(summary.min_latency_ms, Some(100.0));
        assert_eq!(summary.max_latency_ms, Some(200.0));
        assert_eq!(summary.mean_latency_ms, Some(150.0));
        assert_eq!(summary.latency_deviation_ms, Some(50.0));
        assert_eq!(summary.last_latency_ms, Some(200.0));
        assert_eq!(summary.mean_tap_amplitude, Some(0.25));
        assert_eq!(summary.mean_tone_amplitude, Some(0.5));
    }

    #[test]
    fn test_failed_trial_is_recorded() {
        let mut store = StatsStore::new();
        let err = store.record_result(&result_with(&[1000])).unwrap_err();
        assert!(matches!(err, TapToToneError::InsufficientEvents { found: 1 }));

        let summary = store.summary();
        assert_eq!(summary.trial_count, 1);
        assert_eq!(summary.failed_trials, 1);
        assert_eq!(summary.measurement_count, 0);
        assert_eq!(summary.mean_latency_ms, None);
        assert_eq!(
            store.history()[0].outcome,
            TrialOutcome::Failed { events_found: 1 }
        );
    }

    #[test]
    fn test_plot_data_skips_failures() {
        let mut store = StatsStore::new();
        store.record_result(&result_with(&[0, 4800])).unwrap();
        let _ = store.record_result(&result_with(&[]));
        store.record_result(&result_with(&[0, 9600])).unwrap();

        let data = store.latency_plot_data(10);
        assert_eq!(data.len(), 2);
        assert!((data[0].1 - 200.0).abs() < 1e-9);
        assert!((data[1].1 - 100.0).abs() < 1e-9);
        assert!(data.iter().all(|(t, _)| *t <= 0.0));
    }

    #[test]
    fn test_clear() {
        let mut store = StatsStore::new();
        store.record_result(&result_with(&[0, 4800])).unwrap();
        store.clear();
        assert!(store.history().is_empty());
        assert_eq!(store.latency().count(), 0);
    }

    #[test]
    fn test_history_limit() {
        let mut store = StatsStore::new();
        for _ in 0..(MAX_HISTORY_SIZE + 10) {
            store.record_failure(0);
        }
        assert_eq!(store.history().len(), MAX_HISTORY_SIZE);
        assert_eq!(store.summary().trial_count, (MAX_HISTORY_SIZE + 10) as u64);
    }
}
