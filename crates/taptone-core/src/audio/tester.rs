//! Tap-to-tone test orchestration
//!
//! Drives one trial at a time:
//!
//! ```text
//! Idle -> Recording -> (tap) -> Delaying -> Analyzing -> Idle
//! ```
//!
//! `start` opens capture and begins recording. When the tap happens the
//! caller invokes `schedule_task_when_done`, which waits for the maximum
//! output latency in stream time so the tone has certainly been captured,
//! then runs the given task (normally `analyze_captured_audio`). The
//! capture device stays open after analysis so the next trial can start
//! without reopening it.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::capture::AudioCapture;
use super::detector::TapLatencyAnalyser;
use super::device::InputSource;
use super::latency::TestResult;
use super::scheduler::TaskHandle;
use crate::config::TesterConfig;
use crate::error::{Result, TapToToneError};
use crate::stats::store::{StatsStore, StatsSummary};

/// Tester state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TesterState {
    /// Not recording
    Idle,
    /// Capturing, waiting for a tap
    Recording,
    /// Tap seen, waiting for the settle delay
    Delaying,
    /// Analysing the captured window
    Analyzing,
}

/// Tap-to-tone latency tester
pub struct TapToToneTester {
    config: TesterConfig,
    capture: AudioCapture,
    analyser: TapLatencyAnalyser,
    state: Mutex<TesterState>,
    recording_enabled: AtomicBool,
    pending: Mutex<Option<TaskHandle>>,
    stats: Mutex<StatsStore>,
    last_result: Mutex<Option<TestResult>>,
}

impl TapToToneTester {
    /// Create a tester reading from `source`
    pub fn new(source: Arc<dyn InputSource>, config: TesterConfig) -> Self {
        let capture = AudioCapture::from_config(source, &config);
        let analyser = TapLatencyAnalyser::new(config.sample_rate, config.analyser.clone());
        Self {
            recording_enabled: AtomicBool::new(config.recording_enabled),
            config,
            capture,
            analyser,
            state: Mutex::new(TesterState::Idle),
            pending: Mutex::new(None),
            stats: Mutex::new(StatsStore::new()),
            last_result: Mutex::new(None),
        }
    }

    fn set_state(&self, next: TesterState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                tracing::debug!(from = ?*state, to = ?next, "tester_state");
                *state = next;
            }
        }
    }

    fn cancel_pending(&self) {
        let pending = self.pending.lock().ok().and_then(|mut p| p.take());
        if let Some(handle) = pending {
            handle.cancel();
        }
    }

    /// Current state
    pub fn state(&self) -> TesterState {
        self.state.lock().map(|s| *s).unwrap_or(TesterState::Idle)
    }

    /// Configuration in use
    pub fn config(&self) -> &TesterConfig {
        &self.config
    }

    /// Capture frame rate
    pub fn sample_rate(&self) -> u32 {
        self.capture.sample_rate()
    }

    /// Underlying capture
    pub fn capture(&self) -> &AudioCapture {
        &self.capture
    }

    /// Enable or disable analysis of captured audio
    ///
    /// Disabling cancels a scheduled analysis; the tester goes back to
    /// waiting for a tap.
    pub fn set_recording_enabled(&self, enabled: bool) {
        self.recording_enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.cancel_pending();
            if self.state() == TesterState::Delaying {
                self.set_state(TesterState::Recording);
            }
        }
    }

    /// Whether captured audio will be analysed
    pub fn is_recording_enabled(&self) -> bool {
        self.recording_enabled.load(Ordering::Acquire)
    }

    /// Start (or re-arm) recording
    ///
    /// # Errors
    /// `DeviceUnavailable` if the capture device cannot be opened
    pub fn start(&self) -> Result<()> {
        self.cancel_pending();
        if let Err(e) = self.capture.start_audio() {
            self.set_state(TesterState::Idle);
            return Err(e);
        }
        self.capture.set_capture_enabled(true);
        self.set_state(TesterState::Recording);
        tracing::info!(
            window_ms = self.config.analysis_window_ms(),
            settle_ms = self.config.output_latency_ms,
            "Tap-to-tone test armed"
        );
        Ok(())
    }

    /// Run `task` once the settle delay has elapsed in stream time
    ///
    /// Replaces any task still waiting from an earlier call.
    ///
    /// # Errors
    /// `NotRecording` unless recording; `CaptureNotRunning` if capture
    /// stopped underneath
    pub fn schedule_task_when_done<F>(&self, task: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let state = self.state();
        if state != TesterState::Recording {
            return Err(TapToToneError::NotRecording { state });
        }

        self.cancel_pending();
        let delay = self.config.settle_delay_frames();
        let handle = self.capture.schedule_task(delay, task)?;
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(handle.clone());
        }
        self.set_state(TesterState::Delaying);
        tracing::debug!(delay_frames = delay, due = handle.due_frame(), "analysis_scheduled");
        Ok(handle)
    }

    /// Analyse the most recent window of captured audio
    ///
    /// Returns `None` when recording is disabled. Trials missing a tap or
    /// a tone still return their result; the failure is recorded in the
    /// statistics and visible through [`TestResult::latency`].
    pub fn analyze_captured_audio(&self) -> Option<TestResult> {
        // The task that called us is no longer pending
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }

        if !self.is_recording_enabled() {
            tracing::debug!("Recording disabled, skipping analysis");
            self.set_state(TesterState::Idle);
            return None;
        }

        self.set_state(TesterState::Analyzing);

        let mut samples = vec![0.0f32; self.config.analysis_window_frames()];
        self.capture.set_capture_enabled(false);
        let count = self.capture.read_most_recent(&mut samples);
        self.capture.set_capture_enabled(true);
        samples.truncate(count);

        let output = self.analyser.analyze(&samples, 0, samples.len());
        let result = TestResult {
            samples,
            filtered: output.filtered,
            frame_rate: self.analyser.sample_rate(),
            events: output.events,
        };

        if let Ok(mut stats) = self.stats.lock() {
            // Failed trials are logged and counted by the store
            let measured = stats.record_result(&result).is_ok();
            tracing::debug!(events = result.events.len(), measured, "analysis_complete");
        }

        if let Ok(mut last) = self.last_result.lock() {
            *last = Some(result.clone());
        }
        self.set_state(TesterState::Idle);
        Some(result)
    }

    /// Stop capture and return to idle. Idempotent.
    pub fn stop(&self) {
        self.cancel_pending();
        self.capture.stop_audio();
        self.set_state(TesterState::Idle);
    }

    /// Statistics across all trials so far
    pub fn stats_summary(&self) -> StatsSummary {
        self.stats
            .lock()
            .map(|s| s.summary())
            .unwrap_or_default()
    }

    /// Clear accumulated statistics
    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.clear();
        }
    }

    /// Most recent analysis result
    pub fn last_result(&self) -> Option<TestResult> {
        self.last_result.lock().ok().and_then(|r| (*r).clone())
    }
}

impl Drop for TapToToneTester {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{SyntheticConfig, SyntheticSource};
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn scripted_tester(trigger_frame: u64, length_frames: u64) -> TapToToneTester {
        let source = SyntheticSource::new(SyntheticConfig {
            pacing: None,
            scripted_triggers: vec![trigger_frame],
            length_frames: Some(length_frames),
            ..Default::default()
        });
        TapToToneTester::new(Arc::new(source), TesterConfig::default())
    }

    #[test]
    fn test_initial_state() {
        let tester = scripted_tester(0, 1000);
        assert_eq!(tester.state(), TesterState::Idle);
        assert!(tester.is_recording_enabled());
    }

    #[test]
    fn test_start_unavailable_device() {
        let tester =
            TapToToneTester::new(Arc::new(SyntheticSource::unavailable()), TesterConfig::default());
        assert!(matches!(
            tester.start(),
            Err(TapToToneError::DeviceUnavailable(_))
        ));
        assert_eq!(tester.state(), TesterState::Idle);
    }

    #[test]
    fn test_schedule_requires_recording() {
        let tester = scripted_tester(0, 1000);
        assert!(matches!(
            tester.schedule_task_when_done(|| {}),
            Err(TapToToneError::NotRecording {
                state: TesterState::Idle
            })
        ));
    }

    #[test]
    fn test_analysis_of_scripted_trial() {
        // Trigger at 0.5s: tap at 0.53s, tone at 0.68s, stream ends at 1.2s
        let tester = scripted_tester(24000, 57600);
        tester.start().unwrap();
        assert_eq!(tester.state(), TesterState::Recording);
        assert!(wait_until(Duration::from_secs(5), || {
            tester.capture().frames_written() == 57600
        }));

        let result = tester.analyze_captured_audio().unwrap();
        assert_eq!(result.samples.len(), 40800);
        assert_eq!(result.filtered.len(), 40800);
        assert_eq!(result.frame_rate, 48000);

        let latency = result.latency().unwrap();
        assert!(
            (latency.latency_ms - 150.0).abs() < 5.0,
            "latency {} ms",
            latency.latency_ms
        );
        assert_eq!(tester.state(), TesterState::Idle);
        assert_eq!(tester.stats_summary().measurement_count, 1);
        assert!(tester.last_result().is_some());
        tester.stop();
    }

    #[test]
    fn test_recording_disabled_returns_none() {
        let tester = scripted_tester(0, 4800);
        tester.set_recording_enabled(false);
        tester.start().unwrap();
        assert!(tester.analyze_captured_audio().is_none());
        assert_eq!(tester.stats_summary().trial_count, 0);
        tester.stop();
    }

    #[test]
    fn test_silent_window_counts_as_failed_trial() {
        let source = SyntheticSource::new(SyntheticConfig {
            pacing: None,
            length_frames: Some(48000),
            ..Default::default()
        });
        let tester = TapToToneTester::new(Arc::new(source), TesterConfig::default());
        tester.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            tester.capture().frames_written() == 48000
        }));

        let result = tester.analyze_captured_audio().unwrap();
        assert!(result.events.is_empty());
        assert!(matches!(
            result.latency(),
            Err(TapToToneError::InsufficientEvents { found: 0 })
        ));
        assert_eq!(tester.stats_summary().failed_trials, 1);
        tester.stop();
    }

    #[test]
    fn test_disabling_recording_cancels_scheduled_analysis() {
        let source = SyntheticSource::new(SyntheticConfig::default());
        let tester = TapToToneTester::new(Arc::new(source), TesterConfig::default());
        tester.start().unwrap();

        let handle = tester.schedule_task_when_done(|| {}).unwrap();
        tester.set_recording_enabled(false);
        assert!(handle.is_cancelled());
        assert_eq!(tester.state(), TesterState::Recording);
        tester.stop();
    }

    #[test]
    fn test_stop_cancels_scheduled_analysis() {
        let source = SyntheticSource::new(SyntheticConfig {
            pacing: Some(1.0),
            ..Default::default()
        });
        let tester = TapToToneTester::new(Arc::new(source), TesterConfig::default());
        tester.start().unwrap();

        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let handle = tester
            .schedule_task_when_done(move || {
                let _ = tx.send(());
            })
            .unwrap();
        assert_eq!(tester.state(), TesterState::Delaying);

        tester.stop();
        tester.stop();
        assert!(handle.is_cancelled());
        assert_eq!(tester.state(), TesterState::Idle);
        assert!(rx.recv_timeout(Duration::from_millis(800)).is_err());
    }
}
