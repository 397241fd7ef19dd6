//! Tap-to-tone latency results
//!
//! A trial window contains (at most) two true events: the tap itself and
//! the tone it caused, recorded back through the microphone. Latency is
//! the sample distance between them, converted with the capture rate:
//!
//! ```text
//! latency_samples = tone.sample_index - tap.sample_index
//! latency_ms = latency_samples / frame_rate * 1000
//! ```

use serde::{Deserialize, Serialize};

use super::capture::RecordingStats;
use crate::error::{Result, TapToToneError};

/// What a detected event is believed to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// The physical tap (first event in a window)
    Tap,
    /// The tone played in response (any later event)
    Tone,
}

/// A detected event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyEvent {
    /// Tap or tone
    pub kind: EventKind,
    /// Sample index within the analysed buffer
    pub sample_index: usize,
    /// `sample_index` converted to milliseconds
    pub time_ms: f64,
    /// Envelope level at detection
    pub amplitude: f32,
}

/// Latency of a single trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapLatency {
    /// The tap event
    pub tap: LatencyEvent,
    /// The tone event following it
    pub tone: LatencyEvent,
    /// Distance between the two, in samples
    pub latency_samples: usize,
    /// Distance between the two, in milliseconds
    pub latency_ms: f64,
}

/// Output of one analysis pass. Not mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Raw samples that were analysed
    pub samples: Vec<f32>,
    /// High-passed version of `samples`, for display
    pub filtered: Vec<f32>,
    /// Frame rate of `samples`
    pub frame_rate: u32,
    /// Detected events, ordered by sample index
    pub events: Vec<LatencyEvent>,
}

impl TestResult {
    /// Compute the tap-to-tone latency of this trial
    ///
    /// Uses the first tap and the first tone after it.
    ///
    /// # Errors
    /// `InsufficientEvents` when the window lacks either event
    pub fn latency(&self) -> Result<TapLatency> {
        let found = self.events.len();
        let tap = self
            .events
            .iter()
            .find(|e| e.kind == EventKind::Tap)
            .ok_or(TapToToneError::InsufficientEvents { found })?;
        let tone = self
            .events
            .iter()
            .find(|e| e.kind == EventKind::Tone && e.sample_index >= tap.sample_index)
            .ok_or(TapToToneError::InsufficientEvents { found })?;

        let latency_samples = tone.sample_index - tap.sample_index;
        let latency_ms = latency_samples as f64 / self.frame_rate.max(1) as f64 * 1000.0;

        Ok(TapLatency {
            tap: tap.clone(),
            tone: tone.clone(),
            latency_samples,
            latency_ms,
        })
    }

    /// Peak and RMS of the raw samples
    pub fn recording_stats(&self) -> RecordingStats {
        RecordingStats::from_samples(&self.samples)
    }

    /// Window duration in milliseconds
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 / self.frame_rate.max(1) as f64 * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, sample_index: usize) -> LatencyEvent {
        LatencyEvent {
            kind,
            sample_index,
            time_ms: sample_index as f64 / 48.0,
            amplitude: 0.5,
        }
    }

    fn result(events: Vec<LatencyEvent>) -> TestResult {
        TestResult {
            samples: vec![0.0; 48000],
            filtered: vec![0.0; 48000],
            frame_rate: 48000,
            events,
        }
    }

    #[test]
    fn test_latency_from_two_events() {
        let r = result(vec![
            event(EventKind::Tap, 4800),
            event(EventKind::Tone, 12000),
        ]);
        let latency = r.latency().unwrap();
        assert_eq!(latency.latency_samples, 7200);
        assert!((latency.latency_ms - 150.0).abs() < 1e-9);
        assert_eq!(latency.tap.sample_index, 4800);
    }

    #[test]
    fn test_latency_uses_first_tone() {
        let r = result(vec![
            event(EventKind::Tap, 100),
            event(EventKind::Tone, 580),
            event(EventKind::Tone, 9000),
        ]);
        assert_eq!(r.latency().unwrap().latency_samples, 480);
    }

    #[test]
    fn test_single_event_is_insufficient() {
        let r = result(vec![event(EventKind::Tap, 100)]);
        match r.latency() {
            Err(TapToToneError::InsufficientEvents { found }) => assert_eq!(found, 1),
            other => panic!("expected InsufficientEvents, got {:?}", other),
        }
    }

    #[test]
    fn test_no_events_is_insufficient() {
        let r = result(vec![]);
        assert!(matches!(
            r.latency(),
            Err(TapToToneError::InsufficientEvents { found: 0 })
        ));
    }

    #[test]
    fn test_duration() {
        let r = result(vec![]);
        assert!((r.duration_ms() - 1000.0).abs() < 1e-9);
    }
}
