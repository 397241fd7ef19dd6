//! Envelope-based tap/tone detection
//!
//! Finds the onsets of taps and tones in a captured window. The raw signal
//! passes through three stages:
//!
//! 1. A first-order high-pass filter that removes rumble and DC offset.
//!    Its output is kept as the "filtered" buffer of the result.
//! 2. A peak envelope follower with per-sample droop.
//! 3. An [`EdgeDetector`] comparing a fast and a slow tracker of that
//!    envelope. A rising excursion above the threshold is an edge.
//!
//! Every stage starts from the level already present at the start of the
//! window, so a window that opens on an offset, a noise floor or the tail
//! of a tone does not read as an onset at index 0.
//!
//! Edges closer than the refractory distance to the previous event are
//! merged into it, so one physical event ringing for a few milliseconds
//! counts once.

use super::latency::{EventKind, LatencyEvent};
use crate::config::AnalyserConfig;

/// Rising edge reported by [`EdgeDetector`]
#[derive(Debug, Clone)]
pub struct Edge {
    /// Index passed to `process` when the edge was seen
    pub onset_index: usize,
    /// Envelope level at the edge
    pub envelope_level: f32,
}

/// Fast/slow envelope edge detector with hysteresis
///
/// # Example
/// ```
/// use taptone_core::audio::detector::EdgeDetector;
/// use taptone_core::AnalyserConfig;
///
/// let mut detector = EdgeDetector::new(&AnalyserConfig::default());
///
/// for i in 0..100 {
///     assert!(detector.process(0.0, i).is_none());
/// }
/// assert!(detector.process(0.5, 100).is_some());
/// ```
#[derive(Debug)]
pub struct EdgeDetector {
    fast: f32,
    slow: f32,
    fast_coefficient: f32,
    slow_coefficient: f32,
    threshold: f32,
    relative_threshold: f32,
    release_fraction: f32,
    /// True between a rising edge and the release
    high: bool,
}

impl EdgeDetector {
    /// Create a detector from analyser tuning
    pub fn new(config: &AnalyserConfig) -> Self {
        Self {
            fast: 0.0,
            slow: 0.0,
            fast_coefficient: config.fast_coefficient.clamp(0.0, 1.0),
            slow_coefficient: config.slow_coefficient.clamp(0.0, 1.0),
            threshold: config.edge_threshold.max(f32::EPSILON),
            relative_threshold: config.relative_threshold.max(0.0),
            release_fraction: config.release_fraction.clamp(0.0, 1.0),
            high: false,
        }
    }

    /// Start both trackers at `level`
    ///
    /// Used when the input begins mid-signal, so the first samples are
    /// not mistaken for a rise from silence.
    pub fn prime(&mut self, level: f32) {
        self.fast = level;
        self.slow = level;
        self.high = false;
    }

    /// Feed one envelope sample
    ///
    /// Returns an edge when the fast tracker pulls away from the slow one
    /// by more than the threshold while the detector is armed.
    pub fn process(&mut self, envelope: f32, index: usize) -> Option<Edge> {
        self.slow += (envelope - self.slow) * self.slow_coefficient;
        self.fast += (envelope - self.fast) * self.fast_coefficient;
        let delta = self.fast - self.slow;
        let threshold = self.threshold();

        if self.high {
            if delta < threshold * self.release_fraction {
                self.high = false;
            }
            None
        } else if delta > threshold {
            self.high = true;
            Some(Edge {
                onset_index: index,
                envelope_level: envelope,
            })
        } else {
            None
        }
    }

    /// Whether an excursion is in progress
    pub fn is_high(&self) -> bool {
        self.high
    }

    /// Current fast-minus-slow excursion
    pub fn delta(&self) -> f32 {
        self.fast - self.slow
    }

    /// Detection threshold at the current slow level
    pub fn threshold(&self) -> f32 {
        self.threshold.max(self.slow * self.relative_threshold)
    }

    /// Reset tracker state
    pub fn reset(&mut self) {
        self.fast = 0.0;
        self.slow = 0.0;
        self.high = false;
    }
}

/// Events and filtered signal from one analysis pass
#[derive(Debug, Clone, Default)]
pub struct DetectionOutput {
    /// High-passed input, one value per analysed sample
    pub filtered: Vec<f32>,
    /// Detected events ordered by sample index
    pub events: Vec<LatencyEvent>,
}

/// Tap-to-tone analyser
///
/// Stateless between calls; each [`analyze`](Self::analyze) starts from
/// fresh filter state.
///
/// # Example
/// ```
/// use taptone_core::{AnalyserConfig, TapLatencyAnalyser};
///
/// let analyser = TapLatencyAnalyser::new(48000, AnalyserConfig::default());
/// let output = analyser.analyze(&[0.0; 4800], 0, 4800);
/// assert!(output.events.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct TapLatencyAnalyser {
    sample_rate: u32,
    config: AnalyserConfig,
}

impl TapLatencyAnalyser {
    /// Create an analyser for the given frame rate
    pub fn new(sample_rate: u32, config: AnalyserConfig) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            config,
        }
    }

    /// Frame rate used to convert indices to milliseconds
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Detector tuning
    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    /// Analyse `count` samples of `buffer` starting at `offset`
    ///
    /// Short input is clamped to what is available. Event indices are
    /// relative to the start of `buffer`.
    pub fn analyze(&self, buffer: &[f32], offset: usize, count: usize) -> DetectionOutput {
        let start = offset.min(buffer.len());
        let end = start.saturating_add(count).min(buffer.len());
        let window = &buffer[start..end];

        let filtered = self.high_pass(window);
        let envelope = self.peak_envelope(&filtered);
        let events = self.scan_for_edges(&envelope, start);

        tracing::debug!(
            samples = window.len(),
            offset = start,
            events = events.len(),
            "tap_analysis"
        );

        DetectionOutput { filtered, events }
    }

    /// `y[n] = a * (y[n-1] + x[n] - x[n-1])`, primed with `x[-1] = x[0]`
    fn high_pass(&self, input: &[f32]) -> Vec<f32> {
        let alpha = self.config.high_pass_alpha;
        let mut previous_in = input.first().copied().unwrap_or(0.0);
        let mut previous_out = 0.0f32;
        input
            .iter()
            .map(|&x| {
                let y = alpha * (previous_out + x - previous_in);
                previous_in = x;
                previous_out = y;
                y
            })
            .collect()
    }

    /// Instant attack, exponential droop
    ///
    /// Starts at the peak of the leading settle span instead of zero.
    fn peak_envelope(&self, input: &[f32]) -> Vec<f32> {
        let droop = self.config.envelope_droop;
        let lead = self.config.settle_frames(self.sample_rate);
        let mut previous = input
            .iter()
            .take(lead)
            .fold(0.0f32, |peak, x| peak.max(x.abs()));
        input
            .iter()
            .map(|x| {
                let current = x.abs().max(previous * droop);
                previous = current;
                current
            })
            .collect()
    }

    fn scan_for_edges(&self, envelope: &[f32], base_index: usize) -> Vec<LatencyEvent> {
        let refractory = self.config.refractory_frames(self.sample_rate);
        let mut detector = EdgeDetector::new(&self.config);
        let mut events: Vec<LatencyEvent> = Vec::new();

        let settle = self.config.settle_frames(self.sample_rate);
        let lead = settle.min(envelope.len());
        if lead > 0 {
            let level = envelope[..lead].iter().sum::<f32>() / lead as f32;
            detector.prime(level);
        }

        for (i, &level) in envelope.iter().enumerate() {
            let Some(edge) = detector.process(level, base_index + i) else {
                continue;
            };

            if let Some(last) = events.last_mut() {
                if edge.onset_index - last.sample_index < refractory {
                    // Ringing from the same physical event
                    last.amplitude = last.amplitude.max(edge.envelope_level);
                    tracing::trace!(
                        index = edge.onset_index,
                        merged_into = last.sample_index,
                        "edge_coalesced"
                    );
                    continue;
                }
            }

            let kind = if events.is_empty() {
                EventKind::Tap
            } else {
                EventKind::Tone
            };
            events.push(LatencyEvent {
                kind,
                sample_index: edge.onset_index,
                time_ms: edge.onset_index as f64 / self.sample_rate as f64 * 1000.0,
                amplitude: edge.envelope_level,
            });
        }

        events
    }
}
