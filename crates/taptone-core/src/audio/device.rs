//! Audio input devices
//!
//! The capture core only sees an open/start/stop/close/read capability:
//! an [`InputSource`] opens an [`InputStream`], which the capture writer
//! thread owns for the whole session. Streams are opened on the writer
//! thread itself, so they do not need to be `Send` (cpal streams are not).
//!
//! Two sources are provided:
//! - [`CpalSource`]: a real input device through cpal
//! - [`SyntheticSource`]: a deterministic simulated microphone that plays
//!   a tap and a delayed tone whenever it is triggered

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TapToToneError};

/// Callback hand-off buffer (~1.3 seconds at 48kHz)
const CALLBACK_RING_SIZE: usize = 65536;

/// An opened input stream, owned by the capture writer thread
pub trait InputStream {
    /// Begin producing samples
    fn start(&mut self) -> Result<()>;

    /// Stop producing samples
    fn stop(&mut self) -> Result<()>;

    /// Copy up to `buffer.len()` mono samples; returns the number copied.
    ///
    /// Must not block for longer than roughly one device period. Returning
    /// 0 means no data is ready yet.
    fn read(&mut self, buffer: &mut [f32]) -> usize;

    /// Release the device
    fn close(&mut self);
}

/// Something that can open an [`InputStream`]
pub trait InputSource: Send + Sync {
    /// Human readable name for logs
    fn name(&self) -> String;

    /// Open a mono stream at `sample_rate`
    ///
    /// # Errors
    /// `DeviceUnavailable` when the device cannot be opened
    fn open(&self, sample_rate: u32) -> Result<Box<dyn InputStream>>;
}

/// Input device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Whether this is the default input
    pub is_default: bool,
    /// Default sample rate
    pub default_sample_rate: u32,
    /// Number of input channels
    pub input_channels: u16,
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> TapToToneError {
    TapToToneError::DeviceUnavailable(format!("{}: {}", context, err))
}

/// Real input device through the default cpal host
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    device_name: Option<String>,
}

impl CpalSource {
    /// Use the host's default input device
    pub fn new() -> Self {
        Self { device_name: None }
    }

    /// Use the input device with this exact name
    pub fn with_device(name: &str) -> Self {
        Self {
            device_name: Some(name.to_string()),
        }
    }

    /// List input devices on the default host
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let devices = host
            .input_devices()
            .map_err(|e| unavailable("enumerating input devices", e))?;

        let mut infos = Vec::new();
        for device in devices {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let (default_sample_rate, input_channels) = device
                .default_input_config()
                .map(|c| (c.sample_rate().0, c.channels()))
                .unwrap_or((0, 0));
            infos.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                default_sample_rate,
                input_channels,
            });
        }
        Ok(infos)
    }

    fn find_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host.default_input_device().ok_or_else(|| {
                TapToToneError::DeviceUnavailable("no default input device".to_string())
            }),
            Some(name) => host
                .input_devices()
                .map_err(|e| unavailable("enumerating input devices", e))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| {
                    TapToToneError::DeviceUnavailable(format!("device not found: {}", name))
                }),
        }
    }
}

impl InputSource for CpalSource {
    fn name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }

    fn open(&self, sample_rate: u32) -> Result<Box<dyn InputStream>> {
        let device = self.find_device()?;
        let default_config = device
            .default_input_config()
            .map_err(|e| unavailable("querying input config", e))?;
        let channels = default_config.channels().max(1);

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<f32>::new(CALLBACK_RING_SIZE);
        let (mut producer, consumer) = ring.split();
        let num_channels = channels as usize;

        // Producer is owned by the callback; only channel 0 is kept
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(num_channels) {
                        if let Some(&sample) = frame.first() {
                            let _ = producer.try_push(sample);
                        }
                    }
                },
                move |err| {
                    tracing::warn!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| unavailable("building input stream", e))?;

        tracing::info!(
            device = %self.name(),
            sample_rate,
            channels,
            "Opened cpal input stream"
        );

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            consumer,
        }))
    }
}

struct CpalStream {
    stream: Option<cpal::Stream>,
    consumer: ringbuf::HeapCons<f32>,
}

impl InputStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream.play().map_err(|e| unavailable("starting stream", e)),
            None => Err(TapToToneError::DeviceUnavailable(
                "stream already closed".to_string(),
            )),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| unavailable("pausing stream", e))?;
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        self.consumer.pop_slice(buffer)
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// Tuning for [`SyntheticSource`]
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Frames produced per read
    pub block_frames: usize,
    /// Peak amplitude of the background noise
    pub noise_amplitude: f32,
    /// Delay from trigger to the tap click (ms)
    pub touch_delay_ms: f64,
    /// Delay from the tap to the tone (ms); the latency being simulated
    pub tone_latency_ms: f64,
    /// Tap click peak amplitude
    pub tap_amplitude: f32,
    /// Tap click duration (ms)
    pub tap_duration_ms: f64,
    /// Tone peak amplitude
    pub tone_amplitude: f32,
    /// Tone duration (ms)
    pub tone_duration_ms: f64,
    /// Tone frequency (Hz)
    pub tone_frequency: f32,
    /// Stream frames at which a trigger fires without being requested
    pub scripted_triggers: Vec<u64>,
    /// Speed relative to real time; `None` produces blocks as fast as read
    pub pacing: Option<f64>,
    /// Stop producing after this many frames
    pub length_frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            block_frames: 256,
            noise_amplitude: 0.0005,
            touch_delay_ms: 30.0,
            tone_latency_ms: 150.0,
            tap_amplitude: 0.4,
            tap_duration_ms: 4.0,
            tone_amplitude: 0.5,
            tone_duration_ms: 40.0,
            tone_frequency: 1000.0,
            scripted_triggers: Vec::new(),
            pacing: Some(1.0),
            length_frames: None,
        }
    }
}

/// Fires a simulated tap on a running [`SyntheticSource`]
#[derive(Debug, Clone)]
pub struct SyntheticTrigger {
    pending: Arc<AtomicU32>,
}

impl SyntheticTrigger {
    /// Request a tap (and its tone) at the stream's current position
    pub fn fire(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }
}

/// Simulated microphone
///
/// Produces a low noise floor. Each trigger schedules a decaying noise
/// click `touch_delay_ms` later followed by a sine tone `tone_latency_ms`
/// after the click.
///
/// # Example
/// ```
/// use taptone_core::audio::device::{InputSource, SyntheticConfig, SyntheticSource};
///
/// let source = SyntheticSource::new(SyntheticConfig {
///     pacing: None,
///     scripted_triggers: vec![0],
///     ..Default::default()
/// });
/// let mut stream = source.open(48000).unwrap();
/// stream.start().unwrap();
/// let mut block = [0.0f32; 256];
/// assert_eq!(stream.read(&mut block), 256);
/// ```
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    config: SyntheticConfig,
    pending: Arc<AtomicU32>,
    available: bool,
}

impl SyntheticSource {
    /// Create a simulated microphone
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            pending: Arc::new(AtomicU32::new(0)),
            available: true,
        }
    }

    /// A source whose `open` always fails
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(SyntheticConfig::default())
        }
    }

    /// Handle for firing taps while the stream runs
    pub fn trigger(&self) -> SyntheticTrigger {
        SyntheticTrigger {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }
}

impl InputSource for SyntheticSource {
    fn name(&self) -> String {
        "synthetic".to_string()
    }

    fn open(&self, sample_rate: u32) -> Result<Box<dyn InputStream>> {
        if !self.available {
            return Err(TapToToneError::DeviceUnavailable(
                "synthetic device refused to open".to_string(),
            ));
        }
        let mut stream = SyntheticStream {
            config: self.config.clone(),
            sample_rate: sample_rate.max(1),
            pending: Arc::clone(&self.pending),
            position: 0,
            running: false,
            noise_seed: 0xDEADBEEF,
            bursts: Vec::new(),
        };
        for &frame in &self.config.scripted_triggers {
            stream.schedule_tap(frame);
        }
        Ok(Box::new(stream))
    }
}

#[derive(Debug, Clone, Copy)]
enum BurstShape {
    Click,
    Tone,
}

#[derive(Debug, Clone)]
struct Burst {
    start: u64,
    len: u64,
    amplitude: f32,
    shape: BurstShape,
}

struct SyntheticStream {
    config: SyntheticConfig,
    sample_rate: u32,
    pending: Arc<AtomicU32>,
    position: u64,
    running: bool,
    noise_seed: u32,
    bursts: Vec<Burst>,
}

impl SyntheticStream {
    fn ms_to_frames(&self, ms: f64) -> u64 {
        (ms.max(0.0) * self.sample_rate as f64 / 1000.0) as u64
    }

    fn schedule_tap(&mut self, trigger_frame: u64) {
        let tap_start = trigger_frame + self.ms_to_frames(self.config.touch_delay_ms);
        let tone_start = tap_start + self.ms_to_frames(self.config.tone_latency_ms);
        self.bursts.push(Burst {
            start: tap_start,
            len: self.ms_to_frames(self.config.tap_duration_ms).max(1),
            amplitude: self.config.tap_amplitude,
            shape: BurstShape::Click,
        });
        self.bursts.push(Burst {
            start: tone_start,
            len: self.ms_to_frames(self.config.tone_duration_ms).max(1),
            amplitude: self.config.tone_amplitude,
            shape: BurstShape::Tone,
        });
        tracing::debug!(trigger_frame, tap_start, tone_start, "synthetic_tap_scheduled");
    }

    /// LCG noise in -1.0..1.0 (glibc constants)
    fn next_noise(&mut self) -> f32 {
        self.noise_seed = self.noise_seed.wrapping_mul(1103515245).wrapping_add(12345);
        let bits = (self.noise_seed >> 16) & 0x7FFF;
        (bits as f32 / 16384.0) - 1.0
    }

    fn next_sample(&mut self) -> f32 {
        let position = self.position;
        let mut sample = self.next_noise() * self.config.noise_amplitude;

        for i in 0..self.bursts.len() {
            let burst = self.bursts[i].clone();
            if position < burst.start || position >= burst.start + burst.len {
                continue;
            }
            let offset = position - burst.start;
            // Linear fade over the last quarter avoids a hard edge at the end
            let fade_len = (burst.len / 4).max(1) as f32;
            let fade = ((burst.len - offset) as f32 / fade_len).min(1.0);
            let value = match burst.shape {
                BurstShape::Click => {
                    let decay = (-(offset as f32) / (burst.len as f32 / 3.0)).exp();
                    self.next_noise() * decay
                }
                BurstShape::Tone => {
                    let phase = 2.0
                        * std::f32::consts::PI
                        * self.config.tone_frequency
                        * offset as f32
                        / self.sample_rate as f32;
                    phase.cos()
                }
            };
            sample += value * burst.amplitude * fade;
        }

        self.position += 1;
        sample
    }
}

impl InputStream for SyntheticStream {
    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        if !self.running {
            return 0;
        }

        let triggers = self.pending.swap(0, Ordering::AcqRel);
        for _ in 0..triggers {
            self.schedule_tap(self.position);
        }
        let position = self.position;
        self.bursts.retain(|b| b.start + b.len > position);

        let mut frames = buffer.len().min(self.config.block_frames.max(1));
        if let Some(length) = self.config.length_frames {
            frames = frames.min(length.saturating_sub(self.position) as usize);
        }
        for sample in buffer.iter_mut().take(frames) {
            *sample = self.next_sample();
        }

        if let Some(speed) = self.config.pacing {
            if frames > 0 && speed > 0.0 {
                let seconds = frames as f64 / self.sample_rate as f64 / speed;
                std::thread::sleep(Duration::from_secs_f64(seconds));
            }
        }

        frames
    }

    fn close(&mut self) {
        self.running = false;
        self.bursts.clear();
    }
}
