//! Ring-buffered audio capture
//!
//! A writer thread reads blocks from the input device and appends them to
//! a fixed-capacity [`CaptureBuffer`]. Everything else gets copies:
//! [`AudioCapture::read_most_recent`] takes the ring lock for the length
//! of one copy, so it never sees a block half written across the wrap.
//!
//! The stream clock (`frames_captured`) counts every frame the device
//! delivered, including frames read while writes were paused. Scheduled
//! tasks are due against this clock.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::device::{InputSource, InputStream};
use super::scheduler::{TaskHandle, TaskScheduler};
use crate::config::TesterConfig;
use crate::error::{Result, TapToToneError};

/// Frames moved from the device per writer iteration
const WRITE_BLOCK_FRAMES: usize = 1024;

/// Back-off when the device has no data ready
const IDLE_POLL: Duration = Duration::from_millis(2);

/// How long `start_audio` waits for the device to open
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Peak and RMS amplitude of one buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Largest absolute sample
    pub peak: f32,
    /// Root mean square
    pub rms: f32,
}

impl RecordingStats {
    /// Measure a buffer. Empty input gives zeros.
    pub fn from_samples(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut peak = 0.0f32;
        let mut sum_squares = 0.0f64;
        for &s in samples {
            peak = peak.max(s.abs());
            sum_squares += (s as f64) * (s as f64);
        }
        Self {
            peak,
            rms: (sum_squares / samples.len() as f64).sqrt() as f32,
        }
    }
}

/// Fixed-capacity ring of samples
///
/// Capacity is set at construction and never reallocated.
#[derive(Debug)]
pub struct CaptureBuffer {
    samples: Box<[f32]>,
    sample_rate: u32,
    /// Total frames ever written; ring index is this modulo capacity
    frames_written: u64,
    enabled: bool,
}

impl CaptureBuffer {
    /// Create an empty ring holding `capacity` samples (at least one)
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![0.0f32; capacity.max(1)].into_boxed_slice(),
            sample_rate,
            frames_written: 0,
            enabled: true,
        }
    }

    /// Ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Frame rate of the stored samples
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Write cursor: total frames written since the last clear
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Number of valid samples held
    pub fn len(&self) -> usize {
        self.frames_written.min(self.capacity() as u64) as usize
    }

    /// True before the first write
    pub fn is_empty(&self) -> bool {
        self.frames_written == 0
    }

    /// Whether writes are accepted
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pause or resume writes
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Append a block, overwriting the oldest samples
    ///
    /// Returns the number of frames accepted (0 while disabled).
    pub fn write(&mut self, block: &[f32]) -> usize {
        if !self.enabled || block.is_empty() {
            return 0;
        }
        let capacity = self.capacity();

        // Only the tail of an oversized block survives
        let skipped = block.len().saturating_sub(capacity);
        let data = &block[skipped..];
        self.frames_written += skipped as u64;

        let index = (self.frames_written % capacity as u64) as usize;
        let first = (capacity - index).min(data.len());
        self.samples[index..index + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.samples[..rest].copy_from_slice(&data[first..]);
        }
        self.frames_written += data.len() as u64;
        block.len()
    }

    /// Copy the most recent `dest.len()` samples in chronological order
    ///
    /// Fewer are copied while the ring is not yet that full; the count is
    /// returned and the copied samples occupy the start of `dest`.
    pub fn read_most_recent(&self, dest: &mut [f32]) -> usize {
        let capacity = self.capacity();
        let count = dest.len().min(self.len());
        if count == 0 {
            return 0;
        }
        let end = (self.frames_written % capacity as u64) as usize;
        let start = (end + capacity - count) % capacity;

        if start + count <= capacity {
            dest[..count].copy_from_slice(&self.samples[start..start + count]);
        } else {
            let first = capacity - start;
            dest[..first].copy_from_slice(&self.samples[start..]);
            dest[first..count].copy_from_slice(&self.samples[..count - first]);
        }
        count
    }

    /// Forget all samples; capacity is unchanged
    pub fn clear(&mut self) {
        self.frames_written = 0;
        self.samples.fill(0.0);
    }
}

/// State shared between the writer thread and readers
struct SharedCapture {
    buffer: Mutex<CaptureBuffer>,
    /// Frames delivered by the device this session, written or not
    stream_frames: AtomicU64,
    running: AtomicBool,
}

/// Handle to the writer thread of one capture session
struct CaptureSession {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureSession {
    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Continuous audio capture into a ring buffer
///
/// All methods take `&self`; the capture can be shared across threads.
pub struct AudioCapture {
    source: Arc<dyn InputSource>,
    shared: Arc<SharedCapture>,
    scheduler: Arc<TaskScheduler>,
    session: Mutex<Option<CaptureSession>>,
}

impl AudioCapture {
    /// Create a capture with a ring of `capacity` frames
    pub fn new(source: Arc<dyn InputSource>, sample_rate: u32, capacity: usize) -> Self {
        Self {
            source,
            shared: Arc::new(SharedCapture {
                buffer: Mutex::new(CaptureBuffer::new(capacity, sample_rate)),
                stream_frames: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            scheduler: Arc::new(TaskScheduler::new()),
            session: Mutex::new(None),
        }
    }

    /// Create a capture sized from tester configuration
    pub fn from_config(source: Arc<dyn InputSource>, config: &TesterConfig) -> Self {
        Self::new(source, config.sample_rate, config.capture_capacity_frames())
    }

    /// Open the device and start writing into the ring
    ///
    /// Does nothing if already running. A new session starts with an empty
    /// ring and a stream clock at zero.
    ///
    /// # Errors
    /// `DeviceUnavailable` if the device cannot be opened or started
    pub fn start_audio(&self) -> Result<()> {
        let Ok(mut session) = self.session.lock() else {
            return Err(TapToToneError::DeviceUnavailable(
                "capture session state poisoned".to_string(),
            ));
        };
        if session.is_some() && self.is_running() {
            return Ok(());
        }
        if let Some(mut stale) = session.take() {
            stale.stop();
        }

        let sample_rate = self.sample_rate();
        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.clear();
            buffer.set_enabled(true);
        }
        self.shared.stream_frames.store(0, Ordering::Release);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let writer = CaptureWriter {
            source: Arc::clone(&self.source),
            shared: Arc::clone(&self.shared),
            scheduler: Arc::clone(&self.scheduler),
            stop_flag: Arc::clone(&stop_flag),
            sample_rate,
        };

        let thread = std::thread::Builder::new()
            .name("taptone-capture".into())
            .spawn(move || writer.run(ready_tx))
            .map_err(|e| {
                TapToToneError::DeviceUnavailable(format!("spawning capture thread: {}", e))
            })?;

        let mut new_session = CaptureSession {
            stop_flag,
            thread: Some(thread),
        };

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                *session = Some(new_session);
                tracing::info!(
                    device = %self.source.name(),
                    sample_rate,
                    capacity = self.capacity(),
                    "Audio capture started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                new_session.stop();
                tracing::warn!(device = %self.source.name(), error = %e, "Audio capture failed to start");
                Err(e)
            }
            Err(_) => {
                // Leave the thread to finish on its own; it sees the flag
                new_session.stop_flag.store(true, Ordering::Release);
                Err(TapToToneError::DeviceUnavailable(
                    "timed out opening input device".to_string(),
                ))
            }
        }
    }

    /// Stop writing and release the device. Idempotent.
    ///
    /// Pending scheduled tasks are cancelled.
    pub fn stop_audio(&self) {
        self.scheduler.cancel_all();
        let session = self.session.lock().ok().and_then(|mut s| s.take());
        if let Some(mut session) = session {
            session.stop();
            tracing::info!(frames = self.frames_captured(), "Audio capture stopped");
        }
        self.shared.running.store(false, Ordering::Release);
    }

    /// Pause or resume ring writes without closing the device
    pub fn set_capture_enabled(&self, enabled: bool) {
        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.set_enabled(enabled);
        }
        tracing::debug!(enabled, "capture_enabled");
    }

    /// Whether ring writes are currently accepted
    pub fn is_capture_enabled(&self) -> bool {
        self.shared
            .buffer
            .lock()
            .map(|b| b.is_enabled())
            .unwrap_or(false)
    }

    /// Copy the most recent `dest.len()` samples, oldest first
    ///
    /// Returns the number of valid samples at the start of `dest`.
    pub fn read_most_recent(&self, dest: &mut [f32]) -> usize {
        self.shared
            .buffer
            .lock()
            .map(|b| b.read_most_recent(dest))
            .unwrap_or(0)
    }

    /// Run `callback` once the stream advances `delay_frames` past now
    ///
    /// # Errors
    /// `CaptureNotRunning` if capture is stopped
    pub fn schedule_task<F>(&self, delay_frames: u64, callback: F) -> Result<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            return Err(TapToToneError::CaptureNotRunning);
        }
        let due = self.frames_captured() + delay_frames;
        Ok(self.scheduler.schedule(due, callback))
    }

    /// Peak and RMS of the most recent `frames` samples
    pub fn recording_stats(&self, frames: usize) -> RecordingStats {
        let mut snapshot = vec![0.0f32; frames];
        let count = self.read_most_recent(&mut snapshot);
        RecordingStats::from_samples(&snapshot[..count])
    }

    /// Capture frame rate
    pub fn sample_rate(&self) -> u32 {
        self.shared
            .buffer
            .lock()
            .map(|b| b.sample_rate())
            .unwrap_or(crate::DEFAULT_SAMPLE_RATE)
    }

    /// Ring capacity in frames
    pub fn capacity(&self) -> usize {
        self.shared.buffer.lock().map(|b| b.capacity()).unwrap_or(0)
    }

    /// Stream clock: frames delivered by the device this session
    pub fn frames_captured(&self) -> u64 {
        self.shared.stream_frames.load(Ordering::Acquire)
    }

    /// Ring write cursor
    pub fn frames_written(&self) -> u64 {
        self.shared
            .buffer
            .lock()
            .map(|b| b.frames_written())
            .unwrap_or(0)
    }

    /// Whether the writer thread is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Tasks waiting on the stream clock
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.pending_count()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop_audio();
    }
}

/// Everything the writer thread owns
struct CaptureWriter {
    source: Arc<dyn InputSource>,
    shared: Arc<SharedCapture>,
    scheduler: Arc<TaskScheduler>,
    stop_flag: Arc<AtomicBool>,
    sample_rate: u32,
}

impl CaptureWriter {
    fn run(self, ready: Sender<Result<()>>) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.capture_loop(ready);
        }));
        self.shared.running.store(false, Ordering::Release);
        match result {
            Ok(()) => tracing::debug!("Capture writer exited normally"),
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(panic = %msg, "Capture writer thread PANICKED");
            }
        }
    }

    fn open_stream(&self) -> Result<Box<dyn InputStream>> {
        let mut stream = self.source.open(self.sample_rate)?;
        if let Err(e) = stream.start() {
            stream.close();
            return Err(e);
        }
        Ok(stream)
    }

    fn capture_loop(&self, ready: Sender<Result<()>>) {
        let mut stream = match self.open_stream() {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        self.shared.running.store(true, Ordering::Release);
        let _ = ready.send(Ok(()));

        let mut block = vec![0.0f32; WRITE_BLOCK_FRAMES];
        while !self.stop_flag.load(Ordering::Acquire) {
            let read = stream.read(&mut block);
            if read == 0 {
                std::thread::sleep(IDLE_POLL);
                continue;
            }

            if let Ok(mut buffer) = self.shared.buffer.lock() {
                buffer.write(&block[..read]);
            }
            let position = self
                .shared
                .stream_frames
                .fetch_add(read as u64, Ordering::AcqRel)
                + read as u64;
            self.scheduler.advance(position);
        }

        if let Err(e) = stream.stop() {
            tracing::warn!(error = %e, "Failed to stop input stream");
        }
        stream.close();
    }
}
