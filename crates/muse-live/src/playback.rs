//! Gapless playback scheduling and the interruption kill-switch.
//!
//! Inbound 24 kHz PCM deltas are decoded and chained on the output device
//! clock: each buffer starts at `max(cursor, now)` and advances the cursor by
//! exactly its duration, so chunks play back-to-back regardless of network
//! arrival jitter. An interruption stops every pending source, clears the
//! set, and resets the cursor — all under one lock, so a racing audio delta
//! can never observe a half-reset schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::{debug, info, warn};

use crate::error::{LiveError, LiveResult};
use crate::pcm;

/// Monotonic clock of the output device, in seconds.
pub trait OutputClock: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// Production clock: monotonic time since the device was opened.
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for MonotonicClock {
    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Destination for decoded playback buffers.
///
/// The production implementation is [`RodioSink`]; tests record scheduled
/// buffers instead of playing them.
pub trait PlaybackSink: Send + Sync {
    /// Queue a mono buffer to begin playing at `start_at` seconds on the
    /// device clock.
    fn schedule(&self, samples: Vec<f32>, sample_rate: u32, start_at: f64) -> LiveResult<()>;

    /// Stop everything playing or pending immediately.
    fn halt(&self);
}

/// Owns the OS output device.
///
/// The stream handle is not `Send` on some platforms, so it lives on a
/// dedicated thread that parks until the device is dropped; only the sink
/// handle crosses threads.
pub struct OutputDevice {
    sink: Arc<Sink>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OutputDevice {
    /// Open the default output device.
    pub fn open() -> LiveResult<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<LiveResult<Arc<Sink>>>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let thread = thread::spawn(move || {
            let built = (|| {
                let (stream, handle) = OutputStream::try_default()
                    .map_err(|e| LiveError::Playback(e.to_string()))?;
                let sink =
                    Sink::try_new(&handle).map_err(|e| LiveError::Playback(e.to_string()))?;
                Ok::<_, LiveError>((stream, handle, Arc::new(sink)))
            })();
            match built {
                Ok((_stream, _handle, sink)) => {
                    let _ = ready_tx.send(Ok(sink.clone()));
                    while !flag.load(Ordering::SeqCst) {
                        thread::park_timeout(Duration::from_millis(100));
                    }
                    // _stream and _handle drop here, releasing the device.
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let sink = match ready_rx.recv() {
            Ok(Ok(sink)) => sink,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(LiveError::Playback("output device thread exited".into()));
            }
        };
        info!("output device ready");
        Ok(Self {
            sink,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
            info!("output device released");
        }
    }
}

/// Playback sink backed by a rodio queue.
///
/// Appended buffers play back-to-back, which realizes the `max(cursor, now)`
/// chaining the scheduler tracks: while audio is queued a new buffer starts
/// at the cursor, and on an empty queue it starts immediately.
pub struct RodioSink {
    device: Arc<OutputDevice>,
}

impl RodioSink {
    pub fn new(device: Arc<OutputDevice>) -> Self {
        Self { device }
    }
}

impl PlaybackSink for RodioSink {
    fn schedule(&self, samples: Vec<f32>, sample_rate: u32, _start_at: f64) -> LiveResult<()> {
        self.device
            .sink
            .append(SamplesBuffer::new(1, sample_rate, samples));
        Ok(())
    }

    fn halt(&self) {
        self.device.sink.stop();
    }
}

/// One scheduled playback unit.
#[derive(Debug, Clone, Copy)]
struct ScheduledUnit {
    start: f64,
    duration: f64,
}

/// Cursor and pending set, updated together under one lock.
#[derive(Debug, Default)]
struct PlaybackState {
    cursor: f64,
    pending: Vec<ScheduledUnit>,
    last_seq: Option<u64>,
}

/// Schedules inbound audio deltas gaplessly and handles interruption.
pub struct PlaybackScheduler {
    clock: Box<dyn OutputClock>,
    sink: Box<dyn PlaybackSink>,
    sample_rate: u32,
    state: Mutex<PlaybackState>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>, clock: Box<dyn OutputClock>, sample_rate: u32) -> Self {
        Self {
            clock,
            sink,
            sample_rate,
            state: Mutex::new(PlaybackState::default()),
        }
    }

    /// Open the default output device and build a scheduler on it.
    pub fn with_default_device(sample_rate: u32) -> LiveResult<Self> {
        let device = Arc::new(OutputDevice::open()?);
        Ok(Self::new(
            Box::new(RodioSink::new(device)),
            Box::new(MonotonicClock::new()),
            sample_rate,
        ))
    }

    /// Decode a base64 PCM delta and schedule it at `max(cursor, now)`.
    ///
    /// `seq` is the receipt-order sequence number; a non-monotonic value is
    /// a protocol violation and the chunk is rejected, never reordered.
    /// Returns the scheduled start time.
    pub fn on_audio_delta(&self, data: &str, seq: u64) -> LiveResult<f64> {
        let bytes = pcm::decode_base64(data)?;
        let samples = pcm::dequantize(&pcm::from_le_bytes(&bytes)?);
        let duration = pcm::duration_secs(samples.len(), self.sample_rate);

        let mut state = self
            .state
            .lock()
            .map_err(|e| LiveError::Playback(format!("playback state lock poisoned: {e}")))?;

        if let Some(last) = state.last_seq {
            if seq <= last {
                return Err(LiveError::Protocol(format!(
                    "audio delta out of sequence: {seq} after {last}"
                )));
            }
        }
        state.last_seq = Some(seq);

        let now = self.clock.now_secs();
        if state.cursor > 0.0 && state.cursor < now && !state.pending.is_empty() {
            debug!(
                "playback underrun: cursor {:.3}s behind device time {:.3}s; re-basing",
                state.cursor, now
            );
        }
        let start = state.cursor.max(now);
        self.sink.schedule(samples, self.sample_rate, start)?;

        // Naturally completed units remove themselves from the pending set.
        state.pending.retain(|u| u.start + u.duration > now);
        state.pending.push(ScheduledUnit { start, duration });
        state.cursor = start + duration;
        Ok(start)
    }

    /// Barge-in: stop every playing or pending source, clear the set, and
    /// reset the cursor so the next chunk starts at the current device time.
    pub fn on_interrupted(&self) {
        let Ok(mut state) = self.state.lock() else {
            warn!("playback state lock poisoned; skipping interruption flush");
            return;
        };
        self.sink.halt();
        let flushed = state.pending.len();
        state.pending.clear();
        state.cursor = 0.0;
        info!("interruption: flushed {flushed} pending sources");
    }

    /// Stop playback during session teardown. Same flush as an interruption.
    pub fn halt(&self) {
        self.on_interrupted();
    }

    /// Number of units currently playing or scheduled.
    pub fn pending_len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Current scheduled-time watermark.
    pub fn cursor(&self) -> f64 {
        self.state.lock().map(|s| s.cursor).unwrap_or(0.0)
    }
}
