//! Microphone capture and PCM chunk encoding.
//!
//! The device callback runs on a real-time thread and must never block: each
//! full window is handed off with `try_send` on a bounded channel. A full
//! queue means the consumer missed its budget; the window is dropped and
//! logged, and the session continues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::error::{LiveError, LiveResult};
use crate::pcm;
use crate::wire::{MediaBlob, AUDIO_INPUT_MIME};

/// A window of captured microphone samples.
///
/// Samples are mono f32 in -1.0..1.0 at the wire input rate. `seq` increases
/// monotonically from capture start.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub seq: u64,
}

impl AudioChunk {
    /// Duration of this window in seconds.
    pub fn duration_secs(&self) -> f64 {
        pcm::duration_secs(self.samples.len() / self.channels as usize, self.sample_rate)
    }

    /// Quantize to 16-bit PCM and wrap in the outbound message envelope.
    pub fn encode(&self) -> MediaBlob {
        let bytes = pcm::to_le_bytes(&pcm::quantize(&self.samples));
        MediaBlob {
            mime_type: AUDIO_INPUT_MIME.to_string(),
            data: pcm::encode_base64(&bytes),
        }
    }
}

/// Microphone configuration.
#[derive(Debug, Clone)]
pub struct MicConfig {
    /// Target sample rate in Hz (default 16000).
    pub sample_rate: u32,
    /// Target channel count (default 1, mono).
    pub channels: u16,
    /// Window size in samples per emitted chunk (default 4096).
    pub window: usize,
    /// Bounded chunk queue depth between the device callback and the
    /// forwarding task (default 32).
    pub queue_depth: usize,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            window: 4096,
            queue_depth: 32,
        }
    }
}

/// Audio capture backend.
///
/// The production implementation is [`MicBackend`] on CPAL; tests inject
/// fakes to drive the session lifecycle without hardware.
pub trait CaptureBackend: Send {
    /// Acquire the device and start capturing. Returns the chunk stream;
    /// the stream ends when the backend is stopped or the device dies.
    fn start(&mut self) -> LiveResult<mpsc::Receiver<AudioChunk>>;

    /// Release the device. Idempotent.
    fn stop(&mut self);

    /// Whether the backend currently holds the device.
    fn is_capturing(&self) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Microphone capture via CPAL.
///
/// The stream handle is not `Send` on some platforms, so it lives on a
/// dedicated thread that parks until shutdown; only the chunk channel
/// crosses threads.
pub struct MicBackend {
    config: MicConfig,
    shutdown: Option<Arc<AtomicBool>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MicBackend {
    pub fn new(config: MicConfig) -> Self {
        Self {
            config,
            shutdown: None,
            thread: None,
        }
    }

    /// List available input devices.
    pub fn list_input_devices() -> LiveResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

impl CaptureBackend for MicBackend {
    fn start(&mut self) -> LiveResult<mpsc::Receiver<AudioChunk>> {
        if self.thread.is_some() {
            return Err(LiveError::CaptureFailed("capture already started".into()));
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.queue_depth);
        let (init_tx, init_rx) = std::sync::mpsc::channel::<LiveResult<()>>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let config = self.config.clone();

        let thread = thread::spawn(move || capture_thread(config, chunk_tx, init_tx, flag));

        match init_rx.recv() {
            Ok(Ok(())) => {
                self.shutdown = Some(shutdown);
                self.thread = Some(thread);
                Ok(chunk_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(LiveError::DeviceUnavailable(
                    "capture thread exited during init".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(flag) = self.shutdown.take() {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
            info!("microphone released");
        }
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

impl Drop for MicBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the CPAL stream for its whole life; parks until shutdown or a
/// stream error, then drops it (which releases the device and closes the
/// chunk channel).
fn capture_thread(
    config: MicConfig,
    chunk_tx: mpsc::Sender<AudioChunk>,
    init_tx: std::sync::mpsc::Sender<LiveResult<()>>,
    shutdown: Arc<AtomicBool>,
) {
    let failed = Arc::new(AtomicBool::new(false));
    let stream = match build_input_stream(&config, chunk_tx, failed.clone()) {
        Ok(s) => s,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(e.into()));
        return;
    }
    let _ = init_tx.send(Ok(()));

    while !shutdown.load(Ordering::SeqCst) && !failed.load(Ordering::SeqCst) {
        thread::park_timeout(Duration::from_millis(100));
    }
    if failed.load(Ordering::SeqCst) {
        warn!("input stream failed; capture ends");
    }
    drop(stream);
}

fn build_input_stream(
    config: &MicConfig,
    chunk_tx: mpsc::Sender<AudioChunk>,
    failed: Arc<AtomicBool>,
) -> LiveResult<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LiveError::DeviceUnavailable("no input device available".into()))?;
    info!(
        "using input device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let err_fn = {
        let failed = failed.clone();
        move |err: cpal::StreamError| {
            warn!("input stream error: {err}");
            failed.store(true, Ordering::SeqCst);
        }
    };

    // Prefer the exact wire format; many devices accept it directly.
    let exact = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Default,
    };
    let callback = window_callback(config.window, config.sample_rate, 1, 1, chunk_tx.clone());
    match device.build_input_stream(&exact, callback, err_fn.clone(), None) {
        Ok(stream) => return Ok(stream),
        Err(e) => debug!("exact input config rejected ({e}); falling back to device default"),
    }

    // Fall back to the device default and fold to mono / decimate in the
    // callback.
    let supported = device.default_input_config()?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(LiveError::DeviceUnavailable(format!(
            "unsupported input sample format {:?}",
            supported.sample_format()
        )));
    }
    let native: StreamConfig = supported.into();
    let in_channels = native.channels as usize;
    let ratio = (native.sample_rate.0 / config.sample_rate).max(1) as usize;
    info!(
        "capturing at {} Hz {} ch, converting to {} Hz mono",
        native.sample_rate.0, in_channels, config.sample_rate
    );
    let callback = window_callback(
        config.window,
        config.sample_rate,
        in_channels,
        ratio,
        chunk_tx,
    );
    Ok(device.build_input_stream(&native, callback, err_fn, None)?)
}

/// Build the device callback: fold interleaved input to mono, decimate to
/// the target rate, and emit fixed-size windows without blocking.
fn window_callback(
    window: usize,
    sample_rate: u32,
    in_channels: usize,
    ratio: usize,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> impl FnMut(&[f32], &cpal::InputCallbackInfo) {
    let mut mono: Vec<f32> = Vec::with_capacity(window * 2);
    let mut phase = 0usize;
    let mut seq = 0u64;
    move |data: &[f32], _: &cpal::InputCallbackInfo| {
        downmix_decimate(data, in_channels, ratio, &mut phase, &mut mono);
        while mono.len() >= window {
            let samples: Vec<f32> = mono.drain(..window).collect();
            let chunk = AudioChunk {
                samples,
                sample_rate,
                channels: 1,
                seq,
            };
            seq += 1;
            match chunk_tx.try_send(chunk) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("capture queue full; dropping one window");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }
}

/// Fold interleaved frames to mono by averaging channels, keeping every
/// `ratio`-th frame.
fn downmix_decimate(
    data: &[f32],
    channels: usize,
    ratio: usize,
    phase: &mut usize,
    out: &mut Vec<f32>,
) {
    for frame in data.chunks_exact(channels) {
        if *phase == 0 {
            let sum: f32 = frame.iter().sum();
            out.push(sum / channels as f32);
        }
        *phase = (*phase + 1) % ratio;
    }
}
