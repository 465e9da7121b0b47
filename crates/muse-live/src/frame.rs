//! Periodic camera frame sampling for vision sessions.
//!
//! Frames ride the same outbound path as audio on a much coarser cadence.
//! The protocol does not require frame/audio synchronization, and frame loss
//! is tolerable: a tick with no frame available is a no-op.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pcm;
use crate::wire::{MediaBlob, FRAME_MIME};

/// Standard frame resolution sent upstream (width, height).
pub const FRAME_SIZE: (u32, u32) = (640, 480);

/// JPEG quality factor for upstream frames.
pub const FRAME_QUALITY: f32 = 0.5;

/// A captured camera frame, already JPEG-encoded.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub jpeg: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl FrameSample {
    pub fn new(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            timestamp: Utc::now(),
        }
    }

    /// Wrap the JPEG bytes in the outbound message envelope.
    pub fn encode(&self) -> MediaBlob {
        MediaBlob {
            mime_type: FRAME_MIME.to_string(),
            data: pcm::encode_base64(&self.jpeg),
        }
    }
}

/// Source of camera frames.
///
/// Implementations downscale to [`FRAME_SIZE`] and JPEG-encode at
/// [`FRAME_QUALITY`]. `grab` returns `None` while the camera has no frame
/// ready (e.g. still warming up); that is not an error.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Option<FrameSample>;
}

/// Samples frames from a [`FrameSource`] on a fixed timer.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    interval: Duration,
}

impl FrameSampler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Start the sampling timer. The first tick fires one full period after
    /// start. The task ends when the outbound channel closes or the handle
    /// is aborted.
    pub fn spawn(
        self,
        mut source: Box<dyn FrameSource>,
        out: mpsc::Sender<MediaBlob>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            info!("frame sampler started ({:?} period)", self.interval);
            loop {
                ticker.tick().await;
                match source.grab() {
                    Some(frame) => {
                        if out.send(frame.encode()).await.is_err() {
                            break;
                        }
                    }
                    None => debug!("no camera frame ready; skipping tick"),
                }
            }
            info!("frame sampler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        grabbed: usize,
    }

    impl FrameSource for CountingSource {
        fn grab(&mut self) -> Option<FrameSample> {
            self.grabbed += 1;
            Some(FrameSample::new(vec![0xFF, 0xD8, self.grabbed as u8]))
        }
    }

    struct EmptySource;

    impl FrameSource for EmptySource {
        fn grab(&mut self) -> Option<FrameSample> {
            None
        }
    }

    #[test]
    fn frame_encodes_as_jpeg_blob() {
        let frame = FrameSample::new(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let blob = frame.encode();
        assert_eq!(blob.mime_type, FRAME_MIME);
        assert_eq!(pcm::decode_base64(&blob.data).unwrap(), frame.jpeg);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_exactly_three_frames_in_4_6_seconds() {
        let (tx, mut rx) = mpsc::channel(16);
        let sampler = FrameSampler::new(Duration::from_millis(1500));
        let handle = sampler.spawn(Box::new(CountingSource { grabbed: 0 }), tx);

        // Advance simulated time in small steps so every tick is observed.
        for _ in 0..46 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
        }

        handle.abort();
        let mut frames = 0;
        while rx.try_recv().is_ok() {
            frames += 1;
        }
        assert_eq!(frames, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_frames_are_skipped_not_fatal() {
        let (tx, mut rx) = mpsc::channel(16);
        let sampler = FrameSampler::new(Duration::from_millis(1500));
        let handle = sampler.spawn(Box::new(EmptySource), tx);

        for _ in 0..46 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
        }

        assert!(rx.try_recv().is_err());
        assert!(!handle.is_finished());
        handle.abort();
    }
}
