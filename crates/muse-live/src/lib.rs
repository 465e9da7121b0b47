//! # Muse Live - Real-time multimodal streaming sessions
//!
//! This crate implements a live voice (and optionally vision) conversation
//! engine: microphone audio is captured, encoded to 16 kHz PCM, and streamed
//! over a bidirectional connection to a conversational AI service; the
//! synthesized 24 kHz audio coming back is scheduled gaplessly on the output
//! device, with immediate barge-in when the service signals that the user
//! spoke over a response.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Live Session                          │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐    │
//! │  │  Microphone  │ → │ PCM Encoder  │ → │              │    │
//! │  │    (cpal)    │   │ (16k base64) │   │  Streaming   │    │
//! │  └──────────────┘   └──────────────┘   │   Client     │ ⇄ remote
//! │  ┌──────────────┐   ┌──────────────┐   │ (websocket)  │    │
//! │  │ Frame Timer  │ → │ JPEG frames  │ → │              │    │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘    │
//! │         ↓                                     ↓             │
//! │  ┌──────────────┐    Interruption     ┌──────────────┐     │
//! │  │  Audio Out   │ ←─────────────────── │   Playback   │     │
//! │  │   (rodio)    │     Kill Signal     │  Scheduler   │     │
//! │  └──────────────┘                     └──────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod pcm;
pub mod playback;
pub mod session;
pub mod transcript;
pub mod wire;

pub use capture::{AudioChunk, CaptureBackend, MicBackend, MicConfig};
pub use client::{LiveClient, LiveEvent};
pub use config::{SessionMode, SessionOptions};
pub use error::{LiveError, LiveResult};
pub use frame::{FrameSample, FrameSampler, FrameSource};
pub use playback::{
    MonotonicClock, OutputClock, OutputDevice, PlaybackScheduler, PlaybackSink, RodioSink,
};
pub use session::{LiveSession, SessionEvent, SessionState};
pub use transcript::{Speaker, TranscriptLine, TranscriptLog};
pub use wire::{MediaBlob, AUDIO_INPUT_MIME, FRAME_MIME, LIVE_WS_URL};
