//! Session options and presets.

use std::time::Duration;

use crate::wire::LIVE_WS_URL;

/// Which media kinds the session streams upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Microphone only.
    AudioOnly,
    /// Microphone plus periodic camera frames.
    AudioVision,
}

/// Options for a live session.
///
/// The sample rates are fixed by the wire protocol (16 kHz PCM upstream,
/// 24 kHz PCM downstream, mono); they are carried here so the capture and
/// playback pipelines share one source of truth.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Target model identifier.
    pub model: String,
    /// WebSocket endpoint of the live API.
    pub endpoint: String,
    /// Prebuilt voice name for synthesized output.
    pub voice: String,
    /// System instruction text sent at connection open.
    pub system_instruction: String,
    /// Ask the service to echo back a transcript of the user's speech.
    pub input_transcription: bool,
    /// Ask the service to echo back a transcript of the model's speech.
    pub output_transcription: bool,
    /// Upstream media kinds.
    pub mode: SessionMode,
    /// Period of the camera frame sampler (vision mode). Policy, not a
    /// protocol requirement; the service tolerates frame jitter.
    pub frame_interval: Duration,
    /// Capture window in samples per emitted chunk (default 4096).
    pub capture_window: usize,
    /// Microphone sample rate in Hz (fixed 16000).
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz (fixed 24000).
    pub output_sample_rate: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            endpoint: LIVE_WS_URL.to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "You are a helpful voice assistant. Keep responses concise and conversational.".to_string(),
            input_transcription: true,
            output_transcription: true,
            mode: SessionMode::AudioOnly,
            frame_interval: Duration::from_millis(1500),
            capture_window: 4096,
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
        }
    }
}

impl SessionOptions {
    /// Audio-only conversation preset: a supportive creative mentor with
    /// both transcripts echoed back for display.
    pub fn mentor() -> Self {
        Self {
            voice: "Zephyr".to_string(),
            system_instruction: "You are a supportive and conversational creative mentor.".to_string(),
            input_transcription: true,
            output_transcription: true,
            mode: SessionMode::AudioOnly,
            ..Default::default()
        }
    }

    /// Vision preset: the session streams camera frames alongside audio and
    /// the model narrates what it sees, tour-guide style.
    pub fn tour_guide() -> Self {
        Self {
            voice: "Kore".to_string(),
            system_instruction: "You are a world-class AI tour guide who can see the world through the user's camera in real time. When you see an artifact, sight, or landmark, narrate it vividly and knowledgeably, like a human guide would: history, art, anecdotes. The user may interrupt you with questions at any time; respond warmly. If the scene is too dark or unclear, tell the user.".to_string(),
            input_transcription: false,
            output_transcription: true,
            mode: SessionMode::AudioVision,
            ..Default::default()
        }
    }

    /// Whether this session samples camera frames.
    pub fn wants_frames(&self) -> bool {
        self.mode == SessionMode::AudioVision
    }
}
