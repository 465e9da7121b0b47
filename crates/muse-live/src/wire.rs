//! Wire envelope for the bidirectional live API.
//!
//! Client to server: one `setup` message at connection open, then an
//! unbounded sequence of `realtimeInput` media chunks. Server to client:
//! `setupComplete` once, then `serverContent` messages carrying audio deltas,
//! transcript deltas, and the interruption flag. Unknown fields are ignored.

use serde::{Deserialize, Serialize};

use crate::config::SessionOptions;

/// WebSocket endpoint of the live API.
pub const LIVE_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// MIME tag for upstream microphone PCM.
pub const AUDIO_INPUT_MIME: &str = "pcm;rate=16000";

/// MIME tag for upstream camera frames.
pub const FRAME_MIME: &str = "image/jpeg";

/// A base64-encoded media payload plus its MIME tag.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

// ---------- client -> server ----------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupEnvelope {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
pub struct Part {
    pub text: String,
}

/// Empty config object: presence alone enables the transcript echo.
#[derive(Debug, Serialize, Default)]
pub struct TranscriptionConfig {}

impl SetupEnvelope {
    /// Build the connection-open request from session options.
    pub fn from_options(options: &SessionOptions) -> Self {
        let transcription = |enabled: bool| enabled.then(TranscriptionConfig::default);
        Self {
            setup: Setup {
                model: options.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: options.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Some(Content {
                    parts: vec![Part {
                        text: options.system_instruction.clone(),
                    }],
                }),
                input_audio_transcription: transcription(options.input_transcription),
                output_audio_transcription: transcription(options.output_transcription),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputEnvelope {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

impl RealtimeInputEnvelope {
    pub fn single(blob: MediaBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![blob],
            },
        }
    }
}

// ---------- server -> client ----------

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SetupComplete {}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub interrupted: bool,
    pub turn_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerPart {
    pub inline_data: Option<MediaBlob>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerError {
    pub code: i64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_envelope_carries_voice_and_instruction() {
        let opts = SessionOptions::mentor();
        let json = serde_json::to_value(SetupEnvelope::from_options(&opts)).unwrap();
        assert_eq!(json["setup"]["model"], opts.model.as_str());
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn disabled_transcription_is_omitted() {
        let opts = SessionOptions::tour_guide();
        let json = serde_json::to_value(SetupEnvelope::from_options(&opts)).unwrap();
        assert!(json["setup"].get("inputAudioTranscription").is_none());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn realtime_input_envelope_shape() {
        let blob = MediaBlob {
            mime_type: AUDIO_INPUT_MIME.to_string(),
            data: "AAAA".to_string(),
        };
        let json = serde_json::to_value(RealtimeInputEnvelope::single(blob)).unwrap();
        assert_eq!(
            json["realtimeInput"]["mediaChunks"][0]["mimeType"],
            AUDIO_INPUT_MIME
        );
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AAAA");
    }

    #[test]
    fn server_message_audio_delta_parses() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": { "parts": [ { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "UklGRg==" } } ] },
                "interrupted": false
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let content = msg.server_content.unwrap();
        let turn = content.model_turn.unwrap();
        assert_eq!(turn.parts.len(), 1);
        assert_eq!(
            turn.parts[0].inline_data.as_ref().unwrap().data,
            "UklGRg=="
        );
        assert!(!content.interrupted);
    }

    #[test]
    fn unknown_message_kinds_parse_to_empty() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"toolCall": {"functionCalls": []}}"#).unwrap();
        assert!(msg.setup_complete.is_none());
        assert!(msg.server_content.is_none());
        assert!(msg.error.is_none());
    }
}
