//! WebSocket wire envelopes.
//!
//! All messages are JSON. Outbound envelopes are externally tagged by their
//! single top-level field; inbound messages are probed for the fields the
//! engine cares about. Canonical field casing is camelCase.
//!
//! Client envelopes (sent to the provider):
//! - `setup` - model id and requested output modality, sent once on open
//! - `clientContent` - the initial turn carrying conversation instructions
//! - `realtimeInput` - one base64 PCM16 chunk per captured frame
//!
//! Server fields (received):
//! - `setupComplete` - handshake acknowledgement
//! - `serverContent.modelTurn.parts[].inlineData` - base64 PCM16 at 24kHz
//! - `serverContent.turnComplete` - end of the model's utterance
//! - `serverContent.interrupted` - the user started talking over the model

use serde::{Deserialize, Serialize};

use crate::core::audio::pcm;

/// Mime type for outbound capture audio (PCM16 little-endian at 16kHz).
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

// =============================================================================
// Client Envelopes
// =============================================================================

/// Outbound message, serialized as `{ "<variant>": { ... } }`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session setup, sent once immediately after the socket opens.
    Setup(Setup),
    /// Conversation content; used for the initial instructions turn.
    ClientContent(ClientContent),
    /// Streaming capture audio.
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// The one-time `setup` envelope naming the model and requesting audio
    /// output.
    pub fn setup(model: &str, voice: Option<&str>) -> Self {
        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: voice.map(|name| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: name.to_string(),
                        },
                    },
                }),
            },
        })
    }

    /// The initial turn carrying the conversation instructions.
    pub fn initial_turn(instructions: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: vec![TextPart {
                    text: instructions.to_string(),
                }],
            }],
            turn_complete: true,
        })
    }

    /// One captured frame as a base64 PCM16 media chunk.
    pub fn audio_chunk(pcm_bytes: &[u8]) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: CAPTURE_MIME_TYPE.to_string(),
                data: pcm::encode_base64(pcm_bytes),
            }],
        })
    }
}

// =============================================================================
// Server Message
// =============================================================================

/// Inbound message. Unknown fields are ignored; the engine only inspects
/// what it needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl ServerMessage {
    /// Base64 audio payloads in this message, in part order.
    pub fn audio_payloads(&self) -> Vec<&str> {
        self.server_content
            .as_ref()
            .and_then(|c| c.model_turn.as_ref())
            .map(|turn| {
                turn.parts
                    .iter()
                    .filter_map(|p| p.inline_data.as_ref())
                    .filter(|d| d.mime_type.starts_with("audio/pcm"))
                    .map(|d| d.data.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether this message signals the end of the model's turn.
    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.turn_complete)
            .unwrap_or(false)
    }

    /// Whether the model was interrupted by user speech.
    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.interrupted)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_envelope_shape() {
        let msg = ClientMessage::setup("models/test-model", Some("Aoede"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["setup"]["model"], "models/test-model");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
    }

    #[test]
    fn test_setup_without_voice_omits_speech_config() {
        let msg = ClientMessage::setup("models/test-model", None);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["setup"]["generationConfig"]
            .get("speechConfig")
            .is_none());
    }

    #[test]
    fn test_initial_turn_shape() {
        let msg = ClientMessage::initial_turn("You are a helpful assistant.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["clientContent"]["turnComplete"], true);
        assert_eq!(json["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(
            json["clientContent"]["turns"][0]["parts"][0]["text"],
            "You are a helpful assistant."
        );
    }

    #[test]
    fn test_audio_chunk_envelope_shape() {
        let msg = ClientMessage::audio_chunk(&[0, 0, 255, 127]);
        let json = serde_json::to_value(&msg).unwrap();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], CAPTURE_MIME_TYPE);
        assert_eq!(chunk["data"], pcm::encode_base64(&[0, 0, 255, 127]));
    }

    #[test]
    fn test_parse_model_turn_audio() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } }
                    ]
                }
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.audio_payloads(), vec!["AAAA"]);
        assert!(!msg.is_turn_complete());
    }

    #[test]
    fn test_parse_turn_complete() {
        let raw = r#"{ "serverContent": { "turnComplete": true } }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_turn_complete());
        assert!(msg.audio_payloads().is_empty());
    }

    #[test]
    fn test_non_audio_inline_data_ignored() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "image/png", "data": "xxxx" } },
                        { "text": "hello" }
                    ]
                }
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.audio_payloads().is_empty());
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let raw = r#"{ "usageMetadata": { "totalTokens": 10 } }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.server_content.is_none());
    }
}
