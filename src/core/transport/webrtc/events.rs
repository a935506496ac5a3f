//! Data-channel event types.
//!
//! Control and turn-taking signals for the WebRTC variant travel over an
//! ancillary data channel as JSON messages tagged by `type`, e.g.
//! `input_audio_buffer.speech_started`. Audio itself never crosses the data
//! channel; it flows on the media tracks.

use serde::{Deserialize, Serialize};

/// Label of the control/events data channel.
pub const EVENTS_CHANNEL_LABEL: &str = "oai-events";

// =============================================================================
// Client Events
// =============================================================================

/// Events sent to the provider over the data channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update the session configuration; used once after the channel opens
    /// to install the conversation instructions.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl ClientEvent {
    pub fn session_update(instructions: &str, voice: Option<&str>) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionUpdate {
                instructions: Some(instructions.to_string()),
                voice: voice.map(str::to_string),
            },
        }
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Events received from the provider over the data channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The provider's VAD detected the user starting to speak.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// The provider's VAD detected the user's utterance ending.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// The model finished its reply turn.
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Provider-reported error.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    /// Any event the engine does not act on.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_shape() {
        let event = ClientEvent::session_update("Talk about the house.", Some("verse"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["instructions"], "Talk about the house.");
        assert_eq!(json["session"]["voice"], "verse");
    }

    #[test]
    fn test_parse_speech_events() {
        let started: ServerEvent =
            serde_json::from_str(r#"{"type":"input_audio_buffer.speech_started"}"#).unwrap();
        assert!(matches!(started, ServerEvent::SpeechStarted));

        let stopped: ServerEvent =
            serde_json::from_str(r#"{"type":"input_audio_buffer.speech_stopped"}"#).unwrap();
        assert!(matches!(stopped, ServerEvent::SpeechStopped));
    }

    #[test]
    fn test_parse_error_event() {
        let raw = r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.error_type, "invalid_request_error");
                assert_eq!(error.message, "bad");
            }
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_maps_to_other() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"response.audio_transcript.delta"}"#).unwrap();
        assert!(matches!(event, ServerEvent::Other));
    }
}
