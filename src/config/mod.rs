//! Engine configuration.
//!
//! Configuration is environment-driven with sensible defaults, so the engine
//! can be constructed from a bare `.env` file. All variables are prefixed
//! with `HOMEVOICE_` except the provider API key, which also honors the
//! conventional `GEMINI_API_KEY`.
//!
//! # Example
//!
//! ```rust,no_run
//! use homevoice_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_env();
//! println!("context endpoint: {}", config.context_endpoint);
//! ```

use serde::{Deserialize, Serialize};

use crate::core::transport::TransportKind;

/// Capture sample rate in Hz (mono, PCM-framing path).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Playback sample rate in Hz (provider output).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Fixed capture block size in samples, bounding per-callback latency
/// (512 samples = 32ms at 16kHz).
pub const CAPTURE_BLOCK_SIZE: usize = 512;

/// Configuration for the voice session engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Context provider endpoint, called with `{ propertyId }` to obtain the
    /// system prompt and (for the WebRTC path) an ephemeral client secret.
    pub context_endpoint: String,

    /// WebSocket provider endpoint. The API key is appended as a `key` query
    /// parameter on connect.
    pub ws_endpoint: String,

    /// API key for the WebSocket path. Not required for the WebRTC path,
    /// which is authorized by the ephemeral client secret from the context
    /// provider.
    #[serde(default)]
    pub ws_api_key: Option<String>,

    /// Model id sent in the WebSocket `setup` envelope.
    pub ws_model: String,

    /// HTTPS signaling endpoint for the WebRTC path. The SDP offer is POSTed
    /// here as raw text, bearer-authenticated with the ephemeral credential.
    pub signaling_endpoint: String,

    /// Model requested from the WebRTC signaling endpoint.
    pub webrtc_model: String,

    /// Default voice id, overridable per session by the context provider.
    #[serde(default)]
    pub voice: Option<String>,

    /// Which transport variant to use.
    #[serde(default)]
    pub transport: TransportKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_endpoint: "http://localhost:3000/api/voice-context".to_string(),
            ws_endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent".to_string(),
            ws_api_key: None,
            ws_model: "models/gemini-2.0-flash-exp".to_string(),
            signaling_endpoint: "https://api.openai.com/v1/realtime".to_string(),
            webrtc_model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            voice: None,
            transport: TransportKind::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. Call `dotenvy::dotenv()` first if a
    /// `.env` file should be honored.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let transport = match std::env::var("HOMEVOICE_TRANSPORT").ok().as_deref() {
            Some("webrtc") => TransportKind::WebRtc,
            Some("websocket") => TransportKind::WebSocket,
            Some(other) => {
                tracing::warn!("Unknown HOMEVOICE_TRANSPORT '{}', using default", other);
                TransportKind::default()
            }
            None => TransportKind::default(),
        };

        Self {
            context_endpoint: std::env::var("HOMEVOICE_CONTEXT_URL")
                .unwrap_or(defaults.context_endpoint),
            ws_endpoint: std::env::var("HOMEVOICE_WS_URL").unwrap_or(defaults.ws_endpoint),
            ws_api_key: std::env::var("HOMEVOICE_API_KEY")
                .or_else(|_| std::env::var("GEMINI_API_KEY"))
                .ok(),
            ws_model: std::env::var("HOMEVOICE_WS_MODEL").unwrap_or(defaults.ws_model),
            signaling_endpoint: std::env::var("HOMEVOICE_SDP_URL")
                .unwrap_or(defaults.signaling_endpoint),
            webrtc_model: std::env::var("HOMEVOICE_WEBRTC_MODEL")
                .unwrap_or(defaults.webrtc_model),
            voice: std::env::var("HOMEVOICE_VOICE").ok(),
            transport,
        }
    }
}
