//! Context provider boundary.
//!
//! The engine never builds the system prompt itself. It asks an HTTP
//! endpoint with `{ "propertyId": ... }` and receives the conversation
//! instructions plus, for the WebRTC path, an ephemeral client secret. A
//! missing `systemPrompt` falls back to a generic instruction string and is
//! never a hard failure; a missing `clientSecret` is tolerated here (the
//! WebSocket path supplies its own credential) and only rejected by the
//! transport that needs it.

use serde::{Deserialize, Serialize};

use crate::core::transport::SessionContext;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextRequest<'a> {
    property_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContextResponse {
    system_prompt: Option<String>,
    client_secret: Option<String>,
    voice_id: Option<String>,
}

/// HTTP client for the context provider endpoint.
pub struct ContextClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ContextClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Fetch the session context for a property.
    pub async fn fetch(&self, property_id: &str) -> EngineResult<SessionContext> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ContextRequest { property_id })
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("Context fetch failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Network(format!(
                "Context provider returned {}",
                status
            )));
        }

        let body: ContextResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("Invalid context response: {}", e)))?;

        let instructions = match body.system_prompt {
            Some(prompt) if !prompt.trim().is_empty() => prompt,
            _ => {
                tracing::warn!(
                    "Context provider returned no system prompt for property {}, using fallback",
                    property_id
                );
                SessionContext::fallback_instructions(property_id)
            }
        };

        Ok(SessionContext {
            property_id: property_id.to_string(),
            instructions,
            client_secret: body.client_secret,
            voice: body.voice_id,
        })
    }
}
