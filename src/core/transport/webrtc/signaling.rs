//! SDP signaling over HTTPS.
//!
//! The local SDP offer is POSTed as raw text to the vendor endpoint,
//! authorized by the short-lived client secret minted by the context
//! provider; the response body is the raw SDP answer.

use http::header::CONTENT_TYPE;

use crate::errors::{EngineError, EngineResult};

/// HTTPS client for the SDP offer/answer exchange.
pub struct SignalingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl SignalingClient {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        }
    }

    /// Exchange `offer_sdp` for the remote answer SDP.
    pub async fn exchange(&self, offer_sdp: &str, client_secret: &str) -> EngineResult<String> {
        let url = format!("{}?model={}", self.endpoint, self.model);

        let response = self
            .http
            .post(&url)
            .bearer_auth(client_secret)
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("Signaling request failed: {}", e)))?;

        let status = response.status();
        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            return Err(EngineError::Auth(format!(
                "Signaling endpoint rejected credential ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(EngineError::Network(format!(
                "Signaling endpoint returned {}",
                status
            )));
        }

        let answer = response
            .text()
            .await
            .map_err(|e| EngineError::Network(format!("Failed to read SDP answer: {}", e)))?;

        if !answer.starts_with("v=") {
            return Err(EngineError::Protocol(
                "Signaling response is not an SDP answer".to_string(),
            ));
        }
        Ok(answer)
    }
}
