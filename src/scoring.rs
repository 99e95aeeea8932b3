//! Hand-off to the external scoring service.
//!
//! The call core only sends the transcript, duration and recording and keeps
//! whatever JSON comes back as an opaque score.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ScoringConfig;
use crate::error::{CallError, CallResult};
use crate::session::TranscriptEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub call_id: String,
    pub transcript: Vec<TranscriptEntry>,
    pub duration_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_base64: Option<String>,
}

#[async_trait::async_trait]
pub trait ScoringClient: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> CallResult<serde_json::Value>;
}

/// Posts the request as JSON to a configured URL
pub struct HttpScoringClient {
    url: String,
    client: reqwest::Client,
}

impl HttpScoringClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }

    /// `None` when no scoring URL is configured
    pub fn from_config(config: &ScoringConfig) -> Option<Self> {
        let url = config.url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self::new(url, Duration::from_secs(config.timeout_secs.max(1))))
    }
}

#[async_trait::async_trait]
impl ScoringClient for HttpScoringClient {
    async fn score(&self, request: &ScoreRequest) -> CallResult<serde_json::Value> {
        info!(
            "Submitting call {} for scoring ({} entries, {}s)",
            request.call_id,
            request.transcript.len(),
            request.duration_seconds
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| CallError::Scoring(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Scoring service returned {}: {}", status, body);
            return Err(CallError::Scoring(format!("HTTP {}", status)));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| CallError::Scoring(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use chrono::Utc;

    #[test]
    fn test_request_uses_camel_case() {
        let request = ScoreRequest {
            call_id: "call-1".to_string(),
            transcript: vec![TranscriptEntry {
                role: Role::User,
                content: "Hi".to_string(),
                timestamp: Utc::now(),
            }],
            duration_seconds: 42,
            recording_base64: Some("UklGRg==".to_string()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["callId"], "call-1");
        assert_eq!(json["durationSeconds"], 42);
        assert_eq!(json["recordingBase64"], "UklGRg==");
        assert_eq!(json["transcript"][0]["role"], "user");
    }

    #[test]
    fn test_no_client_without_url() {
        assert!(HttpScoringClient::from_config(&ScoringConfig::default()).is_none());
        let config = ScoringConfig {
            url: Some("http://127.0.0.1:9/score".to_string()),
            timeout_secs: 5,
        };
        assert!(HttpScoringClient::from_config(&config).is_some());
    }
}
