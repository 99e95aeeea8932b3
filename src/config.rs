use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::{CallError, CallResult};

/// Default hosted endpoint for the live generative-audio model
pub const DEFAULT_ENDPOINT_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub endpoint: EndpointConfig,
    pub audio: AudioConfig,
    pub call: CallConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "callsim".to_string(),
        }
    }
}

/// Remote voice endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: Some(DEFAULT_ENDPOINT_URL.to_string()),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl EndpointConfig {
    /// Check that both URL and credential are present
    pub fn validate(&self) -> CallResult<()> {
        match self.url.as_deref() {
            Some(url) if !url.trim().is_empty() => {}
            _ => return Err(CallError::ConfigurationMissing("endpoint.url".to_string())),
        }
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(CallError::ConfigurationMissing("endpoint.api_key".to_string())),
        }
    }

    /// Full socket URL with the credential attached as a query parameter
    pub fn socket_url(&self) -> CallResult<String> {
        self.validate()?;
        let url = self.url.as_deref().unwrap_or_default().trim();
        let key = self.api_key.as_deref().unwrap_or_default().trim();
        let separator = if url.contains('?') { '&' } else { '?' };
        Ok(format!("{url}{separator}key={key}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate sent to the endpoint (Hz)
    pub send_sample_rate: u32,
    /// Rate of synthesized speech received (Hz)
    pub receive_sample_rate: u32,
    /// Samples per outbound frame
    pub quantum_samples: usize,
    /// Recorder chunk flush interval
    pub recording_flush_ms: u64,
    /// Capacity of the capture -> transport channel (frames)
    pub channel_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            send_sample_rate: 16000,
            receive_sample_rate: 24000,
            quantum_samples: 128,
            recording_flush_ms: 1000,
            channel_capacity: 512,
        }
    }
}

/// Call lifecycle timings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long the ring tone plays before connecting; 0 connects immediately
    pub ring_duration_ms: u64,
    /// Delay between connecting and the synthetic "answer the phone" turn
    pub answer_delay_ms: u64,
    pub answer_text: String,
    /// Whether the answer turn appears in the transcript as a user entry
    pub record_answer_turn: bool,
    /// Hard cap after which the call is hung up automatically
    pub max_duration_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_duration_ms: 3000,
            answer_delay_ms: 500,
            answer_text: "[The phone rings. Pick up and answer it the way you normally would.]"
                .to_string(),
            record_answer_turn: false,
            max_duration_secs: 600,
        }
    }
}

/// External scoring endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load from an optional config file plus `CALLSIM_*` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CALLSIM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }
}
