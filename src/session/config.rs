use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::voice::{Persona, VoiceId};
use crate::config::Config;
use crate::config::DEFAULT_MODEL;

/// Per-call session settings, fixed when the call is placed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Call record identifier supplied by the caller (e.g., "call-2026-10-18-steve")
    pub call_id: String,

    /// Persona system instruction sent in the setup message
    pub instruction: String,

    /// Prebuilt voice for the assistant
    pub voice: VoiceId,

    /// Model name sent in the setup message
    pub model: String,

    /// Rate of outbound microphone audio (endpoint expects 16kHz)
    pub send_sample_rate: u32,

    /// Rate of inbound synthesized speech (endpoint sends 24kHz)
    pub receive_sample_rate: u32,

    /// How often the local recorder rotates chunks
    pub recording_flush: Duration,

    /// Microphone muted before the session came up
    #[serde(default)]
    pub start_muted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_id: format!("call-{}", uuid::Uuid::new_v4()),
            instruction: String::new(),
            voice: VoiceId::Puck,
            model: DEFAULT_MODEL.to_string(),
            send_sample_rate: 16000,
            receive_sample_rate: 24000,
            recording_flush: Duration::from_secs(1),
            start_muted: false,
        }
    }
}

impl SessionConfig {
    pub fn for_call(call_id: impl Into<String>, persona: &Persona, config: &Config) -> Self {
        Self {
            call_id: call_id.into(),
            instruction: persona.instruction.clone(),
            voice: persona.voice_selection().voice(),
            model: config.endpoint.model.clone(),
            send_sample_rate: config.audio.send_sample_rate,
            receive_sample_rate: config.audio.receive_sample_rate,
            recording_flush: Duration::from_millis(config.audio.recording_flush_ms.max(1)),
            start_muted: false,
        }
    }
}
