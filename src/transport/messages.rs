//! Wire messages exchanged with the live voice endpoint.
//!
//! Outbound messages are typed serde structs. Inbound messages carry no type
//! tag, so `decode_server_message` inspects which known fields are present
//! and turns them into a closed list of `ServerEvent`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallError, CallResult};
use crate::session::VoiceId;

// ============================================================================
// Outbound
// ============================================================================

/// First message on every connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: VoiceId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    pub fn new(model: impl Into<String>, voice: VoiceId, persona_instruction: impl Into<String>) -> Self {
        Self {
            setup: Setup {
                model: model.into(),
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio, Modality::Text],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
                        },
                    },
                },
                system_instruction: Content {
                    role: None,
                    parts: vec![TextPart {
                        text: persona_instruction.into(),
                    }],
                },
                input_audio_transcription: Some(Value::Object(Default::default())),
                output_audio_transcription: Some(Value::Object(Default::default())),
            },
        }
    }
}

/// One capture quantum of microphone audio
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded little-endian PCM
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn pcm(sample_rate: u32, data: String) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: pcm_mime_type(sample_rate),
                    data,
                }],
            },
        }
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// A complete user turn sent as text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentMessage {
    pub client_content: ClientContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientContentMessage {
    pub fn user_turn(text: impl Into<String>) -> Self {
        Self {
            client_content: ClientContent {
                turns: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![TextPart { text: text.into() }],
                }],
                turn_complete: true,
            },
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// One piece of the assistant's current turn
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// Base64 PCM at the receive rate
    Audio { data: String, mime_type: Option<String> },
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySpeaker {
    User,
    Assistant,
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    ModelContent(Vec<ContentPart>),
    TurnComplete,
    SpeechActivity { speaker: ActivitySpeaker, active: bool },
    InputTranscript(String),
    /// Transcription of the assistant's own audio
    OutputTranscript(String),
    /// The user barged in; the assistant's current turn was cut off
    Interrupted,
    Unrecognized,
}

/// Decode one text frame into events, in priority order.
///
/// A single frame may carry several signals (content parts and turn-complete
/// often arrive together); each becomes its own event. Valid JSON with no
/// known field yields `[Unrecognized]`; invalid JSON is a `Parse` error.
pub fn decode_server_message(text: &str) -> CallResult<Vec<ServerEvent>> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(CallError::Parse(format!("expected JSON object, got {}", kind_of(&value))));
    }

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    let content = value.get("serverContent");

    if let Some(parts) = content
        .and_then(|c| c.get("modelTurn"))
        .and_then(|t| t.get("parts"))
        .and_then(Value::as_array)
    {
        let decoded: Vec<ContentPart> = parts.iter().filter_map(decode_part).collect();
        if !decoded.is_empty() {
            events.push(ServerEvent::ModelContent(decoded));
        }
    }

    if let Some(text) = content
        .and_then(|c| c.get("outputTranscription"))
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
    {
        events.push(ServerEvent::OutputTranscript(text.to_string()));
    }

    if content
        .and_then(|c| c.get("turnComplete"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        events.push(ServerEvent::TurnComplete);
    }

    if let Some(activity) = value
        .get("voiceActivity")
        .and_then(|a| a.get("voiceActivityType"))
        .and_then(Value::as_str)
    {
        match activity {
            "ACTIVITY_START" => events.push(ServerEvent::SpeechActivity {
                speaker: ActivitySpeaker::User,
                active: true,
            }),
            "ACTIVITY_END" => events.push(ServerEvent::SpeechActivity {
                speaker: ActivitySpeaker::User,
                active: false,
            }),
            _ => {}
        }
    }

    if content
        .and_then(|c| c.get("interrupted"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        events.push(ServerEvent::Interrupted);
    }

    if let Some(text) = content
        .and_then(|c| c.get("inputTranscription"))
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
    {
        events.push(ServerEvent::InputTranscript(text.to_string()));
    }

    if events.is_empty() {
        events.push(ServerEvent::Unrecognized);
    }

    Ok(events)
}

fn decode_part(part: &Value) -> Option<ContentPart> {
    if let Some(inline) = part.get("inlineData") {
        let data = inline.get("data").and_then(Value::as_str)?;
        let mime_type = inline
            .get("mimeType")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Some(ContentPart::Audio {
            data: data.to_string(),
            mime_type,
        });
    }
    part.get("text")
        .and_then(Value::as_str)
        .map(|t| ContentPart::Text(t.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
