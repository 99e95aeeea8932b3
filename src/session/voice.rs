//! Prebuilt voices and persona definitions

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Prebuilt voices offered by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoiceId {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl VoiceId {
    pub const ALL: [VoiceId; 8] = [
        VoiceId::Puck,
        VoiceId::Charon,
        VoiceId::Kore,
        VoiceId::Fenrir,
        VoiceId::Aoede,
        VoiceId::Leda,
        VoiceId::Orus,
        VoiceId::Zephyr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VoiceId::Puck => "Puck",
            VoiceId::Charon => "Charon",
            VoiceId::Kore => "Kore",
            VoiceId::Fenrir => "Fenrir",
            VoiceId::Aoede => "Aoede",
            VoiceId::Leda => "Leda",
            VoiceId::Orus => "Orus",
            VoiceId::Zephyr => "Zephyr",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            VoiceId::Puck => "upbeat, conversational",
            VoiceId::Charon => "deep, measured",
            VoiceId::Kore => "firm, neutral",
            VoiceId::Fenrir => "excitable, fast",
            VoiceId::Aoede => "bright, breezy",
            VoiceId::Leda => "youthful, warm",
            VoiceId::Orus => "firm, low",
            VoiceId::Zephyr => "bright, light",
        }
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VoiceId::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown voice '{}'", s))
    }
}

/// The voice a call will use and where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSelection {
    /// Set on the persona or by the caller
    Explicit(VoiceId),
    /// Guessed from the persona's name
    Inferred(VoiceId),
}

/// Persona names seeded before voices were configurable
const LEGACY_NAME_VOICES: &[(&str, VoiceId)] = &[
    ("steve", VoiceId::Charon),
    ("frank", VoiceId::Fenrir),
    ("mike", VoiceId::Orus),
    ("james", VoiceId::Charon),
    ("sarah", VoiceId::Kore),
    ("linda", VoiceId::Aoede),
    ("karen", VoiceId::Kore),
    ("emily", VoiceId::Leda),
    ("jessica", VoiceId::Zephyr),
];

impl VoiceSelection {
    pub fn resolve(explicit: Option<VoiceId>, persona_name: &str) -> Self {
        match explicit {
            Some(voice) => VoiceSelection::Explicit(voice),
            None => VoiceSelection::Inferred(infer_voice(persona_name)),
        }
    }

    pub fn voice(self) -> VoiceId {
        match self {
            VoiceSelection::Explicit(v) | VoiceSelection::Inferred(v) => v,
        }
    }
}

fn infer_voice(persona_name: &str) -> VoiceId {
    let name = persona_name.to_lowercase();
    name.split(|c: char| !c.is_alphanumeric())
        .find_map(|word| {
            LEGACY_NAME_VOICES
                .iter()
                .find(|(legacy, _)| *legacy == word)
                .map(|(_, voice)| *voice)
        })
        .unwrap_or(VoiceId::Puck)
}

/// AI prospect the user is calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    /// System instruction describing who the prospect is and how they behave
    pub instruction: String,
    #[serde(default)]
    pub voice: Option<VoiceId>,
}

impl Persona {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read persona file: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid persona file: {}", path.display()))
    }

    pub fn voice_selection(&self) -> VoiceSelection {
        VoiceSelection::resolve(self.voice, &self.name)
    }
}
