//! Speaker-tagged transcript reconstruction.
//!
//! Assistant text arrives as fragments over a turn and is committed once when
//! the turn completes. A turn can carry the same words twice, as model text
//! parts and as a transcription of the model's audio; model text wins and the
//! transcription is only used when the turn had no text parts. User entries commit immediately. Entries are
//! append-only and their timestamps never go backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    entries: Vec<TranscriptEntry>,
    pending_assistant: String,
    pending_transcription: String,
    speaker: Option<Role>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a model text fragment of the assistant's current turn
    pub fn push_assistant_fragment(&mut self, text: &str) {
        self.pending_assistant.push_str(text);
        self.speaker = Some(Role::Assistant);
    }

    /// Append a transcription fragment of the assistant's spoken audio
    pub fn push_assistant_transcription(&mut self, text: &str) {
        self.pending_transcription.push_str(text);
        self.speaker = Some(Role::Assistant);
    }

    /// Close the assistant turn; commits one entry unless the turn was blank
    pub fn complete_turn(&mut self) -> Option<&TranscriptEntry> {
        let text = std::mem::take(&mut self.pending_assistant);
        let transcription = std::mem::take(&mut self.pending_transcription);
        self.speaker = None;
        let content = if text.trim().is_empty() { transcription } else { text };
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        self.commit_at(Role::Assistant, content.to_string(), Utc::now());
        self.entries.last()
    }

    /// Commit a user utterance immediately
    pub fn commit_user(&mut self, text: &str) -> Option<&TranscriptEntry> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        self.commit_at(Role::User, content.to_string(), Utc::now());
        self.entries.last()
    }

    /// Update who is speaking; not part of the transcript
    pub fn set_speaker(&mut self, speaker: Option<Role>) {
        self.speaker = speaker;
    }

    pub fn current_speaker(&self) -> Option<Role> {
        self.speaker
    }

    /// Text of an assistant turn still in progress
    pub fn pending(&self) -> &str {
        if self.pending_assistant.trim().is_empty() {
            &self.pending_transcription
        } else {
            &self.pending_assistant
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    fn commit_at(&mut self, role: Role, content: String, at: DateTime<Utc>) {
        // Wall clock can step backwards; entries must not
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > at => last.timestamp,
            _ => at,
        };
        debug!("Transcript {:?}: {}", role, content);
        self.entries.push(TranscriptEntry {
            role,
            content,
            timestamp,
        });
    }
}
