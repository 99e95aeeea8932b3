use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a call session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStats {
    /// When the session connected
    pub started_at: DateTime<Utc>,

    /// Seconds since the session connected
    pub duration_secs: f64,

    /// Microphone frames sent to the endpoint
    pub frames_sent: u64,

    /// Frames captured while muted and held back
    pub frames_gated: u64,

    /// Synthesized speech chunks scheduled for playback
    pub chunks_played: u64,

    /// Committed transcript entries
    pub transcript_entries: usize,

    /// Whether the microphone is muted
    pub muted: bool,
}
