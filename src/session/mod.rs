//! Call session management
//!
//! This module provides:
//! - `Session`: one live call (transport, capture, playback, transcript, recording)
//! - `CallController`: the lifecycle driver that owns the session
//! - Transcript reconstruction, call state, and voice/persona selection

mod config;
mod controller;
mod session;
mod state;
mod stats;
mod transcript;
mod voice;

pub use config::SessionConfig;
pub use controller::{CallController, CallOutcome, EndReason};
pub use session::{Session, SessionSignal};
pub use state::{CallState, CallStatus};
pub use stats::CallStats;
pub use transcript::{Role, TranscriptAssembler, TranscriptEntry};
pub use voice::{Persona, VoiceId, VoiceSelection};
