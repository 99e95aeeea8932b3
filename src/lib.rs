pub mod audio;
pub mod config;
pub mod error;
pub mod scoring;
pub mod session;
pub mod transport;

pub use audio::{
    AudioFile, AudioFrame, AudioSource, CaptureBackend, CaptureConfig, CaptureStreams, DeviceProvider,
    PlaybackOutput, PlaybackScheduler, SystemDevices,
};
pub use config::Config;
pub use error::{CallError, CallResult};
pub use scoring::{HttpScoringClient, ScoreRequest, ScoringClient};
pub use session::{
    CallController, CallOutcome, CallState, CallStatus, EndReason, Persona, Role, Session, SessionConfig,
    TranscriptEntry, VoiceId, VoiceSelection,
};
pub use transport::{ServerEvent, TransportEvent, TransportSession};
