use std::fmt;

use serde::{Deserialize, Serialize};

use super::transcript::Role;

/// Call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Dialing,
    Connecting,
    Connected,
    Ending,
    Ended,
    Error,
}

impl CallState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Idle, Dialing) => true,
            (Dialing, Connecting) => true,
            (Connecting, Connected) => true,
            (Dialing | Connecting | Connected, Ending) => true,
            (Ending, Ended) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    /// `Ended` and `Error` are final for a controller
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Error)
    }

    /// A session exists (or is being built) in this state
    pub fn is_live(self) -> bool {
        matches!(
            self,
            CallState::Dialing | CallState::Connecting | CallState::Connected | CallState::Ending
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Dialing => "dialing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ending => "ending",
            CallState::Ended => "ended",
            CallState::Error => "error",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published to status subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatus {
    pub state: CallState,
    /// Whole seconds since the call connected
    pub elapsed_secs: u64,
    pub muted: bool,
    /// Who is speaking right now, if anyone
    pub speaker: Option<Role>,
    /// User-facing error text when `state` is `Error`
    pub error: Option<String>,
}

impl Default for CallStatus {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            elapsed_secs: 0,
            muted: false,
            speaker: None,
            error: None,
        }
    }
}
