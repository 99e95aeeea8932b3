//! Error types for call sessions

use thiserror::Error;

use crate::session::CallState;

/// Result type alias for call operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors that can occur while placing or running a call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Microphone denied, missing, or already held by another session
    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    /// Endpoint URL or credential not configured
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Socket error or abnormal close
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single inbound message could not be decoded
    #[error("Malformed server message: {0}")]
    Parse(String),

    #[error("Scoring failed: {0}")]
    Scoring(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Recording error: {0}")]
    Recording(String),

    /// A call is already in progress on this controller
    #[error("A call session is already active")]
    SessionActive,

    #[error("Invalid call state transition: {from} -> {to}")]
    InvalidTransition { from: CallState, to: CallState },

    /// The controller's driver has shut down
    #[error("Call controller is closed")]
    Closed,
}

impl CallError {
    /// Human-readable message for the call screen
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::MicrophoneUnavailable(_) => {
                "We couldn't access your microphone. Check permissions and try again."
            }
            CallError::ConfigurationMissing(_) => {
                "The voice service is not configured. Contact your administrator."
            }
            CallError::Connection(_) => "The call was disconnected. Please redial.",
            CallError::Parse(_) => "Received an unexpected message from the voice service.",
            CallError::Scoring(_) => "Your call was saved, but scoring is unavailable right now.",
            CallError::Playback(_) => "We couldn't play audio on this device.",
            CallError::Recording(_) => "The call recording could not be saved.",
            CallError::SessionActive => "A call is already in progress.",
            CallError::InvalidTransition { .. } | CallError::Closed => {
                "Something went wrong with this call. Please start a new one."
            }
        }
    }

    /// Whether the user can retry without an operator fixing something
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CallError::ConfigurationMissing(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CallError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CallError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::Parse(err.to_string())
    }
}

impl From<hound::Error> for CallError {
    fn from(err: hound::Error) -> Self {
        CallError::Recording(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for CallError {
    fn from(err: cpal::BuildStreamError) -> Self {
        CallError::MicrophoneUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for CallError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        CallError::MicrophoneUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_errors_are_fatal() {
        assert!(!CallError::ConfigurationMissing("endpoint.url".into()).is_recoverable());
        assert!(CallError::MicrophoneUnavailable("denied".into()).is_recoverable());
        assert!(CallError::Connection("reset".into()).is_recoverable());
    }

    #[test]
    fn test_transition_error_display() {
        let err = CallError::InvalidTransition {
            from: CallState::Idle,
            to: CallState::Connected,
        };
        assert_eq!(err.to_string(), "Invalid call state transition: idle -> connected");
    }
}
