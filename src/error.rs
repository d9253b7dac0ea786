//! Error types for Intervox

use thiserror::Error;

/// Result type alias for Intervox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Intervox
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current session state
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// The remote service refused or failed to open a session
    #[error("session start failed: {0}")]
    SessionStartFailed(TransportError),

    /// Audio encoding or device error
    #[error("audio error: {0}")]
    Audio(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures reported by capture, recognition and synthesis adapters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The user or OS refused access to the device
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No usable device, or the device went away
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Speech recognition is not available on this platform
    #[error("speech recognition unsupported: {0}")]
    RecognitionUnsupported(String),

    /// No speech was heard within the recognition window
    #[error("speech recognition timed out")]
    RecognitionTimeout,

    /// Recognition failed for a reason worth retrying
    #[error("speech recognition failed: {0}")]
    RecognitionFailed(String),

    /// Speech synthesis or playback failed
    #[error("speech synthesis failed: {0}")]
    SynthesisError(String),
}

impl AdapterError {
    /// Permanent errors downgrade the session to typed input instead of being retried
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::RecognitionUnsupported(_)
        )
    }
}

/// Failures reported by the session service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request was rejected as malformed (e.g. missing job description)
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote side does not know this session
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Network failure or an unexpected response
    #[error("service error: {0}")]
    Service(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Service(format!("request timed out: {err}"))
        } else {
            Self::Service(err.to_string())
        }
    }
}

/// Transcript append violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    /// A turn would rewrite or skip a past position
    #[error("turn out of order: expected sequence {expected}, got {found}")]
    OutOfOrder {
        /// The only sequence number the transcript accepts next
        expected: u64,
        /// The sequence number carried by the rejected turn
        found: u64,
    },
}
