//! Error types for roci-voice.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all realtime voice operations.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl VoiceError {
    /// Create a service error from a peer-reported code and message.
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Connection(_) | Self::Io(_) => ErrorCategory::Connectivity,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Service { code, .. } => {
                unified::classify_server_error(Some(code.as_str()), None)
            }
            Self::Device(_) | Self::PermissionDenied | Self::UnsupportedFormat(_) => {
                ErrorCategory::Device
            }
            Self::Protocol(_) | Self::Serialization(_) => ErrorCategory::Protocol,
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error ends the current connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Authentication
                | ErrorCategory::Connectivity
                | ErrorCategory::Timeout
                | ErrorCategory::Service
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            Self::PermissionDenied => RecoverySuggestion::GrantMicrophoneAccess,
            _ => self.category().recovery_suggestion(),
        }
    }

    /// Message suitable for showing to the person using the app.
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => {
                "Microphone access was denied. Allow microphone access to record.".to_string()
            }
            Self::InvalidState(message) => message.clone(),
            other => format!("{}: {other}", other.category().user_prefix()),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, VoiceError>;
