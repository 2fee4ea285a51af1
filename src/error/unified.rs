//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic and user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    Connectivity,
    Timeout,
    Service,
    Device,
    Protocol,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    CheckCredentials,
    CheckConfiguration,
    CheckNetwork,
    RetryLater,
    CheckAudioDevice,
    GrantMicrophoneAccess,
    Ignore,
    ContactSupport,
}

impl ErrorCategory {
    /// Default recovery action for errors in this category.
    pub fn recovery_suggestion(self) -> RecoverySuggestion {
        match self {
            Self::Configuration => RecoverySuggestion::CheckConfiguration,
            Self::Authentication => RecoverySuggestion::CheckCredentials,
            Self::Connectivity => RecoverySuggestion::CheckNetwork,
            Self::Timeout => RecoverySuggestion::CheckNetwork,
            Self::Service => RecoverySuggestion::RetryLater,
            Self::Device => RecoverySuggestion::CheckAudioDevice,
            Self::Protocol => RecoverySuggestion::Ignore,
            Self::Unknown => RecoverySuggestion::ContactSupport,
        }
    }

    /// Prefix shown to users in front of the underlying detail.
    pub fn user_prefix(self) -> &'static str {
        match self {
            Self::Configuration => "Configuration problem",
            Self::Authentication => "Authentication failed, check your API key",
            Self::Connectivity => "Could not reach the realtime service, check your network connection",
            Self::Timeout => "Timed out waiting for the realtime service. Check your API key, your network connection, and the service status",
            Self::Service => "The realtime service reported an error",
            Self::Device => "Audio device problem",
            Self::Protocol => "Unexpected message from the realtime service",
            Self::Unknown => "Unexpected error",
        }
    }
}

/// Error codes a realtime peer uses for credential problems.
const AUTHENTICATION_CODES: [&str; 5] = [
    "invalid_api_key",
    "authentication_error",
    "invalid_authentication",
    "unauthorized",
    "permission_denied",
];

/// Classify an `error` event sent by the realtime peer.
///
/// Credential codes map to [`ErrorCategory::Authentication`]; every other
/// peer-reported failure is a [`ErrorCategory::Service`] error.
pub fn classify_server_error(code: Option<&str>, error_type: Option<&str>) -> ErrorCategory {
    let is_auth = |value: &str| {
        let value = value.trim().to_ascii_lowercase();
        AUTHENTICATION_CODES.contains(&value.as_str())
    };
    if code.is_some_and(is_auth) || error_type.is_some_and(is_auth) {
        ErrorCategory::Authentication
    } else {
        ErrorCategory::Service
    }
}

/// Classify a failed WebSocket handshake by HTTP status.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Authentication,
        500..=599 => ErrorCategory::Service,
        _ => ErrorCategory::Connectivity,
    }
}
