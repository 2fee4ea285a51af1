//! Connection and recording lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use strum::{Display, IntoStaticStr};

use crate::error::{unified, ErrorCategory, VoiceError};

/// Why a session ended up in [`ConnectionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub category: ErrorCategory,
    pub message: String,
}

impl FailureReason {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// No `session.created` arrived within the connect budget.
    pub fn timeout(after_ms: u64) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            format!("no session acknowledgment within {after_ms}ms"),
        )
    }

    /// Failure reported by the peer in an `error` event.
    pub fn from_server(code: Option<&str>, error_type: Option<&str>, message: &str) -> Self {
        let category = unified::classify_server_error(code, error_type);
        let message = match code {
            Some(code) => format!("{code}: {message}"),
            None => message.to_string(),
        };
        Self::new(category, message)
    }

    /// Failure raised locally (handshake, transport, configuration).
    pub fn from_error(error: &VoiceError) -> Self {
        let category = match error.category() {
            ErrorCategory::Protocol | ErrorCategory::Unknown | ErrorCategory::Device => {
                ErrorCategory::Connectivity
            }
            category => category,
        };
        Self::new(category, error.to_string())
    }

    /// Message suitable for showing to the person using the app.
    pub fn user_message(&self) -> String {
        format!("{}: {}", self.category.user_prefix(), self.message)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(FailureReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Connecting or connected.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        self.into()
    }
}

/// Microphone capture lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RecordingState {
    #[default]
    Idle,
    Capturing,
}

/// Legal transitions of a realtime session.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnected
///                     |             |
///                     +--> Failed <-+   (Failed -> Connecting on reconnect)
/// ```
///
/// `Capturing` is only reachable from `Connected` and is forced back to `Idle`
/// by every transition out of `Connected`.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    connection: ConnectionState,
    recording: RecordingState,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn recording(&self) -> RecordingState {
        self.recording
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::info!(from = self.connection.name(), to = next.name(), "realtime connection state");
        if !next.is_connected() && self.recording == RecordingState::Capturing {
            tracing::debug!("capture ended by connection state change");
            self.recording = RecordingState::Idle;
        }
        self.connection = next;
    }

    /// Start a connect attempt. Returns `false` when one is already active.
    pub fn begin_connect(&mut self) -> bool {
        if self.connection.is_active() {
            return false;
        }
        self.transition(ConnectionState::Connecting);
        true
    }

    /// `session.created` arrived. Only advances from `Connecting`.
    pub fn acknowledge(&mut self) -> bool {
        if self.connection != ConnectionState::Connecting {
            tracing::debug!(state = self.connection.name(), "ignoring session acknowledgment");
            return false;
        }
        self.transition(ConnectionState::Connected);
        true
    }

    /// Move an active session to `Failed`. Returns `true` if capture was
    /// running and must be torn down.
    pub fn fail(&mut self, reason: FailureReason) -> bool {
        if !self.connection.is_active() {
            return false;
        }
        let was_capturing = self.recording == RecordingState::Capturing;
        self.transition(ConnectionState::Failed(reason));
        was_capturing
    }

    /// Fail only if still waiting for acknowledgment.
    pub fn fail_if_connecting(&mut self, reason: FailureReason) -> bool {
        if self.connection != ConnectionState::Connecting {
            return false;
        }
        self.fail(reason);
        true
    }

    /// Explicit local disconnect. Returns `false` if already disconnected.
    pub fn disconnect(&mut self) -> bool {
        if self.connection == ConnectionState::Disconnected {
            return false;
        }
        self.transition(ConnectionState::Disconnected);
        true
    }

    /// Enter `Capturing`. Only legal while connected.
    pub fn start_capture(&mut self) -> Result<(), VoiceError> {
        if !self.connection.is_connected() {
            return Err(VoiceError::InvalidState(
                "Connect to the realtime service before recording".into(),
            ));
        }
        self.recording = RecordingState::Capturing;
        Ok(())
    }

    /// Leave `Capturing`. Returns whether capture was running.
    pub fn stop_capture(&mut self) -> bool {
        let was_capturing = self.recording == RecordingState::Capturing;
        self.recording = RecordingState::Idle;
        was_capturing
    }
}

/// Best-effort transcription of the user's current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    committed: String,
    partial: String,
    started_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl Default for TranscriptEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptEntry {
    pub fn new() -> Self {
        Self {
            committed: String::new(),
            partial: String::new(),
            started_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn text(&self) -> String {
        match (self.committed.is_empty(), self.partial.is_empty()) {
            (_, true) => self.committed.clone(),
            (true, false) => self.partial.clone(),
            (false, false) => format!("{} {}", self.committed, self.partial),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    fn reopen_if_closed(&mut self) {
        if self.is_closed() {
            *self = Self::new();
        }
    }

    /// Append in-progress transcription text.
    pub fn push_partial(&mut self, delta: &str) {
        self.reopen_if_closed();
        self.partial.push_str(delta);
    }

    /// Commit a completed transcription, replacing any partial text.
    pub fn complete(&mut self, transcript: &str) {
        self.reopen_if_closed();
        self.partial.clear();
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return;
        }
        if !self.committed.is_empty() {
            self.committed.push(' ');
        }
        self.committed.push_str(transcript);
    }

    /// Freeze the entry; the next update starts a new turn.
    pub fn close(&mut self) {
        if self.closed_at.is_none() {
            self.closed_at = Some(Utc::now());
        }
    }
}

/// Point-in-time snapshot of the observable session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub recording: RecordingState,
    /// What the user said in the current turn.
    pub transcript: String,
    /// What the assistant is saying in the current response.
    pub assistant_transcript: String,
    pub user_speaking: bool,
    pub session_id: Option<String>,
    pub last_error: Option<String>,
}
