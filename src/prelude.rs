//! Convenience re-exports for common use.

pub use crate::audio::realtime::{
    ConnectionState, RealtimeConfiguration, RealtimeSessionController, RecordingState,
    SessionSnapshot,
};
pub use crate::audio::{
    AudioBackend, AudioFormatSpec, AudioFrame, CaptureDevice, PermissionRequester,
    PlaybackDevice, PlaybackQueue, Voice,
};
pub use crate::config::VoiceConfig;
pub use crate::error::{ErrorCategory, Result, VoiceError};
