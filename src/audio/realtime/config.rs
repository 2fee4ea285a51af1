//! Realtime session configuration.

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use super::super::types::{AudioFormat, Voice};
use crate::config::VoiceConfig;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Server-side voice activity detection policy.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(tag = "type", rename = "server_vad")]
pub struct TurnDetection {
    /// Activation threshold, `0.0..=1.0`.
    #[builder(default = 0.5)]
    pub threshold: f32,
    /// Audio kept from before speech was detected.
    #[builder(default = 300)]
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn.
    #[builder(default = 500)]
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Input transcription settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// The `session` object of a `session.update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub modalities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub voice: Voice,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: InputAudioTranscription,
    pub turn_detection: TurnDetection,
}

/// Configuration for a realtime audio session.
#[derive(Debug, Clone)]
pub struct RealtimeConfiguration {
    pub base_url: String,
    pub model: String,
    pub voice: Voice,
    pub transcription_model: String,
    pub instructions: Option<String>,
    pub turn_detection: TurnDetection,
    /// Budget for the whole connect attempt, up to `session.created`.
    pub connect_timeout: Duration,
    /// Budget for the WebSocket handshake alone. It bounds
    /// [`RealtimeSession::connect`](super::RealtimeSession::connect); under the
    /// controller the handshake also counts against `connect_timeout`, so the
    /// smaller of the two applies.
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Requested capture buffer size in sample frames.
    pub capture_buffer_frames: usize,
    /// Most inbound audio buffered for playback before chunks are dropped.
    pub playback_queue_limit: Duration,
}

impl Default for RealtimeConfiguration {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: Voice::Alloy,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            instructions: None,
            turn_detection: TurnDetection::default(),
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(20),
            capture_buffer_frames: 4096,
            playback_queue_limit: Duration::from_secs(60),
        }
    }
}

impl RealtimeConfiguration {
    /// Defaults overridden by whatever `config` sets.
    pub fn from_voice_config(config: &VoiceConfig) -> Self {
        let mut realtime = Self::default();
        if let Some(base_url) = config.base_url() {
            realtime.base_url = base_url;
        }
        if let Some(model) = config.model() {
            realtime.model = model;
        }
        if let Some(voice) = config.voice() {
            realtime.voice = voice;
        }
        if let Some(model) = config.transcription_model() {
            realtime.transcription_model = model;
        }
        realtime
    }

    /// The `session` object declared once per connection.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: self.instructions.clone(),
            voice: self.voice,
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: InputAudioTranscription {
                model: self.transcription_model.clone(),
            },
            turn_detection: self.turn_detection.clone(),
        }
    }
}
