//! Text-safe transport encoding for wire PCM.
//!
//! Outbound frames become `input_audio_buffer.append` events carrying the
//! standard base64 encoding of their little-endian bytes; inbound
//! `response.audio.delta` payloads are decoded back into wire frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::realtime::events::OutboundEvent;
use super::types::{AudioFormatSpec, AudioFrame};
use crate::error::VoiceError;

/// Turns wire-format frames into audio-append events.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutboundAudioEncoder;

impl OutboundAudioEncoder {
    /// Base64 payload for one wire frame.
    pub fn encode_payload(&self, frame: &AudioFrame) -> Result<String, VoiceError> {
        if !frame.format().is_wire() {
            return Err(VoiceError::UnsupportedFormat(format!(
                "cannot send {} Hz / {} channel audio, convert to the wire format first",
                frame.format().sample_rate,
                frame.format().channels
            )));
        }
        Ok(STANDARD.encode(frame.to_le_bytes()))
    }

    /// One `input_audio_buffer.append` event for the frame.
    pub fn encode(&self, frame: &AudioFrame) -> Result<OutboundEvent, VoiceError> {
        Ok(OutboundEvent::AudioAppend {
            audio: self.encode_payload(frame)?,
        })
    }
}

/// Turns audio-delta payloads back into wire-format frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct InboundAudioDecoder;

impl InboundAudioDecoder {
    /// Raw PCM bytes of a base64 payload.
    pub fn decode_bytes(&self, payload: &str) -> Result<Vec<u8>, VoiceError> {
        STANDARD
            .decode(payload.trim())
            .map_err(|error| VoiceError::Protocol(format!("invalid base64 audio payload: {error}")))
    }

    /// Decode a payload into a wire-format frame.
    pub fn decode(&self, payload: &str) -> Result<AudioFrame, VoiceError> {
        let bytes = self.decode_bytes(payload)?;
        AudioFrame::from_le_bytes(AudioFormatSpec::WIRE, &bytes)
    }
}
