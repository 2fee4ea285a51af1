//! Audio-related types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::VoiceError;

/// Sample rate of the realtime wire format.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// How samples of multi-channel audio are arranged in a buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SampleLayout {
    /// `L R L R ...`
    Interleaved,
    /// `L L ... R R ...`
    Planar,
}

/// Audio container format understood by the realtime endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AudioFormat {
    Pcm16,
}

/// Voice for synthesized speech.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Voice {
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

/// Description of a PCM stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormatSpec {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub layout: SampleLayout,
    pub little_endian: bool,
}

impl AudioFormatSpec {
    /// The fixed realtime wire format: 24 kHz, 16-bit signed LE, mono.
    pub const WIRE: Self = Self {
        sample_rate: WIRE_SAMPLE_RATE,
        bits_per_sample: 16,
        channels: 1,
        layout: SampleLayout::Interleaved,
        little_endian: true,
    };

    /// 16-bit little-endian interleaved PCM at the given rate and channel count.
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample: 16,
            channels,
            layout: SampleLayout::Interleaved,
            little_endian: true,
        }
    }

    /// Same format with a different sample layout.
    pub fn with_layout(mut self, layout: SampleLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn is_wire(&self) -> bool {
        // Layout is meaningless for mono.
        self.sample_rate == WIRE_SAMPLE_RATE
            && self.bits_per_sample == 16
            && self.channels == 1
            && self.little_endian
    }

    /// Check that frames in this format can be converted.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.sample_rate == 0 {
            return Err(VoiceError::UnsupportedFormat("sample rate is zero".into()));
        }
        if self.channels == 0 {
            return Err(VoiceError::UnsupportedFormat("channel count is zero".into()));
        }
        if self.bits_per_sample != 16 {
            return Err(VoiceError::UnsupportedFormat(format!(
                "{}-bit samples (expected 16-bit)",
                self.bits_per_sample
            )));
        }
        Ok(())
    }

    /// Number of sample frames (one sample per channel) in `sample_count` samples.
    pub fn frames_in(&self, sample_count: usize) -> usize {
        sample_count / usize::from(self.channels.max(1))
    }

    /// Playback duration of `sample_count` samples.
    pub fn duration_of(&self, sample_count: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames_in(sample_count) as f64 / self.sample_rate as f64)
    }
}

/// A block of signed 16-bit PCM samples tagged with the format it was produced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    format: AudioFormatSpec,
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(format: AudioFormatSpec, samples: Vec<i16>) -> Self {
        Self { format, samples }
    }

    /// Quantize a float device buffer (`-1.0..=1.0`) into 16-bit PCM.
    ///
    /// `format` describes the channel count, rate and layout of `samples`; the
    /// resulting frame is always 16-bit.
    pub fn from_f32(format: AudioFormatSpec, samples: &[f32]) -> Self {
        let format = AudioFormatSpec {
            bits_per_sample: 16,
            ..format
        };
        Self {
            format,
            samples: samples.iter().copied().map(f32_to_i16).collect(),
        }
    }

    /// Build a wire-format frame from little-endian PCM bytes.
    pub fn from_le_bytes(format: AudioFormatSpec, bytes: &[u8]) -> Result<Self, VoiceError> {
        if bytes.len() % 2 != 0 {
            return Err(VoiceError::Protocol(format!(
                "PCM16 payload has odd length {}",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { format, samples })
    }

    pub fn format(&self) -> &AudioFormatSpec {
        &self.format
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.samples.len())
    }

    /// Raw little-endian bytes of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}
