//! Conversion from device-native PCM to the realtime wire format.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::types::{i16_to_f32, f32_to_i16, AudioFormatSpec, AudioFrame, SampleLayout};
use crate::error::VoiceError;

/// Input frames handed to the resampler per call, independent of the
/// device's callback buffer length.
const RESAMPLER_CHUNK_FRAMES: usize = 1024;

struct ActiveResampler {
    source_rate: u32,
    ratio: f64,
    inner: FastFixedIn<f32>,
    /// Mono input not yet filling a whole chunk.
    in_buf: Vec<f32>,
}

impl ActiveResampler {
    fn new(source_rate: u32, target_rate: u32) -> Result<Self, VoiceError> {
        tracing::debug!(source_rate, target_rate, "building capture resampler");
        let ratio = f64::from(target_rate) / f64::from(source_rate);
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            RESAMPLER_CHUNK_FRAMES,
            1,
        )
        .map_err(|error| {
            VoiceError::UnsupportedFormat(format!("cannot resample {source_rate} Hz: {error}"))
        })?;
        Ok(Self {
            source_rate,
            ratio,
            inner,
            in_buf: Vec::with_capacity(RESAMPLER_CHUNK_FRAMES),
        })
    }

    fn push(&mut self, mut input: &[f32], out: &mut Vec<f32>) -> Result<(), VoiceError> {
        while !input.is_empty() {
            let take = (RESAMPLER_CHUNK_FRAMES - self.in_buf.len()).min(input.len());
            self.in_buf.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.in_buf.len() == RESAMPLER_CHUNK_FRAMES {
                self.process_chunk(out)?;
            }
        }
        Ok(())
    }

    /// Pad the buffered remainder with silence and keep only the output it accounts for.
    fn finish(&mut self, out: &mut Vec<f32>) -> Result<(), VoiceError> {
        if self.in_buf.is_empty() {
            return Ok(());
        }
        let pending = self.in_buf.len();
        self.in_buf.resize(RESAMPLER_CHUNK_FRAMES, 0.0);
        let mut tail = Vec::new();
        self.process_chunk(&mut tail)?;
        tail.truncate((pending as f64 * self.ratio).round() as usize);
        out.extend(tail);
        Ok(())
    }

    fn process_chunk(&mut self, out: &mut Vec<f32>) -> Result<(), VoiceError> {
        let mut buffer = vec![vec![0.0f32; self.inner.output_frames_max()]];
        let result =
            self.inner
                .process_into_buffer(&[self.in_buf.as_slice()], &mut buffer, None);
        self.in_buf.clear();
        let (_, written) = result
            .map_err(|error| VoiceError::UnsupportedFormat(format!("resampling failed: {error}")))?;
        out.extend_from_slice(&buffer[0][..written]);
        Ok(())
    }
}

/// Converts native capture frames to 24 kHz mono PCM16.
///
/// Input is resampled in fixed chunks, so callback buffers of any length join
/// without seams. Samples short of a whole chunk are held until the next call
/// or until [`AudioFormatConverter::finish`].
pub struct AudioFormatConverter {
    target: AudioFormatSpec,
    resampler: Option<ActiveResampler>,
}

impl Default for AudioFormatConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioFormatConverter {
    pub fn new() -> Self {
        Self {
            target: AudioFormatSpec::WIRE,
            resampler: None,
        }
    }

    /// Convert one native frame into zero or more wire frames.
    pub fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<AudioFrame>, VoiceError> {
        let format = *frame.format();
        format.validate()?;
        if frame.samples().len() % usize::from(format.channels) != 0 {
            return Err(VoiceError::UnsupportedFormat(format!(
                "{} samples do not divide into {} channels",
                frame.samples().len(),
                format.channels
            )));
        }
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        // A rate change ends the previous stream.
        let mut output = if self
            .resampler
            .as_ref()
            .is_some_and(|active| active.source_rate != format.sample_rate)
        {
            self.finish()?
        } else {
            Vec::new()
        };

        let mono = downmix(frame.samples(), format.channels, format.layout);
        if format.sample_rate == self.target.sample_rate {
            output.push(AudioFrame::new(self.target, mono));
            return Ok(output);
        }

        if self.resampler.is_none() {
            self.resampler = Some(ActiveResampler::new(
                format.sample_rate,
                self.target.sample_rate,
            )?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(VoiceError::InvalidState("resampler missing".into()));
        };
        let input: Vec<f32> = mono.into_iter().map(i16_to_f32).collect();
        let mut resampled = Vec::new();
        resampler.push(&input, &mut resampled)?;
        output.extend(self.wire_frame(&resampled));
        Ok(output)
    }

    /// Flush input held back for a whole chunk and end the stream. The next
    /// [`convert`](Self::convert) starts with fresh resampler state.
    pub fn finish(&mut self) -> Result<Vec<AudioFrame>, VoiceError> {
        let Some(mut active) = self.resampler.take() else {
            return Ok(Vec::new());
        };
        let mut resampled = Vec::new();
        active.finish(&mut resampled)?;
        Ok(self.wire_frame(&resampled).into_iter().collect())
    }

    fn wire_frame(&self, samples: &[f32]) -> Option<AudioFrame> {
        if samples.is_empty() {
            return None;
        }
        Some(AudioFrame::new(
            self.target,
            samples.iter().copied().map(f32_to_i16).collect(),
        ))
    }
}

/// Average all channels into one, in the integer domain.
fn downmix(samples: &[i16], channels: u16, layout: SampleLayout) -> Vec<i16> {
    let channels = usize::from(channels);
    if channels == 1 {
        return samples.to_vec();
    }
    let frames = samples.len() / channels;
    (0..frames)
        .map(|frame| {
            let sum: i32 = (0..channels)
                .map(|channel| {
                    let index = match layout {
                        SampleLayout::Interleaved => frame * channels + channel,
                        SampleLayout::Planar => channel * frames + frame,
                    };
                    i32::from(samples[index])
                })
                .sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
