//! Inbound audio playback queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::codec::InboundAudioDecoder;
use super::device::{AudioBackend, PlaybackDevice};
use super::types::{AudioFormatSpec, AudioFrame};
use crate::error::VoiceError;

/// One decoded chunk waiting for the playback device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedChunk {
    /// Position of the chunk in inbound event order.
    pub sequence: u64,
    pub frame: AudioFrame,
}

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<QueuedChunk>,
    queued_samples: usize,
    next_sequence: u64,
    dropped: u64,
}

/// Ordered PCM queue shared between the receive loop and the playback device.
///
/// Appended at the tail in arrival order, drained at the head by the device.
/// Total buffered audio is capped; chunks arriving over the cap are dropped.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    state: Arc<Mutex<QueueState>>,
    max_samples: usize,
}

impl PlaybackQueue {
    /// Queue holding at most `limit` of wire-format audio.
    pub fn new(limit: Duration) -> Self {
        let max_samples =
            (limit.as_secs_f64() * f64::from(AudioFormatSpec::WIRE.sample_rate)) as usize;
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            max_samples: max_samples.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a chunk. Returns its sequence number, or `None` if it was dropped.
    pub fn push(&self, frame: AudioFrame) -> Option<u64> {
        let mut state = self.lock();
        if state.queued_samples + frame.len() > self.max_samples {
            state.dropped += 1;
            tracing::warn!(
                queued_samples = state.queued_samples,
                chunk_samples = frame.len(),
                dropped = state.dropped,
                "playback queue full, dropping inbound audio chunk"
            );
            return None;
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.queued_samples += frame.len();
        state.chunks.push_back(QueuedChunk { sequence, frame });
        Some(sequence)
    }

    /// Take the oldest chunk.
    pub fn pop(&self) -> Option<QueuedChunk> {
        let mut state = self.lock();
        let chunk = state.chunks.pop_front()?;
        state.queued_samples -= chunk.frame.len();
        Some(chunk)
    }

    /// Fill `out` with the next samples in order, padding with silence when
    /// the queue runs dry. Returns the number of real samples written.
    pub fn read_samples(&self, out: &mut [i16]) -> usize {
        let mut state = self.lock();
        let mut written = 0;
        while written < out.len() {
            let Some(front) = state.chunks.front_mut() else {
                break;
            };
            let available = front.frame.samples();
            let take = available.len().min(out.len() - written);
            out[written..written + take].copy_from_slice(&available[..take]);
            written += take;
            if take == available.len() {
                state.chunks.pop_front();
            } else {
                let rest = available[take..].to_vec();
                front.frame = AudioFrame::new(*front.frame.format(), rest);
            }
            state.queued_samples -= take;
        }
        out[written..].fill(0);
        written
    }

    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    /// Buffered audio not yet played.
    pub fn buffered(&self) -> Duration {
        AudioFormatSpec::WIRE.duration_of(self.lock().queued_samples)
    }

    /// Chunks dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.chunks.clear();
        state.queued_samples = 0;
    }
}

/// Decodes inbound audio and feeds a lazily opened playback device.
pub struct PlaybackBuffer {
    backend: Arc<dyn AudioBackend>,
    decoder: InboundAudioDecoder,
    queue: PlaybackQueue,
    device: Option<Box<dyn PlaybackDevice>>,
}

impl PlaybackBuffer {
    pub fn new(backend: Arc<dyn AudioBackend>, limit: Duration) -> Self {
        Self {
            backend,
            decoder: InboundAudioDecoder,
            queue: PlaybackQueue::new(limit),
            device: None,
        }
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    /// Whether a playback device is currently open.
    pub fn is_active(&self) -> bool {
        self.device.is_some()
    }

    /// Decode one audio-delta payload and schedule it after everything queued so far.
    pub fn enqueue_payload(&mut self, payload: &str) -> Result<Option<u64>, VoiceError> {
        let frame = self.decoder.decode(payload)?;
        if frame.is_empty() {
            return Ok(None);
        }
        self.ensure_device()?;
        Ok(self.queue.push(frame))
    }

    fn ensure_device(&mut self) -> Result<(), VoiceError> {
        if self.device.is_some() {
            return Ok(());
        }
        let mut device = self.backend.open_playback()?;
        device.start(AudioFormatSpec::WIRE, self.queue.clone())?;
        tracing::debug!("playback device started");
        self.device = Some(device);
        Ok(())
    }

    /// Stop and release the device and discard pending audio.
    pub fn shutdown(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
            tracing::debug!("playback device stopped");
        }
        self.queue.clear();
    }
}

impl Drop for PlaybackBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
