//! Audio device seams.
//!
//! The realtime controller does not talk to a sound API directly. Hosts plug
//! in an [`AudioBackend`] that opens capture and playback devices, plus a
//! [`PermissionRequester`] for microphone access.

use async_trait::async_trait;

use super::playback::PlaybackQueue;
use super::types::{AudioFormatSpec, AudioFrame};
use crate::error::VoiceError;

/// Callback invoked by a capture device with each filled buffer.
///
/// Runs on the device's own thread at a hardware-driven cadence; it must not
/// block.
pub type CaptureCallback = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// A microphone (or other input) device.
pub trait CaptureDevice: Send {
    /// Format the hardware delivers buffers in.
    fn native_format(&self) -> Result<AudioFormatSpec, VoiceError>;

    /// Install the buffer tap. `buffer_frames` is the requested buffer size in
    /// sample frames; devices may deliver a different size.
    fn install_tap(&mut self, buffer_frames: usize, callback: CaptureCallback)
        -> Result<(), VoiceError>;

    /// Remove the tap. Safe to call without one installed.
    fn remove_tap(&mut self);

    fn start(&mut self) -> Result<(), VoiceError>;

    fn stop(&mut self);
}

/// A speaker (or other output) device.
pub trait PlaybackDevice: Send {
    /// Start draining `queue` in order. Chunks are always in `format`.
    fn start(&mut self, format: AudioFormatSpec, queue: PlaybackQueue) -> Result<(), VoiceError>;

    fn stop(&mut self);
}

/// Opens audio devices on demand.
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, VoiceError>;

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, VoiceError>;
}

/// Microphone permission facility.
#[async_trait]
pub trait PermissionRequester: Send + Sync {
    /// Whether access has already been granted.
    async fn is_granted(&self) -> bool;

    /// Ask for access; resolves to `true` on grant.
    async fn request(&self) -> bool;
}

/// Permission facility for hosts without a permission model.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionRequester for AlwaysGranted {
    async fn is_granted(&self) -> bool {
        true
    }

    async fn request(&self) -> bool {
        true
    }
}
