//! Audio pipeline: format conversion, wire codecs, device seams, playback
//! and the realtime session.

pub mod codec;
pub mod convert;
pub mod device;
pub mod playback;
pub mod realtime;
pub mod types;

pub use codec::{InboundAudioDecoder, OutboundAudioEncoder};
pub use convert::AudioFormatConverter;
pub use device::{
    AlwaysGranted, AudioBackend, CaptureCallback, CaptureDevice, PermissionRequester,
    PlaybackDevice,
};
pub use playback::{PlaybackBuffer, PlaybackQueue, QueuedChunk};
pub use types::*;
