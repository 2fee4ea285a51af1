//! Roci Voice: realtime voice sessions
//!
//! Streams microphone audio to a hosted realtime speech endpoint over a
//! WebSocket and plays the synthesized reply back, while tracking connection,
//! recording and transcript state.
//!
//! Audio hardware is reached through the [`audio::AudioBackend`] trait; the
//! host supplies capture and playback devices.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use roci_voice::prelude::*;
//!
//! # async fn example(backend: Arc<dyn AudioBackend>) -> roci_voice::error::Result<()> {
//! let controller = RealtimeSessionController::from_voice_config(VoiceConfig::global(), backend);
//! let mut snapshots = controller.watch_snapshot();
//! controller.connect().await?;
//! while !snapshots.borrow_and_update().connection.is_connected() {
//!     snapshots.changed().await.ok();
//! }
//! controller.start_recording().await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod prelude;
pub mod util;
