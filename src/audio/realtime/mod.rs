//! Realtime voice session (WebSocket-based).

pub mod config;
pub mod controller;
pub mod events;
pub mod session;
pub mod state;

pub use config::{RealtimeConfiguration, SessionSettings, TurnDetection};
pub use controller::RealtimeSessionController;
pub use events::{InboundEvent, OutboundEvent};
pub use session::{OutboundSender, RealtimeSession, TransportEvent};
pub use state::{
    ConnectionState, FailureReason, RecordingState, SessionSnapshot, SessionStateMachine,
    TranscriptEntry,
};
