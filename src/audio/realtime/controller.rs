//! Realtime session orchestration.
//!
//! [`RealtimeSessionController`] ties the transport, the state machine, the
//! capture tap and the playback buffer together. Every observable change goes
//! through one update path that republishes a [`SessionSnapshot`].

use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use super::config::RealtimeConfiguration;
use super::events::{InboundEvent, OutboundEvent};
use super::session::{OutboundSender, RealtimeSession, TransportEvent};
use super::state::{
    FailureReason, RecordingState, SessionSnapshot, SessionStateMachine, TranscriptEntry,
};
use crate::audio::codec::OutboundAudioEncoder;
use crate::audio::convert::AudioFormatConverter;
use crate::audio::device::{AlwaysGranted, AudioBackend, CaptureDevice, PermissionRequester};
use crate::audio::playback::PlaybackBuffer;
use crate::audio::types::{AudioFormatSpec, AudioFrame};
use crate::config::VoiceConfig;
use crate::error::{ErrorCategory, VoiceError};
use crate::util::redact;

struct ActiveCapture {
    device: Box<dyn CaptureDevice>,
    pipeline: CapturePipeline,
}

/// Converter and sender shared by the capture tap and `stop_recording`.
#[derive(Clone)]
struct CapturePipeline {
    converter: Arc<Mutex<AudioFormatConverter>>,
    sender: OutboundSender,
}

impl CapturePipeline {
    fn new(sender: OutboundSender) -> Self {
        Self {
            converter: Arc::new(Mutex::new(AudioFormatConverter::new())),
            sender,
        }
    }

    fn converter(&self) -> MutexGuard<'_, AudioFormatConverter> {
        self.converter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Convert, encode and enqueue one captured buffer. Never blocks on the network.
    fn push(&self, frame: &AudioFrame) {
        let converted = self.converter().convert(frame);
        match converted {
            Ok(wire_frames) => self.send(&wire_frames),
            Err(error) => {
                tracing::debug!(error = %error, samples = frame.len(), "dropping captured frame");
            }
        }
    }

    /// Send whatever the converter still holds.
    fn flush(&self) {
        let converted = self.converter().finish();
        match converted {
            Ok(wire_frames) => self.send(&wire_frames),
            Err(error) => tracing::debug!(error = %error, "dropping buffered capture audio"),
        }
    }

    fn send(&self, wire_frames: &[AudioFrame]) {
        for wire in wire_frames {
            if let Err(error) = OutboundAudioEncoder
                .encode(wire)
                .and_then(|event| self.sender.send(&event))
            {
                tracing::debug!(error = %error, "dropping captured frame");
                return;
            }
        }
    }
}

struct ActiveConnection {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    /// Present once the session is acknowledged.
    sender: Option<OutboundSender>,
}

/// Mutable session state. Only touched under [`Inner::core`].
struct SessionCore {
    machine: SessionStateMachine,
    /// Bumped on every connect and disconnect; events from older epochs are dropped.
    epoch: u64,
    transcript: TranscriptEntry,
    assistant_transcript: String,
    user_speaking: bool,
    session_id: Option<String>,
    last_error: Option<String>,
    connection: Option<ActiveConnection>,
    capture: Option<ActiveCapture>,
    playback: Option<PlaybackBuffer>,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            machine: SessionStateMachine::new(),
            epoch: 0,
            transcript: TranscriptEntry::new(),
            assistant_transcript: String::new(),
            user_speaking: false,
            session_id: None,
            last_error: None,
            connection: None,
            capture: None,
            playback: None,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.machine.connection().clone(),
            recording: self.machine.recording(),
            transcript: self.transcript.text(),
            assistant_transcript: self.assistant_transcript.clone(),
            user_speaking: self.user_speaking,
            session_id: self.session_id.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn record_error(&mut self, error: VoiceError) -> VoiceError {
        tracing::warn!(error = %error, "realtime session error");
        self.last_error = Some(error.user_message());
        error
    }

    fn reset_conversation(&mut self) {
        self.transcript = TranscriptEntry::new();
        self.assistant_transcript.clear();
        self.user_speaking = false;
        self.session_id = None;
    }

    /// Stop the device and hand back its pipeline, which may still hold
    /// converted input short of a resampler chunk.
    fn release_capture(&mut self) -> Option<CapturePipeline> {
        let ActiveCapture {
            mut device,
            pipeline,
        } = self.capture.take()?;
        device.remove_tap();
        device.stop();
        tracing::debug!("capture device stopped");
        Some(pipeline)
    }

    fn release_playback(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.shutdown();
        }
    }

    /// Move to `Failed`, releasing devices. The transport is closed by the
    /// connection task once it sees the session has ended.
    fn fail(&mut self, reason: FailureReason) {
        if !self.machine.connection().is_active() {
            return;
        }
        tracing::warn!(category = ?reason.category, reason = %reason, "realtime session failed");
        self.last_error = Some(reason.user_message());
        self.machine.fail(reason);
        self.tear_down();
    }

    /// Fail an attempt that never reached acknowledgment. A session that is
    /// already connected or ended is left alone.
    fn fail_pending(&mut self, reason: FailureReason) {
        let message = reason.user_message();
        let category = reason.category;
        if !self.machine.fail_if_connecting(reason) {
            return;
        }
        tracing::warn!(category = ?category, "realtime connect failed");
        self.last_error = Some(message);
        self.tear_down();
    }

    fn tear_down(&mut self) {
        self.release_capture();
        self.release_playback();
        self.user_speaking = false;
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
        }
    }

    /// Handle one inbound event. Returns `false` once the session has ended.
    fn apply(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::SessionCreated { session_id } => {
                tracing::debug!(session_id = %session_id, "ignoring repeated session.created");
            }
            InboundEvent::SessionUpdated { session_id } => {
                tracing::debug!(session_id = ?session_id, "session configuration applied");
            }
            InboundEvent::SpeechStarted { item_id, .. } => {
                tracing::debug!(item_id = ?item_id, "user speech started");
                self.user_speaking = true;
            }
            InboundEvent::SpeechStopped { item_id, .. } => {
                tracing::debug!(item_id = ?item_id, "user speech stopped");
                self.user_speaking = false;
            }
            InboundEvent::InputAudioCommitted { item_id } => {
                tracing::debug!(item_id = ?item_id, "input audio committed");
            }
            InboundEvent::TranscriptionDelta { delta, .. } => self.transcript.push_partial(&delta),
            InboundEvent::TranscriptionCompleted { transcript, .. } => {
                self.transcript.complete(&transcript)
            }
            InboundEvent::TranscriptionFailed { item_id, message } => {
                tracing::warn!(item_id = ?item_id, message = %message, "input transcription failed");
            }
            InboundEvent::ResponseCreated { response_id } => {
                tracing::debug!(response_id = ?response_id, "response started");
                self.assistant_transcript.clear();
            }
            InboundEvent::AudioDelta { delta, .. } => self.play(&delta),
            InboundEvent::AudioDone { response_id } => {
                tracing::debug!(response_id = ?response_id, "response audio complete");
            }
            InboundEvent::AudioTranscriptDelta { delta, .. } | InboundEvent::TextDelta { delta, .. } => {
                self.assistant_transcript.push_str(&delta)
            }
            InboundEvent::ResponseDone { response_id, status } => {
                tracing::debug!(response_id = ?response_id, status = ?status, "response done");
                self.transcript.close();
            }
            InboundEvent::Error {
                code,
                error_type,
                message,
            } => {
                let reason =
                    FailureReason::from_server(code.as_deref(), error_type.as_deref(), &message);
                self.fail(reason);
                return false;
            }
            InboundEvent::Unknown { event_type } => {
                tracing::trace!(event_type = %event_type, "ignoring realtime event");
            }
        }
        true
    }

    fn play(&mut self, payload: &str) {
        let Some(playback) = self.playback.as_mut() else {
            tracing::debug!("audio delta without playback buffer");
            return;
        };
        match playback.enqueue_payload(payload) {
            Ok(_) => {}
            Err(error @ VoiceError::Device(_)) => {
                self.record_error(error);
            }
            Err(error) => {
                tracing::warn!(error = %error, "discarding inbound audio chunk");
            }
        }
    }
}

struct Inner {
    config: RealtimeConfiguration,
    backend: Arc<dyn AudioBackend>,
    permissions: Arc<dyn PermissionRequester>,
    credential: RwLock<Option<String>>,
    core: Mutex<SessionCore>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The single update path: mutate the core, then republish the snapshot
    /// if anything observable changed.
    fn update<R>(&self, apply: impl FnOnce(&mut SessionCore) -> R) -> R {
        let mut core = self.lock();
        let result = apply(&mut core);
        let next = core.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        result
    }

    /// Like [`Inner::update`], but skipped when `epoch` is stale.
    fn update_current<R>(&self, epoch: u64, apply: impl FnOnce(&mut SessionCore) -> R) -> Option<R> {
        self.update(|core| {
            if core.epoch != epoch {
                tracing::debug!(epoch, current = core.epoch, "dropping update from stale connection");
                return None;
            }
            Some(apply(core))
        })
    }

    fn credential(&self) -> Option<String> {
        self.credential
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Drives one realtime voice session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct RealtimeSessionController {
    inner: Arc<Inner>,
}

impl RealtimeSessionController {
    /// Controller with no credential and an always-granting permission facility.
    pub fn new(config: RealtimeConfiguration, backend: Arc<dyn AudioBackend>) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                permissions: Arc::new(AlwaysGranted),
                credential: RwLock::new(None),
                core: Mutex::new(SessionCore::new()),
                snapshot_tx,
            }),
        }
    }

    /// Controller configured from layered settings, including the credential.
    pub fn from_voice_config(config: &VoiceConfig, backend: Arc<dyn AudioBackend>) -> Self {
        let controller = Self::new(RealtimeConfiguration::from_voice_config(config), backend);
        if let Some(key) = config.api_key() {
            controller.update_credential(key);
        }
        controller
    }

    /// Replace the microphone permission facility. Only effective before the
    /// controller is cloned.
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionRequester>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.permissions = permissions,
            None => tracing::warn!("permission facility not replaced on a shared controller"),
        }
        self
    }

    pub fn with_credential(self, credential: impl Into<String>) -> Self {
        self.update_credential(credential);
        self
    }

    pub fn config(&self) -> &RealtimeConfiguration {
        &self.inner.config
    }

    /// Replace the credential used by future connects. An open connection is
    /// not affected.
    pub fn update_credential(&self, credential: impl Into<String>) {
        let credential = credential.into();
        let credential = Some(credential).filter(|value| !value.trim().is_empty());
        tracing::debug!(
            key = ?credential.as_deref().map(redact::fingerprint),
            "realtime credential updated"
        );
        *self
            .inner
            .credential
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = credential;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot_stream(&self) -> WatchStream<SessionSnapshot> {
        WatchStream::new(self.watch_snapshot())
    }

    /// Start connecting. Returns once the connection task is running; progress
    /// is observable through the snapshot.
    ///
    /// No-op while connecting or connected.
    pub async fn connect(&self) -> Result<(), VoiceError> {
        let credential = self.inner.credential();
        let inner = Arc::clone(&self.inner);
        self.inner.update(move |core| {
            if core.machine.connection().is_active() {
                tracing::debug!("connect ignored, session already active");
                return Ok(());
            }
            let Some(credential) = credential else {
                return Err(core.record_error(VoiceError::Configuration(
                    "No API key configured for the realtime service".into(),
                )));
            };

            core.release_capture();
            core.release_playback();
            core.reset_conversation();
            core.epoch += 1;
            core.machine.begin_connect();
            core.playback = Some(PlaybackBuffer::new(
                Arc::clone(&inner.backend),
                inner.config.playback_queue_limit,
            ));

            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_connection(
                Arc::downgrade(&inner),
                inner.config.clone(),
                core.epoch,
                cancel.clone(),
                credential,
            ));
            core.connection = Some(ActiveConnection {
                cancel,
                task: Some(task),
                sender: None,
            });
            Ok(())
        })
    }

    /// Stop capture, close the transport, abandon any pending connect and
    /// release playback. Always safe to call.
    pub async fn disconnect(&self) {
        let task = self.inner.update(|core| {
            core.epoch += 1;
            core.release_capture();
            core.release_playback();
            core.reset_conversation();
            core.last_error = None;
            core.machine.disconnect();
            core.connection.take().and_then(|mut connection| {
                connection.cancel.cancel();
                connection.task.take()
            })
        });
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::debug!(error = %error, "realtime connection task ended abnormally");
            }
        }
    }

    /// Begin streaming the microphone. Requires an acknowledged session.
    pub async fn start_recording(&self) -> Result<(), VoiceError> {
        let epoch = self.inner.update(|core| {
            if core.machine.recording() == RecordingState::Capturing {
                return Ok(None);
            }
            if !core.machine.connection().is_connected() {
                return Err(core.record_error(VoiceError::InvalidState(
                    "Connect to the realtime service before recording".into(),
                )));
            }
            Ok(Some(core.epoch))
        })?;
        let Some(epoch) = epoch else {
            return Ok(());
        };

        let permissions = &self.inner.permissions;
        if !permissions.is_granted().await && !permissions.request().await {
            return Err(self
                .inner
                .update(|core| core.record_error(VoiceError::PermissionDenied)));
        }

        let inner = &self.inner;
        inner.update(|core| {
            if core.epoch != epoch || !core.machine.connection().is_connected() {
                return Err(core.record_error(VoiceError::InvalidState(
                    "Connection changed while waiting for microphone access".into(),
                )));
            }
            if core.machine.recording() == RecordingState::Capturing {
                return Ok(());
            }
            let Some(sender) = core
                .connection
                .as_ref()
                .and_then(|connection| connection.sender.clone())
            else {
                return Err(core.record_error(VoiceError::InvalidState(
                    "Realtime transport is not ready".into(),
                )));
            };
            let pipeline = CapturePipeline::new(sender);
            let device = open_capture(
                inner.backend.as_ref(),
                inner.config.capture_buffer_frames,
                pipeline.clone(),
            )
            .map_err(|error| core.record_error(error))?;
            core.machine.start_capture()?;
            core.capture = Some(ActiveCapture { device, pipeline });
            core.last_error = None;
            tracing::info!("recording started");
            Ok(())
        })
    }

    /// Stop streaming the microphone. When a recording was in progress on a
    /// live connection, commit the input and ask for a response.
    pub async fn stop_recording(&self) -> Result<(), VoiceError> {
        self.inner.update(|core| {
            let pipeline = core.release_capture();
            if !core.machine.stop_capture() {
                return Ok(());
            }
            tracing::info!("recording stopped");
            if !core.machine.connection().is_connected() {
                return Ok(());
            }
            let Some(sender) = core
                .connection
                .as_ref()
                .and_then(|connection| connection.sender.clone())
            else {
                return Ok(());
            };
            if let Some(pipeline) = pipeline {
                pipeline.flush();
            }
            sender
                .send(&OutboundEvent::AudioCommit)
                .and_then(|()| sender.send(&OutboundEvent::ResponseCreate))
                .map_err(|error| {
                    if error.is_connection_fatal() {
                        core.fail(FailureReason::from_error(&error));
                    }
                    core.record_error(error)
                })?;
            core.last_error = None;
            Ok(())
        })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self
            .core
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        core.release_capture();
        core.release_playback();
        if let Some(connection) = core.connection.take() {
            connection.cancel.cancel();
        }
    }
}

fn open_capture(
    backend: &dyn AudioBackend,
    buffer_frames: usize,
    pipeline: CapturePipeline,
) -> Result<Box<dyn CaptureDevice>, VoiceError> {
    let mut device = backend.open_capture()?;
    let native = device.native_format()?;
    // Float devices quantize before handing frames over.
    AudioFormatSpec {
        bits_per_sample: 16,
        ..native
    }
    .validate()?;
    tracing::info!(
        sample_rate = native.sample_rate,
        channels = native.channels,
        bits = native.bits_per_sample,
        buffer_frames,
        "opening capture device"
    );
    device.install_tap(buffer_frames, Box::new(move |frame| pipeline.push(&frame)))?;
    if let Err(error) = device.start() {
        device.remove_tap();
        return Err(error);
    }
    Ok(device)
}

/// Apply `f` to the session if the controller is still alive and `epoch` current.
fn update_session<R>(
    inner: &Weak<Inner>,
    epoch: u64,
    apply: impl FnOnce(&mut SessionCore) -> R,
) -> Option<R> {
    inner.upgrade()?.update_current(epoch, apply)
}

async fn run_connection(
    inner: Weak<Inner>,
    config: RealtimeConfiguration,
    epoch: u64,
    cancel: CancellationToken,
    credential: String,
) {
    let connect_timeout = config.connect_timeout;
    let mut session = RealtimeSession::new(config.clone());

    let established = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(epoch, "connect abandoned");
            return;
        }
        result = tokio::time::timeout(connect_timeout, establish(&mut session, &credential)) => {
            match result {
                Ok(result) => result,
                Err(_) => Err(FailureReason::timeout(connect_timeout.as_millis() as u64)),
            }
        }
    };

    let acknowledged = match established {
        Ok(session_id) => match session.sender() {
            Some(sender) => update_session(&inner, epoch, |core| {
                acknowledge(core, &config, session_id, sender)
            })
            .unwrap_or(false),
            None => false,
        },
        Err(reason) => {
            update_session(&inner, epoch, |core| core.fail_pending(reason));
            false
        }
    };

    if acknowledged {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = session.next_event() => event,
            };
            let keep_going = match event {
                Some(TransportEvent::Inbound(event)) => {
                    update_session(&inner, epoch, |core| core.apply(event)).unwrap_or(false)
                }
                Some(TransportEvent::Failed(reason)) => {
                    update_session(&inner, epoch, |core| {
                        core.fail(FailureReason::new(ErrorCategory::Connectivity, reason))
                    });
                    false
                }
                Some(TransportEvent::Closed) | None => {
                    update_session(&inner, epoch, |core| {
                        core.fail(FailureReason::new(
                            ErrorCategory::Connectivity,
                            "realtime connection closed",
                        ))
                    });
                    false
                }
            };
            if !keep_going {
                break;
            }
        }
    }

    if let Err(error) = session.close().await {
        tracing::debug!(error = %error, "realtime session close failed");
    }
}

/// Mark the session connected and send its configuration ahead of any audio.
/// Returns `false` when the attempt was abandoned meanwhile.
fn acknowledge(
    core: &mut SessionCore,
    config: &RealtimeConfiguration,
    session_id: String,
    sender: OutboundSender,
) -> bool {
    if !core.machine.acknowledge() {
        return false;
    }
    tracing::info!(session_id = %session_id, "realtime session acknowledged");
    core.session_id = Some(session_id);
    core.last_error = None;

    let update = OutboundEvent::SessionUpdate {
        session: config.session_settings(),
    };
    if let Err(error) = sender.send(&update) {
        core.fail(FailureReason::from_error(&error));
        return false;
    }
    tracing::debug!(
        voice = %config.voice,
        transcription_model = %config.transcription_model,
        "session configuration sent"
    );
    if let Some(connection) = core.connection.as_mut() {
        connection.sender = Some(sender);
    }
    true
}

/// Handshake, then wait for `session.created`.
async fn establish(session: &mut RealtimeSession, credential: &str) -> Result<String, FailureReason> {
    session
        .connect(credential)
        .await
        .map_err(|error| FailureReason::from_error(&error))?;
    loop {
        match session.next_event().await {
            Some(TransportEvent::Inbound(InboundEvent::SessionCreated { session_id })) => {
                return Ok(session_id)
            }
            Some(TransportEvent::Inbound(InboundEvent::Error {
                code,
                error_type,
                message,
            })) => {
                return Err(FailureReason::from_server(
                    code.as_deref(),
                    error_type.as_deref(),
                    &message,
                ))
            }
            Some(TransportEvent::Inbound(other)) => {
                tracing::debug!(event = ?other, "event before session acknowledgment");
            }
            Some(TransportEvent::Failed(reason)) => {
                return Err(FailureReason::new(ErrorCategory::Connectivity, reason))
            }
            Some(TransportEvent::Closed) | None => {
                return Err(FailureReason::new(
                    ErrorCategory::Connectivity,
                    "realtime connection closed before acknowledgment",
                ))
            }
        }
    }
}
