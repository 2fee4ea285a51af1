//! Shared test helpers: fake audio devices and an in-process realtime peer.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{Request, Response},
        http::StatusCode,
        Message,
    },
    WebSocketStream,
};

use roci_voice::audio::realtime::{RealtimeConfiguration, RealtimeSessionController, SessionSnapshot};
use roci_voice::audio::{
    AudioBackend, AudioFormatSpec, AudioFrame, CaptureCallback, CaptureDevice,
    PermissionRequester, PlaybackDevice, PlaybackQueue,
};
use roci_voice::error::VoiceError;

#[derive(Default)]
struct FakeAudioState {
    capture_format: Mutex<Option<AudioFormatSpec>>,
    tap: Mutex<Option<CaptureCallback>>,
    fail_capture_start: AtomicBool,
    fail_playback_open: AtomicBool,
    capture_opened: AtomicUsize,
    capture_stopped: AtomicUsize,
    playback_opened: AtomicUsize,
    playback_stopped: AtomicUsize,
    playback_queue: Mutex<Option<PlaybackQueue>>,
}

/// In-memory audio backend. Captured audio is injected with [`FakeAudio::emit`];
/// the playback queue is left undrained so tests can inspect it.
#[derive(Clone, Default)]
pub struct FakeAudio {
    state: Arc<FakeAudioState>,
}

impl FakeAudio {
    pub fn new(capture_format: AudioFormatSpec) -> Self {
        let audio = Self::default();
        *audio.state.capture_format.lock().unwrap() = Some(capture_format);
        audio
    }

    pub fn backend(&self) -> Arc<dyn AudioBackend> {
        Arc::new(self.clone())
    }

    pub fn fail_capture_start(&self) {
        self.state.fail_capture_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_playback_open(&self) {
        self.state.fail_playback_open.store(true, Ordering::SeqCst);
    }

    /// Deliver one buffer through the installed tap. Returns `false` without a tap.
    pub fn emit(&self, frame: AudioFrame) -> bool {
        match self.state.tap.lock().unwrap().as_mut() {
            Some(tap) => {
                tap(frame);
                true
            }
            None => false,
        }
    }

    pub fn has_tap(&self) -> bool {
        self.state.tap.lock().unwrap().is_some()
    }

    pub fn capture_opened(&self) -> usize {
        self.state.capture_opened.load(Ordering::SeqCst)
    }

    pub fn capture_stopped(&self) -> usize {
        self.state.capture_stopped.load(Ordering::SeqCst)
    }

    pub fn playback_opened(&self) -> usize {
        self.state.playback_opened.load(Ordering::SeqCst)
    }

    pub fn playback_stopped(&self) -> usize {
        self.state.playback_stopped.load(Ordering::SeqCst)
    }

    pub fn playback_queue(&self) -> Option<PlaybackQueue> {
        self.state.playback_queue.lock().unwrap().clone()
    }
}

impl AudioBackend for FakeAudio {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, VoiceError> {
        if self.state.capture_format.lock().unwrap().is_none() {
            return Err(VoiceError::Device("no input device".into()));
        }
        self.state.capture_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            state: Arc::clone(&self.state),
        }))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, VoiceError> {
        if self.state.fail_playback_open.load(Ordering::SeqCst) {
            return Err(VoiceError::Device("no output device".into()));
        }
        self.state.playback_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePlayback {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeCapture {
    state: Arc<FakeAudioState>,
}

impl CaptureDevice for FakeCapture {
    fn native_format(&self) -> Result<AudioFormatSpec, VoiceError> {
        (*self.state.capture_format.lock().unwrap())
            .ok_or_else(|| VoiceError::Device("no input device".into()))
    }

    fn install_tap(&mut self, _buffer_frames: usize, callback: CaptureCallback) -> Result<(), VoiceError> {
        *self.state.tap.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn remove_tap(&mut self) {
        self.state.tap.lock().unwrap().take();
    }

    fn start(&mut self) -> Result<(), VoiceError> {
        if self.state.fail_capture_start.load(Ordering::SeqCst) {
            return Err(VoiceError::Device("input device busy".into()));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.state.capture_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakePlayback {
    state: Arc<FakeAudioState>,
}

impl PlaybackDevice for FakePlayback {
    fn start(&mut self, format: AudioFormatSpec, queue: PlaybackQueue) -> Result<(), VoiceError> {
        assert!(format.is_wire());
        *self.state.playback_queue.lock().unwrap() = Some(queue);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.playback_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Permission facility that always refuses.
pub struct DenyMicrophone;

#[async_trait]
impl PermissionRequester for DenyMicrophone {
    async fn is_granted(&self) -> bool {
        false
    }

    async fn request(&self) -> bool {
        false
    }
}

/// Permission facility that refuses the first request and grants later ones.
#[derive(Default)]
pub struct DenyOnce {
    asked: AtomicBool,
}

#[async_trait]
impl PermissionRequester for DenyOnce {
    async fn is_granted(&self) -> bool {
        false
    }

    async fn request(&self) -> bool {
        self.asked.swap(true, Ordering::SeqCst)
    }
}

/// Listener standing in for the realtime endpoint.
pub struct MockRealtimeServer {
    listener: TcpListener,
    pub url: String,
}

impl MockRealtimeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener
            .local_addr()
            .expect("local addr should be available");
        Self {
            listener,
            url: format!("ws://{address}/v1/realtime"),
        }
    }

    /// Session configuration pointing at this server, with short timeouts.
    pub fn config(&self) -> RealtimeConfiguration {
        RealtimeConfiguration {
            base_url: self.url.clone(),
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            ..RealtimeConfiguration::default()
        }
    }

    /// Accept one connection, recording its handshake headers.
    pub async fn accept(&self) -> MockPeer {
        let (stream, _) = timeout(Duration::from_secs(2), self.listener.accept())
            .await
            .expect("client should connect")
            .expect("server should accept");
        let captured = Arc::new(Mutex::new(HandshakeInfo::default()));
        let captured_inner = Arc::clone(&captured);
        let ws = accept_hdr_async(stream, move |req: &Request, response: Response| {
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            *captured_inner.lock().expect("handshake lock should not poison") = HandshakeInfo {
                authorization: header("authorization"),
                beta: header("openai-beta"),
                query: req.uri().query().unwrap_or_default().to_string(),
            };
            Ok(response)
        })
        .await
        .expect("handshake should succeed");
        let handshake = captured.lock().expect("handshake lock should not poison").clone();
        MockPeer { ws, handshake }
    }

    /// Accept one connection and refuse the upgrade with `status`.
    pub async fn reject(&self, status: StatusCode) {
        let (stream, _) = timeout(Duration::from_secs(2), self.listener.accept())
            .await
            .expect("client should connect")
            .expect("server should accept");
        let result = accept_hdr_async(stream, move |_req: &Request, _response: Response| {
            let response = tokio_tungstenite::tungstenite::http::Response::builder()
                .status(status)
                .body(Some("rejected".to_string()))
                .expect("rejection response should build");
            Err(response)
        })
        .await;
        assert!(result.is_err());
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandshakeInfo {
    pub authorization: String,
    pub beta: String,
    pub query: String,
}

/// Server side of one realtime connection.
pub struct MockPeer {
    ws: WebSocketStream<TcpStream>,
    pub handshake: HandshakeInfo,
}

impl MockPeer {
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("server frame should send");
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    /// Send unless the client already went away.
    pub async fn try_send_json(&mut self, value: Value) -> bool {
        self.ws.send(Message::Text(value.to_string())).await.is_ok()
    }

    /// Send `session.created` and return the `session.update` the client answers with.
    pub async fn acknowledge(&mut self, session_id: &str) -> Value {
        self.send_json(serde_json::json!({
            "type": "session.created",
            "session": {"id": session_id}
        }))
        .await;
        let update = self.next_json().await;
        assert_eq!(update["type"], "session.update");
        update
    }

    /// Next text frame from the client as JSON, skipping control frames.
    pub async fn next_json(&mut self) -> Value {
        self.try_next_json(Duration::from_secs(2))
            .await
            .expect("client should send an event")
    }

    /// Next text frame within `max_wait`, or `None`.
    pub async fn try_next_json(&mut self, max_wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(&text).expect("client event should be JSON"))
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => {
                    return None
                }
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Wait for the client to close the connection.
    pub async fn wait_closed(&mut self) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return true,
                Ok(Some(Ok(_))) => {}
                Err(_) => return false,
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Wait until the published snapshot satisfies `predicate`.
pub async fn wait_for_snapshot<F>(
    controller: &RealtimeSessionController,
    max_wait: Duration,
    mut predicate: F,
) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut snapshots = controller.watch_snapshot();
    timeout(max_wait, async move {
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            snapshots
                .changed()
                .await
                .expect("snapshot channel should stay open");
        }
    })
    .await
    .expect("snapshot condition should be reached")
}

/// Poll `condition` until it holds or `max_wait` elapses.
pub async fn eventually<F>(max_wait: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + max_wait;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
