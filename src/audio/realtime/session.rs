//! Realtime transport over WebSocket.
//!
//! One task per connection owns the socket. It multiplexes the shutdown
//! signal, heartbeat pings, the outbound send queue and inbound frames, and
//! forwards decoded events in arrival order.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::{config::RealtimeConfiguration, events::InboundEvent, events::OutboundEvent};
use crate::error::{unified, ErrorCategory, VoiceError};
use crate::util::{redact, timeout::with_timeout};

type RealtimeWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A well-formed inbound event, in arrival order.
    Inbound(InboundEvent),
    /// The connection ended without a local close.
    Failed(String),
    /// The connection was closed locally.
    Closed,
}

/// Cloneable handle that queues outbound events without waiting.
///
/// Safe to use from the capture callback: sending never blocks and never
/// touches the socket directly.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<String>,
}

impl OutboundSender {
    pub fn send(&self, event: &OutboundEvent) -> Result<(), VoiceError> {
        let payload = event.encode()?;
        self.tx
            .send(payload)
            .map_err(|_| VoiceError::Connection("realtime transport is closed".into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct RealtimeRuntime {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A WebSocket-based realtime audio session.
pub struct RealtimeSession {
    config: RealtimeConfiguration,
    outbound: Option<OutboundSender>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    runtime: Option<RealtimeRuntime>,
}

impl RealtimeSession {
    /// Create a new realtime session (does not connect yet).
    pub fn new(config: RealtimeConfiguration) -> Self {
        Self {
            config,
            outbound: None,
            events_rx: None,
            runtime: None,
        }
    }

    /// Perform the handshake and start the connection task.
    pub async fn connect(&mut self, api_key: &str) -> Result<(), VoiceError> {
        if self.runtime.is_some() {
            return Err(VoiceError::InvalidState(
                "Realtime session is already connected".into(),
            ));
        }
        if api_key.trim().is_empty() {
            return Err(VoiceError::Configuration("Missing API key".into()));
        }

        let url = build_realtime_url(&self.config.base_url, &self.config.model)?;
        tracing::info!(
            url = %url,
            model = %self.config.model,
            key = %redact::fingerprint(api_key),
            "connecting realtime websocket"
        );
        let socket = with_timeout(
            self.config.handshake_timeout,
            connect_realtime_socket(&url, api_key),
        )
        .await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(
            socket,
            outbound_rx,
            events_tx,
            shutdown_rx,
            self.config.heartbeat_interval,
        ));

        self.outbound = Some(OutboundSender { tx: outbound_tx });
        self.events_rx = Some(events_rx);
        self.runtime = Some(RealtimeRuntime { shutdown_tx, task });
        Ok(())
    }

    /// Handle for queueing outbound events.
    pub fn sender(&self) -> Option<OutboundSender> {
        self.outbound.clone()
    }

    /// Wait for the next event from the realtime stream.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.as_mut()?.recv().await
    }

    /// Close the realtime session gracefully.
    pub async fn close(&mut self) -> Result<(), VoiceError> {
        self.outbound = None;
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.shutdown_tx.send(true);
            runtime.task.await.map_err(|error| {
                VoiceError::Connection(format!("Realtime runtime task failed: {error}"))
            })?;
        }
        Ok(())
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.shutdown_tx.send(true);
            runtime.task.abort();
        }
    }
}

enum ConnectionOutcome {
    Shutdown,
    Failed(String),
}

async fn run_connection(
    mut socket: RealtimeWebSocket,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    heartbeat_interval: Duration,
) {
    let outcome = run_active_connection(
        &mut socket,
        &mut outbound_rx,
        &events_tx,
        &mut shutdown_rx,
        heartbeat_interval,
    )
    .await;

    match outcome {
        ConnectionOutcome::Shutdown => {
            tracing::debug!("realtime websocket closed locally");
            let _ = events_tx.send(TransportEvent::Closed);
        }
        ConnectionOutcome::Failed(reason) => {
            tracing::warn!(reason = %reason, "realtime websocket ended");
            let _ = events_tx.send(TransportEvent::Failed(reason));
        }
    }
}

async fn run_active_connection(
    socket: &mut RealtimeWebSocket,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
    heartbeat_interval: Duration,
) -> ConnectionOutcome {
    let mut heartbeat = time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut outbound_open = true;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = socket.send(Message::Close(None)).await;
                    return ConnectionOutcome::Shutdown;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(error) = socket.send(Message::Ping(Default::default())).await {
                    return ConnectionOutcome::Failed(format!("Realtime heartbeat failed: {error}"));
                }
            }
            payload = outbound_rx.recv(), if outbound_open => {
                match payload {
                    Some(payload) => {
                        if let Err(error) = socket.send(Message::Text(payload)).await {
                            return ConnectionOutcome::Failed(format!("Realtime send failed: {error}"));
                        }
                    }
                    None => outbound_open = false,
                }
            }
            frame = socket.next() => {
                match frame {
                    Some(Ok(message)) => {
                        if let Err(error) = handle_server_message(socket, events_tx, message).await {
                            return ConnectionOutcome::Failed(match error {
                                WsError::ConnectionClosed => "Realtime server closed the connection".to_string(),
                                other => format!("Realtime websocket frame handling failed: {other}"),
                            });
                        }
                    }
                    Some(Err(error)) => {
                        return ConnectionOutcome::Failed(format!("Realtime websocket receive failed: {error}"));
                    }
                    None => return ConnectionOutcome::Failed("Realtime server closed the connection".into()),
                }
            }
        }
    }
}

async fn handle_server_message(
    socket: &mut RealtimeWebSocket,
    events_tx: &mpsc::UnboundedSender<TransportEvent>,
    message: Message,
) -> Result<(), WsError> {
    match message {
        Message::Text(text) => parse_and_forward_event(&text, events_tx),
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => parse_and_forward_event(&text, events_tx),
            Err(_) => tracing::warn!(len = bytes.len(), "discarding non-UTF-8 realtime frame"),
        },
        Message::Ping(payload) => socket.send(Message::Pong(payload)).await?,
        Message::Pong(_) => {}
        Message::Close(_) => return Err(WsError::ConnectionClosed),
        Message::Frame(_) => {}
    }
    Ok(())
}

fn parse_and_forward_event(payload: &str, events_tx: &mpsc::UnboundedSender<TransportEvent>) {
    match InboundEvent::decode(payload) {
        Ok(event) => {
            let _ = events_tx.send(TransportEvent::Inbound(event));
        }
        Err(error) => {
            tracing::warn!(error = %error, len = payload.len(), "discarding realtime event");
        }
    }
}

/// Endpoint URL with the model as a query parameter.
pub fn build_realtime_url(base_url: &str, model: &str) -> Result<String, VoiceError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(VoiceError::Configuration(
            "Realtime base URL cannot be empty".into(),
        ));
    }
    if !(trimmed.starts_with("ws://") || trimmed.starts_with("wss://")) {
        return Err(VoiceError::Configuration(format!(
            "Realtime base URL must use ws:// or wss://, got {trimmed}"
        )));
    }
    if model.trim().is_empty() {
        return Err(VoiceError::Configuration("Realtime model cannot be empty".into()));
    }
    let separator = if trimmed.contains('?') { "&" } else { "?" };
    Ok(format!("{trimmed}{separator}model={}", model.trim()))
}

async fn connect_realtime_socket(url: &str, api_key: &str) -> Result<RealtimeWebSocket, VoiceError> {
    let mut request = url.into_client_request().map_err(|error| {
        VoiceError::Configuration(format!("Invalid realtime websocket URL: {error}"))
    })?;
    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|error| {
        VoiceError::Configuration(format!("Invalid realtime auth header: {error}"))
    })?;
    request.headers_mut().insert("Authorization", auth_value);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    connect_async(request)
        .await
        .map(|(socket, _)| socket)
        .map_err(map_connect_error)
}

fn map_connect_error(error: WsError) -> VoiceError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            match unified::classify_http_status(status) {
                ErrorCategory::Authentication => VoiceError::Authentication(format!(
                    "Realtime websocket authentication failed with status {status}"
                )),
                ErrorCategory::Service => VoiceError::service(
                    format!("http_{status}"),
                    format!("Realtime websocket handshake failed with status {status}"),
                ),
                _ => VoiceError::Connection(format!(
                    "Realtime websocket handshake failed with status {status}"
                )),
            }
        }
        WsError::Io(error) => VoiceError::Io(error),
        WsError::Url(error) => {
            VoiceError::Configuration(format!("Invalid realtime websocket URL: {error}"))
        }
        other => VoiceError::Connection(format!("Realtime websocket connect failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_model_query() {
        assert_eq!(
            build_realtime_url("wss://api.openai.com/v1/realtime", "gpt-4o-realtime-preview")
                .unwrap(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(
            build_realtime_url("ws://localhost:9000/rt?debug=1", "m").unwrap(),
            "ws://localhost:9000/rt?debug=1&model=m"
        );
    }

    #[test]
    fn malformed_endpoints_are_configuration_errors() {
        for (base, model) in [("", "m"), ("https://api.openai.com", "m"), ("wss://x", " ")] {
            assert!(matches!(
                build_realtime_url(base, model),
                Err(VoiceError::Configuration(_))
            ));
        }
    }

    #[tokio::test]
    async fn sender_reports_closed_transport() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = OutboundSender { tx };
        drop(rx);
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(&OutboundEvent::AudioCommit),
            Err(VoiceError::Connection(_))
        ));
    }
}
