//! WebSocket transport: single JSON text frames over one connection, with a
//! ping/pong heartbeat and exponential-backoff reconnection (spec §4.B
//! "WebSocket").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::protocol::Frame;

use super::{FrameEnvelope, Transport, TransportEvent, TransportState};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A WebSocket-transport target.
#[derive(Debug, Clone)]
pub struct WebSocketTarget {
    /// `ws://` or `wss://` URL.
    pub url: String,
    /// Optional bearer token sent as `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    /// Ping cadence while connected.
    pub ping_interval: Duration,
    /// How long to wait for a pong before the connection is considered dead.
    pub pong_timeout: Duration,
    /// Base reconnect delay; actual delay is `base * 2^(n-1)` where `n` is
    /// the attempt number, incremented before the first delay is computed.
    pub reconnect_base_delay: Duration,
    /// Maximum reconnect attempts before giving up (`None` = unlimited).
    pub reconnect_max_attempts: Option<u32>,
}

impl WebSocketTarget {
    /// Build a target with default timing knobs.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_attempts: None,
        }
    }
}

/// Compute the delay before reconnect attempt `n` (1-indexed), per the
/// spec's `base * 2^(n-1)` rule with `n` incremented before the first delay.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

enum WsCommand {
    Send(Vec<u8>),
    Shutdown,
}

/// WebSocket transport backed by `tokio-tungstenite`.
pub struct WebSocketTransport {
    target: WebSocketTarget,
    cmd_tx: Option<mpsc::UnboundedSender<WsCommand>>,
    events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    connected: Arc<RwLock<bool>>,
}

impl WebSocketTransport {
    /// Create a transport bound to `target`, not yet connected.
    #[must_use]
    pub fn new(target: WebSocketTarget) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            target,
            cmd_tx: None,
            events_tx: Some(tx),
            events_rx: Some(rx),
            connected: Arc::new(RwLock::new(false)),
        }
    }

    async fn attempt_connect(&self) -> Result<WsStream, TransportError> {
        connect_stream(&self.target).await
    }
}

async fn connect_stream(target: &WebSocketTarget) -> Result<WsStream, TransportError> {
    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::ConnectFailed(format!("invalid url: {e}")))?;

    if let Some(token) = &target.auth_token {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|e| TransportError::ConnectFailed(format!("invalid auth header: {e}")))?;
        request.headers_mut().insert("Authorization", value);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::ConnectFailed(format!("handshake failed: {e}")))?;
    Ok(stream)
}

/// Retry `connect_stream` with exponential backoff, per spec: unexpected
/// close in the connected state reconnects with `base * 2^(n-1)` delay, up
/// to `reconnect_max_attempts`; returns `None` once attempts are exhausted.
async fn reconnect_with_backoff(
    target: &WebSocketTarget,
    worker_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<WsStream> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if let Some(max) = target.reconnect_max_attempts {
            if attempt > max {
                worker_tx
                    .send(TransportEvent::Warning(format!(
                        "giving up after {max} reconnect attempts"
                    )))
                    .ok();
                return None;
            }
        }

        tokio::time::sleep(backoff_delay(target.reconnect_base_delay, attempt)).await;

        match connect_stream(target).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                worker_tx
                    .send(TransportEvent::Warning(format!(
                        "reconnect attempt {attempt} failed: {e}"
                    )))
                    .ok();
            }
        }
    }
}

/// How one generation of the connection-worker loop ended.
enum ConnectionOutcome {
    /// `disconnect()` was called, or the transport was dropped; do not
    /// reconnect.
    Shutdown,
    /// The socket closed, errored, or went quiet; eligible for reconnect.
    Lost,
}

/// Run one live connection until it closes or a shutdown command arrives.
/// Owns the send/receive/ping select loop for a single socket generation;
/// the caller decides whether to reconnect based on the returned outcome.
async fn run_connection(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut source: SplitStream<WsStream>,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    target: &WebSocketTarget,
    worker_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> ConnectionOutcome {
    let last_pong = Arc::new(Mutex::new(tokio::time::Instant::now()));
    let mut ping_tick = tokio::time::interval(target.ping_interval);
    ping_tick.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WsCommand::Send(bytes)) => {
                        if sink.send(WsMessage::Text(String::from_utf8_lossy(&bytes).into_owned())).await.is_err() {
                            return ConnectionOutcome::Lost;
                        }
                    }
                    Some(WsCommand::Shutdown) | None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return ConnectionOutcome::Shutdown;
                    }
                }
            }
            msg = source.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match Frame::decode(text.as_bytes()) {
                            Ok(frame) => {
                                worker_tx.send(TransportEvent::Message(FrameEnvelope { frame })).ok();
                            }
                            Err(e) => {
                                worker_tx.send(TransportEvent::Warning(format!("malformed ws frame: {e}"))).ok();
                            }
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        *last_pong.lock().await = tokio::time::Instant::now();
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return ConnectionOutcome::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        worker_tx.send(TransportEvent::Warning(format!("ws read error: {e}"))).ok();
                        return ConnectionOutcome::Lost;
                    }
                }
            }
            _ = ping_tick.tick() => {
                let elapsed = last_pong.lock().await.elapsed();
                if elapsed > target.ping_interval + target.pong_timeout {
                    worker_tx.send(TransportEvent::Warning("pong timeout".into())).ok();
                    return ConnectionOutcome::Lost;
                }
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    return ConnectionOutcome::Lost;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let tx = self
            .events_tx
            .clone()
            .ok_or_else(|| TransportError::ConnectFailed("transport already consumed".into()))?;
        tx.send(TransportEvent::StateChanged(TransportState::Connecting))
            .ok();

        let stream = self.attempt_connect().await?;

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        self.cmd_tx = Some(cmd_tx);

        let target = self.target.clone();
        let worker_tx = tx.clone();
        let connected = Arc::clone(&self.connected);
        *connected.write().await = true;

        tokio::spawn(async move {
            let (mut sink, mut source) = stream.split();

            loop {
                let outcome =
                    run_connection(sink, source, &mut cmd_rx, &target, &worker_tx).await;

                match outcome {
                    ConnectionOutcome::Shutdown => {
                        *connected.write().await = false;
                        worker_tx
                            .send(TransportEvent::StateChanged(TransportState::Closed))
                            .ok();
                        return;
                    }
                    ConnectionOutcome::Lost => {
                        *connected.write().await = false;
                        worker_tx
                            .send(TransportEvent::StateChanged(TransportState::Reconnecting))
                            .ok();
                    }
                }

                match reconnect_with_backoff(&target, &worker_tx).await {
                    Some(stream) => {
                        let split = stream.split();
                        sink = split.0;
                        source = split.1;
                        *connected.write().await = true;
                        worker_tx
                            .send(TransportEvent::StateChanged(TransportState::Connected))
                            .ok();
                    }
                    None => {
                        worker_tx
                            .send(TransportEvent::StateChanged(TransportState::Closed))
                            .ok();
                        return;
                    }
                }
            }
        });

        tx.send(TransportEvent::StateChanged(TransportState::Connected))
            .ok();
        Ok(())
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame
            .encode()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.cmd_tx
            .as_ref()
            .ok_or_else(|| TransportError::WriteFailed("not connected".into()))?
            .send(WsCommand::Send(bytes))
            .map_err(|_| TransportError::WriteFailed("connection worker gone".into()))
    }

    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            tx.send(WsCommand::Shutdown).ok();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Some(tx) = &self.events_tx {
            tx.send(TransportEvent::StateChanged(TransportState::Closed)).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_first_attempt_is_doubled_base() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn connect_fails_against_unreachable_host() {
        let target = WebSocketTarget::new("ws://127.0.0.1:1");
        let mut transport = WebSocketTransport::new(target);
        assert!(transport.connect().await.is_err());
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_max_attempts() {
        let mut target = WebSocketTarget::new("ws://127.0.0.1:1");
        target.reconnect_base_delay = Duration::from_millis(1);
        target.reconnect_max_attempts = Some(2);
        let (worker_tx, _rx) = mpsc::unbounded_channel();
        assert!(reconnect_with_backoff(&target, &worker_tx).await.is_none());
    }
}
