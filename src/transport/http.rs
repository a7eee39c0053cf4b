//! HTTP transport: JSON-RPC over POST `<base>/rpc`, readiness via GET
//! `<base>/health`, optional server push via GET `<base>/events` SSE
//! (spec §4.B "HTTP").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};

use crate::error::TransportError;
use crate::protocol::Frame;

use super::{FrameEnvelope, Transport, TransportEvent, TransportState};

/// Whether an HTTP `/health` probe is treated strictly or leniently.
///
/// `Lenient` (the default) treats any response, including `404`, as
/// evidence the server is reachable — only a connection-level failure
/// (refused, timed out, DNS) counts as unreachable. `Strict` requires a
/// `2xx` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Any HTTP response counts as reachable.
    #[default]
    Lenient,
    /// Only a `2xx` response counts as reachable.
    Strict,
}

/// An HTTP-transport target.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    /// Base URL, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Extra headers merged into every request (auth tokens, etc.).
    pub headers: HashMap<String, String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Whether to open the optional `/events` SSE stream on connect.
    pub subscribe_events: bool,
    /// `/health` strictness.
    pub readiness: Readiness,
}

impl HttpTarget {
    /// Build a target with default timing/readiness knobs.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: HashMap::new(),
            request_timeout: Duration::from_secs(30),
            subscribe_events: true,
            readiness: Readiness::default(),
        }
    }
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    target: HttpTarget,
    client: reqwest::Client,
    events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    closed: Arc<RwLock<bool>>,
}

impl HttpTransport {
    /// Create a transport bound to `target`, not yet connected.
    ///
    /// # Panics
    ///
    /// Panics if the underlying `reqwest::Client` cannot be built, which
    /// only happens on fatal TLS backend initialization failure.
    #[must_use]
    pub fn new(target: HttpTarget) -> Self {
        let client = reqwest::Client::builder()
            .timeout(target.request_timeout)
            .build()
            .expect("failed to build reqwest client");
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            target,
            client,
            events_tx: Some(tx),
            events_rx: Some(rx),
            closed: Arc::new(RwLock::new(false)),
        }
    }

    fn apply_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        for (k, v) in &self.target.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder
    }

    async fn probe_health(&self) -> Result<(), TransportError> {
        let url = format!("{}/health", self.target.base_url.trim_end_matches('/'));
        let resp = self
            .apply_headers(self.client.get(&url))
            .send()
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("GET /health failed: {e}")))?;

        match self.target.readiness {
            Readiness::Lenient => Ok(()),
            Readiness::Strict => {
                if resp.status().is_success() {
                    Ok(())
                } else {
                    Err(TransportError::ConnectFailed(format!(
                        "/health returned {}",
                        resp.status()
                    )))
                }
            },
        }
    }

    fn spawn_event_stream(&self) {
        if !self.target.subscribe_events {
            return;
        }
        let Some(tx) = self.events_tx.clone() else {
            return;
        };
        let url = format!("{}/events", self.target.base_url.trim_end_matches('/'));
        let client = self.client.clone();
        let headers = self.target.headers.clone();
        let closed = Arc::clone(&self.closed);

        tokio::spawn(async move {
            let mut req = client.get(&url).header("Accept", "text/event-stream");
            for (k, v) in &headers {
                req = req.header(k.as_str(), v.as_str());
            }
            let resp = match req.send().await {
                Ok(r) if r.status().is_success() => r,
                _ => return,
            };

            let mut buffer = String::new();
            let mut stream = resp.bytes_stream();
            while let Some(chunk) = stream.next().await {
                if *closed.read().await {
                    return;
                }
                let Ok(bytes) = chunk else { break };
                let Ok(text) = std::str::from_utf8(&bytes) else {
                    continue;
                };
                buffer.push_str(text);
                while let Some(pos) = buffer.find("\n\n") {
                    let block: String = buffer.drain(..pos + 2).collect();
                    for line in block.lines() {
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();
                        if data.is_empty() {
                            continue;
                        }
                        match Frame::decode(data.as_bytes()) {
                            Ok(frame) => {
                                tx.send(TransportEvent::Message(FrameEnvelope { frame })).ok();
                            },
                            Err(e) => {
                                tx.send(TransportEvent::Warning(format!(
                                    "malformed SSE frame: {e}"
                                )))
                                .ok();
                            },
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let tx = self
            .events_tx
            .clone()
            .ok_or_else(|| TransportError::ConnectFailed("transport already consumed".into()))?;
        tx.send(TransportEvent::StateChanged(TransportState::Connecting))
            .ok();

        self.probe_health().await?;
        self.spawn_event_stream();

        tx.send(TransportEvent::StateChanged(TransportState::Connected))
            .ok();
        Ok(())
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let url = format!("{}/rpc", self.target.base_url.trim_end_matches('/'));
        let body = frame
            .encode()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let resp = self
            .apply_headers(
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::WriteFailed(format!("POST /rpc failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }
        if !status.is_success() {
            return Err(TransportError::WriteFailed(format!(
                "POST /rpc returned {status}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::WriteFailed(format!("reading /rpc body failed: {e}")))?;
        if bytes.is_empty() {
            return Ok(());
        }

        if let Some(tx) = &self.events_tx {
            match Frame::decode(&bytes) {
                Ok(frame) => {
                    tx.send(TransportEvent::Message(FrameEnvelope { frame })).ok();
                },
                Err(e) => {
                    tx.send(TransportEvent::Warning(format!(
                        "malformed /rpc response: {e}"
                    )))
                    .ok();
                },
            }
        }
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn disconnect(&mut self) {
        *self.closed.write().await = true;
        if let Some(tx) = &self.events_tx {
            tx.send(TransportEvent::StateChanged(TransportState::Closed)).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_against_unreachable_host() {
        let target = HttpTarget::new("http://127.0.0.1:1");
        let mut transport = HttpTransport::new(target);
        let result = transport.connect().await;
        assert!(result.is_err());
    }

    #[test]
    fn default_readiness_is_lenient() {
        assert_eq!(HttpTarget::new("http://x").readiness, Readiness::Lenient);
    }
}
