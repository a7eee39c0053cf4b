//! Transport abstraction over stdio, HTTP, and WebSocket substrates (spec §4.B).
//!
//! A [`Transport`] owns exactly one underlying connection and knows nothing
//! about JSON-RPC correlation or MCP semantics — it moves [`Frame`]s in and
//! out and reports state changes on an event channel, per the "transport
//! variants as a closed enum dispatched at construction" design note.

pub mod http;
pub mod stdio;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::Frame;

/// Events a transport reports to its owning session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A frame arrived from the remote end.
    Message(FrameEnvelope),
    /// The transport hit a non-fatal error worth logging (e.g. one malformed
    /// line on stdio); the transport keeps running.
    Warning(String),
    /// The transport's connection state changed.
    StateChanged(TransportState),
}

/// A decoded frame paired with the raw bytes it came from, so the
/// correlator/session layer can log the original payload on error without
/// re-serializing.
#[derive(Debug, Clone)]
pub struct FrameEnvelope {
    /// The decoded frame.
    pub frame: Frame,
}

/// Connection state a transport can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Connection establishing.
    Connecting,
    /// Connection usable.
    Connected,
    /// Connection lost; a reconnect may be in progress (WebSocket only).
    Reconnecting,
    /// Connection closed and will not retry.
    Closed,
}

/// Common behavior every transport substrate implements.
///
/// Implementations are constructed already bound to one target (a command
/// line, a base URL); `connect` performs the substrate-specific handshake
/// (spawn, HTTP readiness probe, WebSocket upgrade) and `events()` yields a
/// receiver the caller polls for the lifetime of the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the underlying connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Send one frame to the remote end.
    async fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Take the event receiver. Returns `None` if already taken.
    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Tear the connection down, graceful where the substrate allows it.
    async fn disconnect(&mut self);
}
