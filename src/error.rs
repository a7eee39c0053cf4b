//! Error taxonomy for the MCP client runtime.
//!
//! Mirrors the layers in the design: transport, protocol, RPC, lifecycle,
//! and argument validation each get their own variants so callers can match
//! on failure class without string parsing.

use thiserror::Error;

/// Errors produced by transports (stdio, HTTP, WebSocket).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The child process could not be spawned.
    #[error("failed to spawn server process: {0}")]
    SpawnFailed(String),

    /// The child process exited unexpectedly while connected.
    #[error("server process exited unexpectedly (code={code:?}, signal={signal:?})")]
    ProcessExited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Signal number, if the process was killed by a signal.
        signal: Option<i32>,
    },

    /// The transport failed to establish a connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// A write to the transport failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The remote end closed the connection unexpectedly.
    #[error("unexpected close: {0}")]
    UnexpectedClose(String),
}

/// Errors in the JSON-RPC / MCP protocol layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame failed structural validation.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The `initialize` handshake failed or returned an unsupported version.
    #[error("handshake failed: {0}")]
    HandshakeError(String),

    /// The server did not advertise a capability required for the operation.
    #[error("server does not support capability: {0}")]
    NotCapable(String),
}

/// Errors surfaced by the RPC correlator or a server's JSON-RPC response.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No response arrived before the per-request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// The server does not implement the requested method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The server rejected the request parameters.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A generic server-side error (JSON-RPC `error` object).
    #[error("server error {code}: {message}")]
    ServerError {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
        /// Optional structured error data.
        data: Option<serde_json::Value>,
    },

    /// Tool execution reported `isError: true`.
    #[error("tool execution error: {0}")]
    ToolExecutionError(String),
}

/// Lifecycle/state errors that don't fit the other categories.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The operation requires a connected session.
    #[error("not connected")]
    NotConnected,

    /// The pool or session has already been disposed.
    #[error("disposed")]
    Disposed,

    /// The fleet cap was reached and no session could be evicted.
    #[error("connection pool capacity exceeded")]
    PoolCapExceeded,
}

/// Pre-flight argument validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One or more arguments failed schema validation.
    #[error("argument schema validation failed: {0:?}")]
    ArgSchema(Vec<String>),

    /// The named tool is not in the session's tool cache.
    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

/// The unified error type returned by this crate's public API.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-layer failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol-layer failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// RPC-layer failure.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Lifecycle/state failure.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Argument validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The named server id is not known to the manager.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// Configuration could not be parsed or loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for MCP runtime operations.
pub type McpResult<T> = Result<T, McpError>;
