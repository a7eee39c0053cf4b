//! Per-server session state machine (spec §4.D "Session").
//!
//! A session owns exactly one transport and drives it through
//! `Disconnected -> Connecting -> Handshaking -> Discovering -> Ready`, then
//! serves `executeTool`/`getResource` calls until it's torn down or the
//! transport reports a fatal error.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::config::ServerConfig;
use crate::correlator::Correlator;
use crate::error::{LifecycleError, McpError, McpResult, ProtocolError, RpcError, ValidationError};
use crate::events::{LifecycleEvent, LifecycleEventKind};
use crate::protocol::{methods, Frame};
use crate::transport::http::{HttpTarget, HttpTransport};
use crate::transport::stdio::{StdioTarget, StdioTransport};
use crate::transport::websocket::{WebSocketTarget, WebSocketTransport};
use crate::transport::{Transport, TransportEvent, TransportState};
use crate::types::{
    PromptContent, PromptDefinition, ResourceContent, ResourceDefinition, ServerCapabilities,
    ServerInfo, ToolDefinition, ToolResult,
};
use crate::validation::validate_arguments;

/// The session's lifecycle state (spec §3 "Session lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport connected.
    Disconnected,
    /// Transport connection in progress.
    Connecting,
    /// `initialize` request sent, awaiting response.
    Handshaking,
    /// Discovering tools/resources/prompts.
    Discovering,
    /// Ready to serve requests.
    Ready,
    /// Terminal error state; requires a fresh session to recover.
    Error,
}

/// A read-only snapshot of a session's state, for observability
/// (`McpManager::server_statuses`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Server id.
    pub server_id: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Number of tools discovered.
    pub tool_count: usize,
    /// Number of resources discovered.
    pub resource_count: usize,
    /// How many times this session has been restarted by its owning pool.
    pub restart_count: u32,
    /// Seconds since the last restart attempt, if any.
    pub seconds_since_last_restart: Option<u64>,
}

/// A connected (or connecting) session to one MCP server.
pub struct McpSession {
    server_id: String,
    config: ServerConfig,
    transport: RwLock<Box<dyn Transport>>,
    correlator: Arc<Correlator>,
    state: RwLock<SessionState>,
    info: RwLock<Option<ServerInfo>>,
    tools: RwLock<Vec<ToolDefinition>>,
    resources: RwLock<Vec<ResourceDefinition>>,
    prompts: RwLock<Vec<PromptDefinition>>,
    events_tx: broadcast::Sender<LifecycleEvent>,
    restart_count: AtomicU32,
    last_restart_attempt: RwLock<Option<Instant>>,
}

fn build_transport(config: &ServerConfig) -> Box<dyn Transport> {
    match &config.transport {
        crate::config::Transport::Stdio { command, args, env } => {
            let mut target = StdioTarget::new(command.clone(), args.clone());
            target.env = env.clone();
            target.ready_delay = std::time::Duration::from_millis(config.stdio_ready_delay_ms);
            target.grace_shutdown =
                std::time::Duration::from_millis(config.stdio_grace_shutdown_ms);
            Box::new(StdioTransport::new(target))
        },
        crate::config::Transport::Http { url, headers } => {
            let mut target = HttpTarget::new(url.clone());
            target.headers = headers.clone();
            target.request_timeout = config.request_timeout();
            target.readiness = config.readiness;
            Box::new(HttpTransport::new(target))
        },
        crate::config::Transport::WebSocket { url, auth_token } => {
            let mut target = WebSocketTarget::new(url.clone());
            target.auth_token = auth_token.clone();
            target.ping_interval = std::time::Duration::from_millis(config.ws_ping_interval_ms);
            target.pong_timeout = std::time::Duration::from_millis(config.ws_pong_timeout_ms);
            target.reconnect_base_delay =
                std::time::Duration::from_millis(config.reconnect_base_delay_ms);
            target.reconnect_max_attempts = Some(config.reconnect_max_attempts);
            Box::new(WebSocketTransport::new(target))
        },
    }
}

impl McpSession {
    /// Create a new, disconnected session for `config`.
    #[must_use]
    pub fn new(config: ServerConfig, events_tx: broadcast::Sender<LifecycleEvent>) -> Self {
        let server_id = config.id.clone();
        let transport = build_transport(&config);
        let correlator = Arc::new(Correlator::new(server_id.clone()));
        Self {
            server_id,
            config,
            transport: RwLock::new(transport),
            correlator,
            state: RwLock::new(SessionState::Disconnected),
            info: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
            events_tx,
            restart_count: AtomicU32::new(0),
            last_restart_attempt: RwLock::new(None),
        }
    }

    /// The server id this session is bound to.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    fn emit(&self, kind: LifecycleEventKind) {
        self.events_tx
            .send(LifecycleEvent::new(self.server_id.clone(), kind))
            .ok();
    }

    /// Connect: establish the transport, perform the `initialize` handshake,
    /// then discover tools/resources/prompts in parallel. Partial discovery
    /// failures are logged and don't prevent reaching `Ready`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to connect or the handshake
    /// fails.
    ///
    /// Requires an `Arc<Self>` receiver because the background task that
    /// forwards transport events (and fails pending calls when the
    /// connection drops unexpectedly) outlives this call.
    pub async fn connect(self: &Arc<Self>) -> McpResult<()> {
        *self.state.write().await = SessionState::Connecting;
        self.emit(LifecycleEventKind::ConnectionCreated);

        {
            let mut transport = self.transport.write().await;
            let events = transport.events();
            if let Some(mut rx) = events {
                let correlator = Arc::clone(&self.correlator);
                let session = Arc::clone(self);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        match event {
                            TransportEvent::Message(envelope) => {
                                correlator.dispatch(envelope.frame).await;
                            },
                            TransportEvent::StateChanged(TransportState::Closed)
                            | TransportEvent::StateChanged(TransportState::Reconnecting) => {
                                correlator.fail_all().await;
                                let mut state = session.state.write().await;
                                if *state != SessionState::Disconnected && *state != SessionState::Error {
                                    *state = SessionState::Disconnected;
                                    drop(state);
                                    session.emit(LifecycleEventKind::ConnectionLost {
                                        reason: "transport connection closed unexpectedly".into(),
                                    });
                                }
                            },
                            TransportEvent::Warning(msg) => {
                                tracing::warn!(server = %session.server_id, warning = %msg, "transport warning");
                            },
                            TransportEvent::StateChanged(_) => {},
                        }
                    }
                });
            }

            let mut notifications = self.correlator.subscribe_notifications();
            let session = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    let frame = match notifications.recv().await {
                        Ok(frame) => frame,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    let Frame::Notification { method, params } = frame else {
                        continue;
                    };
                    session.handle_notification(&method, params).await;
                }
            });

            tokio::time::timeout(self.config.connect_timeout(), transport.connect())
                .await
                .map_err(|_| McpError::from(RpcError::Timeout))?
                .map_err(McpError::from)?;
        }

        *self.state.write().await = SessionState::Handshaking;
        let init_result = self.call_raw(methods::INITIALIZE, Some(serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
        })))
        .await?;
        let info = ServerInfo::from_json(&init_result, &self.server_id)
            .map_err(|e| McpError::from(ProtocolError::HandshakeError(e.to_string())))?;
        *self.info.write().await = Some(info);

        self.send_notification(methods::NOTIFICATIONS_INITIALIZED, None).await?;

        *self.state.write().await = SessionState::Discovering;
        self.discover().await;

        *self.state.write().await = SessionState::Ready;
        self.emit(LifecycleEventKind::ConnectionInitialized);
        Ok(())
    }

    async fn discover(&self) {
        let (tools_res, resources_res, prompts_res) = tokio::join!(
            self.call_raw(methods::TOOLS_LIST, None),
            self.call_raw(methods::RESOURCES_LIST, None),
            self.call_raw(methods::PROMPTS_LIST, None),
        );

        match tools_res {
            Ok(value) => {
                let tools = value
                    .get("tools")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|t| ToolDefinition::from_json(t, &self.server_id).ok())
                            .collect()
                    })
                    .unwrap_or_default();
                *self.tools.write().await = tools;
            },
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "tools/list failed during discovery");
            },
        }

        match resources_res {
            Ok(value) => {
                let resources = value
                    .get("resources")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|r| ResourceDefinition::from_json(r, &self.server_id).ok())
                            .collect()
                    })
                    .unwrap_or_default();
                *self.resources.write().await = resources;
            },
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "resources/list failed during discovery");
            },
        }

        match prompts_res {
            Ok(value) => {
                let prompts = value
                    .get("prompts")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|p| PromptDefinition::from_json(p, &self.server_id).ok())
                            .collect()
                    })
                    .unwrap_or_default();
                *self.prompts.write().await = prompts;
            },
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "prompts/list failed during discovery");
            },
        }
    }

    /// Dispatch a server-initiated notification per spec §4.D: `.../log`
    /// goes to the logger, `.../resources/updated` triggers resource
    /// re-discovery, `.../tools/progress` becomes a progress event, and
    /// anything else becomes a generic notification event.
    async fn handle_notification(&self, method: &str, params: Option<serde_json::Value>) {
        match method {
            methods::NOTIFICATIONS_LOG => {
                tracing::info!(server = %self.server_id, params = ?params, "server log notification");
            },
            methods::NOTIFICATIONS_RESOURCES_UPDATED => {
                self.rediscover_resources().await;
                self.emit(LifecycleEventKind::ResourcesUpdated);
            },
            methods::NOTIFICATIONS_TOOLS_PROGRESS => {
                self.emit(LifecycleEventKind::ToolProgress { params });
            },
            other => {
                self.emit(LifecycleEventKind::Notification {
                    method: other.to_string(),
                    params,
                });
            },
        }
    }

    /// Re-run `resources/list` alone, e.g. in response to
    /// `notifications/resources/updated`. Failures are logged, matching
    /// `discover()`'s per-category error handling.
    async fn rediscover_resources(&self) {
        match self.call_raw(methods::RESOURCES_LIST, None).await {
            Ok(value) => {
                let resources = value
                    .get("resources")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|r| ResourceDefinition::from_json(r, &self.server_id).ok())
                            .collect()
                    })
                    .unwrap_or_default();
                *self.resources.write().await = resources;
            },
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "resources/list failed during re-discovery");
            },
        }
    }

    async fn call_raw(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> McpResult<serde_json::Value> {
        let id = self.correlator.next_id();
        let frame = Frame::request(id.clone(), method, params);
        {
            let transport = self.transport.read().await;
            transport.send(&frame).await.map_err(McpError::from)?;
        }
        let outcome = self
            .correlator
            .wait_for(id, self.config.request_timeout())
            .await
            .map_err(McpError::from)?;
        outcome.map_err(|e| {
            McpError::from(RpcError::ServerError {
                code: e.code,
                message: e.message,
                data: e.data,
            })
        })
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> McpResult<()> {
        let frame = Frame::notification(method, params);
        let transport = self.transport.read().await;
        transport.send(&frame).await.map_err(McpError::from)
    }

    /// List discovered tools.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.clone()
    }

    /// List discovered resources.
    pub async fn list_resources(&self) -> Vec<ResourceDefinition> {
        self.resources.read().await.clone()
    }

    /// Server capabilities, if the handshake has completed.
    pub async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.info.read().await.as_ref().map(|i| i.capabilities.clone())
    }

    /// Execute a tool by name. Validates the session is `Ready`, that the
    /// server advertised `tools`, that the tool exists, and that `args`
    /// satisfy the tool's input schema before making a round trip.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ToolNotFound`] if the tool isn't cached,
    /// [`ValidationError::ArgSchema`] if arguments fail schema validation,
    /// [`ProtocolError::NotCapable`] if the server didn't advertise tool
    /// support, [`LifecycleError::NotConnected`] if the session isn't ready,
    /// or an RPC error from the server.
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> McpResult<ToolResult> {
        if self.state().await != SessionState::Ready {
            return Err(McpError::from(LifecycleError::NotConnected));
        }

        let caps = self.capabilities().await;
        if !caps.map(|c| c.supports("tools.execute")).unwrap_or(false) {
            return Err(McpError::from(ProtocolError::NotCapable("tools.execute".into())));
        }

        let tool = {
            let tools = self.tools.read().await;
            tools.iter().find(|t| t.name == tool_name).cloned()
        };
        let Some(tool) = tool else {
            return Err(McpError::from(ValidationError::ToolNotFound(
                tool_name.to_string(),
            )));
        };

        let violations = validate_arguments(&tool.input_schema, &args);
        if !violations.is_empty() {
            return Err(McpError::from(ValidationError::ArgSchema(violations)));
        }

        let result = self
            .call_raw(
                methods::TOOLS_EXECUTE,
                Some(serde_json::json!({"name": tool_name, "arguments": args})),
            )
            .await?;
        ToolResult::from_json(&result).map_err(McpError::from)
    }

    /// Fetch a resource's content by URI.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotCapable`] if the server didn't advertise
    /// resource support, [`LifecycleError::NotConnected`] if the session
    /// isn't ready, or an RPC error from the server.
    pub async fn get_resource(&self, uri: &str) -> McpResult<ResourceContent> {
        if self.state().await != SessionState::Ready {
            return Err(McpError::from(LifecycleError::NotConnected));
        }
        let caps = self.capabilities().await;
        if !caps.map(|c| c.resources).unwrap_or(false) {
            return Err(McpError::from(ProtocolError::NotCapable("resources".into())));
        }
        let result = self
            .call_raw(methods::RESOURCES_GET, Some(serde_json::json!({"uri": uri})))
            .await?;
        ResourceContent::from_json(&result).map_err(McpError::from)
    }

    /// Fetch a rendered prompt by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotCapable`] if the server didn't advertise
    /// prompt support, [`LifecycleError::NotConnected`] if the session isn't
    /// ready, or an RPC error from the server.
    pub async fn get_prompt(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> McpResult<PromptContent> {
        if self.state().await != SessionState::Ready {
            return Err(McpError::from(LifecycleError::NotConnected));
        }
        let caps = self.capabilities().await;
        if !caps.map(|c| c.prompts).unwrap_or(false) {
            return Err(McpError::from(ProtocolError::NotCapable("prompts".into())));
        }
        let result = self
            .call_raw(
                methods::PROMPTS_GET,
                Some(serde_json::json!({"name": name, "arguments": args})),
            )
            .await?;
        PromptContent::from_json(&result).map_err(McpError::from)
    }

    /// Liveness probe: send a `ping` and await the response.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport write fails or no response arrives
    /// before the request timeout.
    pub async fn ping(&self) -> McpResult<()> {
        self.call_raw(methods::PING, None).await.map(|_| ())
    }

    /// Whether the underlying transport reports itself connected.
    pub async fn is_ready(&self) -> bool {
        self.state().await == SessionState::Ready
    }

    /// Record that the pool is about to renew (reconnect) this session.
    pub async fn note_restart_attempt(&self) {
        self.restart_count.fetch_add(1, Ordering::Relaxed);
        *self.last_restart_attempt.write().await = Some(Instant::now());
    }

    /// Snapshot this session's status for observability.
    pub async fn status(&self) -> SessionStatus {
        let last_attempt = *self.last_restart_attempt.read().await;
        SessionStatus {
            server_id: self.server_id.clone(),
            state: self.state().await,
            tool_count: self.tools.read().await.len(),
            resource_count: self.resources.read().await.len(),
            restart_count: self.restart_count.load(Ordering::Relaxed),
            seconds_since_last_restart: last_attempt.map(|i| i.elapsed().as_secs()),
        }
    }

    /// Tear the session down: disconnect the transport and fail any
    /// in-flight requests.
    pub async fn disconnect(&self) {
        self.correlator.fail_all().await;
        self.transport.write().await.disconnect().await;
        *self.state.write().await = SessionState::Disconnected;
        self.emit(LifecycleEventKind::ConnectionClosed);
    }

    /// Transition to the terminal error state, e.g. after an unrecoverable
    /// transport error.
    pub async fn mark_errored(&self, reason: impl Into<String>) {
        *self.state.write().await = SessionState::Error;
        self.emit(LifecycleEventKind::ConnectionError {
            reason: reason.into(),
        });
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig::stdio("echo-srv", "cat", vec![])
    }

    #[tokio::test]
    async fn new_session_starts_disconnected() {
        let (tx, _rx) = broadcast::channel(16);
        let session = McpSession::new(test_config(), tx);
        assert_eq!(session.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn execute_tool_before_ready_is_not_connected() {
        let (tx, _rx) = broadcast::channel(16);
        let session = McpSession::new(test_config(), tx);
        let result = session.execute_tool("anything", serde_json::json!({})).await;
        assert!(matches!(result, Err(McpError::Lifecycle(LifecycleError::NotConnected))));
    }

    #[tokio::test]
    async fn log_notification_does_not_emit_a_lifecycle_event() {
        let (tx, mut rx) = broadcast::channel(16);
        let session = McpSession::new(test_config(), tx);
        session
            .handle_notification(methods::NOTIFICATIONS_LOG, Some(serde_json::json!({"msg": "hi"})))
            .await;
        assert!(rx.try_recv().is_err(), "a log notification shouldn't emit a lifecycle event");
    }

    #[tokio::test]
    async fn tools_progress_notification_emits_progress_event() {
        let (tx, mut rx) = broadcast::channel(16);
        let session = McpSession::new(test_config(), tx);
        let params = serde_json::json!({"progress": 0.5});
        session
            .handle_notification(methods::NOTIFICATIONS_TOOLS_PROGRESS, Some(params.clone()))
            .await;
        let event = rx.try_recv().expect("progress event emitted");
        assert!(matches!(event.kind, LifecycleEventKind::ToolProgress { params: p } if p == Some(params)));
    }

    #[tokio::test]
    async fn unknown_notification_emits_generic_notification_event() {
        let (tx, mut rx) = broadcast::channel(16);
        let session = McpSession::new(test_config(), tx);
        session.handle_notification("notifications/custom", None).await;
        let event = rx.try_recv().expect("generic notification event emitted");
        assert!(matches!(
            event.kind,
            LifecycleEventKind::Notification { method, .. } if method == "notifications/custom"
        ));
    }
}
