//! End-to-end scenarios over a real fixture server per transport: stdio
//! happy path, argument-validation rejection, request timeout, unexpected
//! process exit, WebSocket reconnect, and pool LRU eviction.

#[path = "support/mock_server.rs"]
mod mock_server;

use std::time::Duration;

use mcp_runtime::error::{RpcError, ValidationError};
use mcp_runtime::protocol::methods::error_code;
use mcp_runtime::transport::websocket::{WebSocketTarget, WebSocketTransport};
use mcp_runtime::transport::{Transport, TransportEvent, TransportState};
use mcp_runtime::{ConnectionPool, LifecycleEventKind, McpError, McpManager, ServersConfig};
use tokio::sync::broadcast;

use mock_server::{
    python3_available, spawn_ws_fixture, stdio_fixture_config, stdio_fixture_server, with_timeout,
};

macro_rules! skip_without_python3 {
    () => {
        if !python3_available() {
            eprintln!("SKIP: python3 not found on $PATH, skipping stdio scenario");
            return;
        }
    };
}

/// S1: connect over stdio, discover tools, execute one, and shut down
/// cleanly.
#[tokio::test]
async fn s1_stdio_happy_path_discovers_and_executes_tool() {
    skip_without_python3!();

    let manager = McpManager::new(stdio_fixture_config("echo-srv"));

    let tools = with_timeout(10, manager.list_tools()).await;
    assert!(tools.iter().any(|t| t.name == "echo"), "expected the echo tool to be discovered");

    let result = with_timeout(
        10,
        manager.execute_tool("echo-srv", "echo", serde_json::json!({"text": "hi"})),
    )
    .await
    .expect("execute_tool should succeed");
    assert!(result.success);
    assert_eq!(result.text_content(), "hi");

    manager.shutdown().await;
}

/// S2: arguments that fail the tool's input schema are rejected locally,
/// before any round trip to the server.
#[tokio::test]
async fn s2_argument_validation_rejects_before_server_round_trip() {
    skip_without_python3!();

    let manager = McpManager::new(stdio_fixture_config("echo-srv"));
    with_timeout(10, manager.list_tools()).await; // warm the tool cache

    let result = with_timeout(
        10,
        manager.execute_tool("echo-srv", "echo", serde_json::json!({})),
    )
    .await;

    match result {
        Err(McpError::Validation(ValidationError::ArgSchema(violations))) => {
            assert!(!violations.is_empty());
        },
        other => panic!("expected ArgSchema validation error, got {other:?}"),
    }

    manager.shutdown().await;
}

/// S3: a tool call that outlives the per-request timeout surfaces as
/// `RpcError::Timeout`, not a hang.
#[tokio::test]
async fn s3_request_timeout_surfaces_as_rpc_timeout() {
    skip_without_python3!();

    let mut configs = ServersConfig::default();
    configs.add(stdio_fixture_server("slow-srv").with_request_timeout(Duration::from_millis(300)));
    let manager = McpManager::new(configs);
    with_timeout(10, manager.list_tools()).await;

    let result = with_timeout(
        10,
        manager.execute_tool("slow-srv", "slow", serde_json::json!({})),
    )
    .await;
    assert!(
        matches!(result, Err(McpError::Rpc(RpcError::Timeout))),
        "expected a timeout, got {result:?}"
    );

    manager.shutdown().await;
}

/// S4: the server process exiting mid-call fails the pending request
/// promptly via the correlator's `fail_all`, rather than waiting out the
/// full request timeout.
#[tokio::test]
async fn s4_unexpected_process_exit_fails_pending_call_promptly() {
    skip_without_python3!();

    let manager = McpManager::new(stdio_fixture_config("crash-srv"));
    with_timeout(10, manager.list_tools()).await;

    // The request timeout defaults to 30s; succeeding well within 3s proves
    // the unexpected-disconnect path resolved the call, not a timeout.
    let result = with_timeout(
        3,
        manager.execute_tool("crash-srv", "crash", serde_json::json!({})),
    )
    .await;

    match result {
        Err(McpError::Rpc(RpcError::ServerError { code, .. })) => {
            assert_eq!(code, error_code::TRANSPORT_ERROR);
        },
        other => panic!("expected a transport-error from fail_all, got {other:?}"),
    }

    manager.shutdown().await;
}

/// S5: an unexpected WebSocket close while connected triggers the
/// transport's own exponential-backoff reconnection.
#[tokio::test]
async fn s5_websocket_transport_reconnects_after_unexpected_close() {
    let url = spawn_ws_fixture(true).await;

    let mut target = WebSocketTarget::new(url);
    target.reconnect_base_delay = Duration::from_millis(10);
    target.reconnect_max_attempts = Some(5);

    let mut transport = WebSocketTransport::new(target);
    let mut events = transport.events().expect("events receiver available once");
    transport.connect().await.expect("initial connect succeeds");

    let mut connected_count = 0;
    let mut saw_reconnecting = false;
    for _ in 0..50 {
        let Some(event) = with_timeout(5, events.recv()).await else {
            break;
        };
        match event {
            TransportEvent::StateChanged(TransportState::Connected) => connected_count += 1,
            TransportEvent::StateChanged(TransportState::Reconnecting) => saw_reconnecting = true,
            _ => {},
        }
        if connected_count >= 2 && saw_reconnecting {
            break;
        }
    }

    assert!(saw_reconnecting, "expected a Reconnecting event after the fixture killed the first connection");
    assert!(
        connected_count >= 2,
        "expected Connected at least twice (initial connect + post-reconnect), saw {connected_count}"
    );

    transport.disconnect().await;
}

/// S7: a `notifications/tools/progress` sent mid-call surfaces to a
/// subscriber as a `LifecycleEventKind::ToolProgress` event, proving the
/// session's notification-forwarding task is actually wired up rather than
/// left dangling on an unread correlator channel.
#[tokio::test]
async fn s7_tool_progress_notification_surfaces_as_lifecycle_event() {
    skip_without_python3!();

    let manager = McpManager::new(stdio_fixture_config("echo-srv"));
    with_timeout(10, manager.list_tools()).await;
    let mut events = manager.subscribe();

    with_timeout(
        10,
        manager.execute_tool("echo-srv", "echo", serde_json::json!({"text": "hi"})),
    )
    .await
    .expect("execute_tool should succeed");

    let mut saw_progress = false;
    for _ in 0..20 {
        let Ok(event) = with_timeout(5, events.recv()).await else {
            break;
        };
        if matches!(event.kind, LifecycleEventKind::ToolProgress { .. }) {
            saw_progress = true;
            break;
        }
    }
    assert!(saw_progress, "expected a ToolProgress lifecycle event from the tools/progress notification");

    manager.shutdown().await;
}

/// S6: when the fleet cap would be exceeded, the pool evicts the
/// least-recently-used idle entry rather than refusing the new connection.
#[tokio::test]
async fn s6_pool_evicts_lru_idle_entry_over_fleet_cap() {
    skip_without_python3!();

    let mut configs = ServersConfig::default();
    configs.add(stdio_fixture_server("srv-a"));
    configs.add(stdio_fixture_server("srv-b"));
    configs.max_connections = 1;

    let (events_tx, _rx) = broadcast::channel(16);
    let pool = ConnectionPool::new(configs, events_tx);

    let a = with_timeout(10, pool.acquire("srv-a")).await.expect("acquire srv-a");
    pool.release(a).await;
    assert_eq!(pool.len().await, 1);

    // Acquiring srv-b over the cap of 1 should evict the idle srv-a entry
    // rather than erroring.
    let b = with_timeout(10, pool.acquire("srv-b")).await.expect("acquire srv-b");
    assert_eq!(pool.len().await, 1);
    pool.release(b).await;

    pool.shutdown().await;
}
