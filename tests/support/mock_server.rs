//! Fixture MCP servers for the end-to-end scenario tests.
//!
//! A real JSON-RPC counterpart for each transport, spawned or bound fresh
//! per test, the same way the teacher's plugin e2e tests drive a real `node`
//! process behind a skip-if-absent guard rather than faking the protocol in
//! process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcp_runtime::{ServerConfig, ServersConfig};
use tokio::net::TcpListener;

/// `true` when `python3` is on `$PATH`. The stdio fixture server is a small
/// Python script; skip stdio scenarios in environments without it, mirroring
/// the teacher's `node_available()` guard.
pub fn python3_available() -> bool {
    which::which("python3").is_ok()
}

/// A tiny stdio JSON-RPC server: handshakes, advertises an `echo` and a
/// `crash` tool, and answers `ping`. `crash` exits the process without
/// responding, for exercising the unexpected-disconnect path.
const STDIO_FIXTURE: &str = r#"
import sys, json

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        msg = json.loads(line)
    except Exception:
        continue
    method = msg.get("method")
    mid = msg.get("id")
    params = msg.get("params") or {}

    if method == "initialize":
        send({"jsonrpc": "2.0", "id": mid, "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"list": True, "execute": True}, "resources": {}},
            "instructions": "fixture server",
        }})
    elif method == "notifications/initialized":
        continue
    elif method == "tools/list":
        send({"jsonrpc": "2.0", "id": mid, "result": {"tools": [
            {
                "name": "echo",
                "description": "Echo the given text back",
                "inputSchema": {
                    "type": "object",
                    "required": ["text"],
                    "properties": {"text": {"type": "string"}},
                },
            },
            {
                "name": "slow",
                "description": "Sleep before responding",
                "inputSchema": {"type": "object"},
            },
            {
                "name": "crash",
                "description": "Exit without responding",
                "inputSchema": {"type": "object"},
            },
        ]}})
    elif method == "resources/list":
        send({"jsonrpc": "2.0", "id": mid, "result": {"resources": []}})
    elif method == "prompts/list":
        send({"jsonrpc": "2.0", "id": mid, "result": {"prompts": []}})
    elif method == "ping":
        send({"jsonrpc": "2.0", "id": mid, "result": {}})
    elif method == "tools/execute":
        name = params.get("name")
        args = params.get("arguments") or {}
        if name == "echo":
            send({"jsonrpc": "2.0", "method": "notifications/tools/progress", "params": {"progress": 1.0}})
            send({"jsonrpc": "2.0", "id": mid, "result": {
                "content": [{"type": "text", "text": args.get("text", "")}],
                "isError": False,
            }})
        elif name == "slow":
            import time
            time.sleep(2)
            send({"jsonrpc": "2.0", "id": mid, "result": {
                "content": [{"type": "text", "text": "done"}],
                "isError": False,
            }})
        elif name == "crash":
            sys.exit(1)
        else:
            send({"jsonrpc": "2.0", "id": mid, "error": {"code": -32002, "message": "unknown tool"}})
    else:
        send({"jsonrpc": "2.0", "id": mid, "error": {"code": -32601, "message": "method not found"}})
"#;

/// Build a `ServerConfig` bound to the fixture script above, with default
/// timing knobs. Callers needing a shorter request timeout (S3) or a tweaked
/// idle timeout (S6) can chain `.with_request_timeout(..)` etc. before
/// adding it to a `ServersConfig`.
#[must_use]
pub fn stdio_fixture_server(server_id: &str) -> ServerConfig {
    ServerConfig::stdio(
        server_id,
        "python3",
        vec!["-u".into(), "-c".into(), STDIO_FIXTURE.into()],
    )
}

/// Build a `ServersConfig` with one stdio server named `server_id`, backed
/// by the fixture script above.
#[must_use]
pub fn stdio_fixture_config(server_id: &str) -> ServersConfig {
    let mut configs = ServersConfig::default();
    configs.add(stdio_fixture_server(server_id));
    configs
}

/// Accept WebSocket connections on an ephemeral `127.0.0.1` port. When
/// `kill_first_connection` is set, the first accepted connection is closed
/// immediately after the handshake (simulating a server restart); every
/// later connection is kept open, echoing pings, until the client closes it.
/// Returns the `ws://` URL to connect to.
pub async fn spawn_ws_fixture(kill_first_connection: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let url = format!("ws://{addr}");

    let connection_count = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let n = connection_count.fetch_add(1, Ordering::SeqCst);
            let kill_this_one = kill_first_connection && n == 0;
            tokio::spawn(async move {
                run_ws_connection(stream, kill_this_one).await;
            });
        }
    });

    url
}

async fn run_ws_connection(stream: tokio::net::TcpStream, kill_immediately: bool) {
    use futures_util::StreamExt;

    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    if kill_immediately {
        let _ = ws.close(None).await;
        return;
    }

    // Stay open, driving tungstenite's automatic ping/pong and close
    // handling, until the client hangs up.
    while ws.next().await.transpose().ok().flatten().is_some() {}
}

/// Small helper so scenario tests don't each hand-roll a timeout wrapper.
pub async fn with_timeout<F: std::future::Future>(secs: u64, fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .expect("operation timed out")
}
