//! MCP server configuration (spec §3 "Data model", §6 "Configuration
//! interface").
//!
//! `ServerConfig` describes one tool server; `ServersConfig` is a named
//! collection, loadable from a TOML file the way the teacher crate loads its
//! own server registry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{McpError, McpResult};
use crate::transport::http::Readiness;

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_idle_timeout_ms() -> u64 {
    300_000
}
fn default_max_use_count() -> u32 {
    1_000
}
fn default_ws_ping_interval_ms() -> u64 {
    30_000
}
fn default_ws_pong_timeout_ms() -> u64 {
    5_000
}
fn default_stdio_ready_delay_ms() -> u64 {
    100
}
fn default_stdio_grace_shutdown_ms() -> u64 {
    5_000
}
fn default_reconnect_max_attempts() -> u32 {
    10
}
fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}
fn default_max_connections() -> usize {
    50
}
fn default_true() -> bool {
    true
}

/// Which substrate a server is reached over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transport {
    /// Spawn a child process and speak newline-delimited JSON over its
    /// stdin/stdout.
    Stdio {
        /// Executable to run.
        command: String,
        /// Arguments passed to the executable.
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables merged on top of the current process's env.
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// POST JSON-RPC to `<base>/rpc`, probe readiness at `<base>/health`,
    /// optionally subscribe to `<base>/events`.
    Http {
        /// Base URL, e.g. `http://localhost:8080`.
        url: String,
        /// Extra headers merged into every request (auth tokens, etc).
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// A single persistent WebSocket connection.
    WebSocket {
        /// `ws://` or `wss://` URL.
        url: String,
        /// Optional bearer token sent as `Authorization: Bearer <token>`.
        #[serde(default)]
        auth_token: Option<String>,
    },
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server id (unique within a `ServersConfig`).
    #[serde(skip)]
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Which substrate to reach this server over.
    pub transport: Transport,
    /// Time allowed to establish the underlying connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Time allowed for any single RPC round trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long a pooled connection may sit unused before eviction.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Number of uses after which a pooled connection is proactively renewed.
    #[serde(default = "default_max_use_count")]
    pub max_use_count: u32,
    /// WebSocket ping cadence.
    #[serde(default = "default_ws_ping_interval_ms")]
    pub ws_ping_interval_ms: u64,
    /// WebSocket pong wait before the connection is considered dead.
    #[serde(default = "default_ws_pong_timeout_ms")]
    pub ws_pong_timeout_ms: u64,
    /// Delay after spawning a stdio child before it's considered ready.
    #[serde(default = "default_stdio_ready_delay_ms")]
    pub stdio_ready_delay_ms: u64,
    /// Grace period between `SIGTERM` and `SIGKILL` for a stdio child.
    #[serde(default = "default_stdio_grace_shutdown_ms")]
    pub stdio_grace_shutdown_ms: u64,
    /// Maximum WebSocket reconnect attempts before giving up.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    /// Base delay for WebSocket reconnect backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// HTTP `/health` probe strictness.
    #[serde(default)]
    pub readiness: Readiness,
    /// Whether the pool may renew (reconnect) this server while the old
    /// session is still briefly in use, vs. stop-then-start.
    #[serde(default = "default_true")]
    pub allow_concurrent_renewal: bool,
}

impl ServerConfig {
    /// Build a stdio server config with default timing knobs.
    #[must_use]
    pub fn stdio(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            id,
            Transport::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        )
    }

    /// Build an HTTP server config with default timing knobs.
    #[must_use]
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            Transport::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    /// Build a WebSocket server config with default timing knobs.
    #[must_use]
    pub fn websocket(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            Transport::WebSocket {
                url: url.into(),
                auth_token: None,
            },
        )
    }

    fn new(id: impl Into<String>, transport: Transport) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            transport,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_use_count: default_max_use_count(),
            ws_ping_interval_ms: default_ws_ping_interval_ms(),
            ws_pong_timeout_ms: default_ws_pong_timeout_ms(),
            stdio_ready_delay_ms: default_stdio_ready_delay_ms(),
            stdio_grace_shutdown_ms: default_stdio_grace_shutdown_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            readiness: Readiness::default(),
            allow_concurrent_renewal: true,
        }
    }

    /// Set the human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Override the idle eviction timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// A named collection of server configurations. Backed by an order-preserving
/// map: `findTool`'s fleet-wide scan (spec §4.F) visits servers in the order
/// they were added, not alphabetically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersConfig {
    /// Server configurations keyed by id, in insertion order.
    #[serde(default)]
    pub servers: IndexMap<String, ServerConfig>,
    /// Upper bound on simultaneously pooled connections (spec §4.E "fleet
    /// cap").
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServersConfig {
    // A derived `Default` would give `max_connections: 0`, not the fleet
    // cap's real default — `#[serde(default = ...)]` only fires on
    // deserialization.
    fn default() -> Self {
        Self {
            servers: IndexMap::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl ServersConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> McpResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| McpError::Config(format!("invalid config: {e}")))?;

        for (id, server) in &mut config.servers {
            server.id.clone_from(id);
            if server.name.is_empty() {
                server.name.clone_from(id);
            }
        }

        Ok(config)
    }

    /// Load from the default location (`./mcp-servers.toml` relative to the
    /// current working directory), returning an empty config if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_default() -> McpResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// The default config path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("mcp-servers.toml")
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialized.
    pub fn save(&self, path: impl AsRef<Path>) -> McpResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| McpError::Config(format!("failed to serialize config: {e}")))?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Look up a server by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.get(id)
    }

    /// Add or replace a server config.
    pub fn add(&mut self, config: ServerConfig) {
        self.servers.insert(config.id.clone(), config);
    }

    /// Remove a server config, preserving the relative order of the rest.
    pub fn remove(&mut self, id: &str) -> Option<ServerConfig> {
        self.servers.shift_remove(id)
    }

    /// List all configured server ids.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_config_has_sensible_defaults() {
        let config = ServerConfig::stdio("fs", "npx", vec!["-y".into(), "mcp-fs".into()]);
        assert_eq!(config.id, "fs");
        assert_eq!(config.max_use_count, 1_000);
        assert!(config.allow_concurrent_renewal);
        assert_eq!(config.readiness, Readiness::Lenient);
    }

    #[test]
    fn http_config_builder_overrides_timeouts() {
        let config = ServerConfig::http("remote", "http://localhost:9000")
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(15));
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn parses_from_toml() {
        let toml = r#"
max_connections = 20

[servers.fs]
transport = { kind = "stdio", command = "npx", args = ["-y", "mcp-fs"] }

[servers.remote]
transport = { kind = "http", url = "http://localhost:9000" }
"#;
        let config: ServersConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.servers.len(), 2);
        assert!(matches!(
            config.servers["fs"].transport,
            Transport::Stdio { .. }
        ));
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.toml");

        let mut config = ServersConfig::default();
        config.add(ServerConfig::websocket("ws-srv", "ws://localhost:9001"));
        config.save(&path).unwrap();

        let loaded = ServersConfig::load(&path).unwrap();
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.servers["ws-srv"].id, "ws-srv");
    }
}
