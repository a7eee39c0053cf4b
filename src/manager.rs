//! The public facade: `find_tool`/`execute_tool`/`list_tools`/`list_resources`/
//! `get_resource`/`test_connection` over a [`ConnectionPool`] of per-server
//! sessions (spec §4.F "Manager facade").
//!
//! Aggregate operations (`list_tools`, `list_resources`) fan out across every
//! configured server concurrently and settle all of them before returning: a
//! failure on one server is logged and excluded from the result rather than
//! failing, or serializing behind, the whole call. `find_tool` scans servers
//! in insertion order and returns on the first match. Targeted operations
//! (`execute_tool`, `get_resource`, `test_connection`) propagate the
//! server's error verbatim and always release the pooled connection, even on
//! error.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::ServersConfig;
use crate::error::{McpError, McpResult};
use crate::events::{HealthReport, LifecycleEvent};
use crate::pool::ConnectionPool;
use crate::session::SessionStatus;
use crate::types::{ResourceContent, ResourceDefinition, ToolDefinition, ToolResult};

/// Facade over a connection pool, exposing the tool/resource surface an
/// agent loop calls into.
#[derive(Clone)]
pub struct McpManager {
    pool: Arc<ConnectionPool>,
    events_tx: broadcast::Sender<LifecycleEvent>,
    server_ids: Arc<Vec<String>>,
}

impl McpManager {
    /// Build a manager over `configs`. Spawns the pool's idle-eviction
    /// background sweep.
    #[must_use]
    pub fn new(configs: ServersConfig) -> Self {
        let (events_tx, _rx) = broadcast::channel(1024);
        // `configs.list()` walks the backing `IndexMap` in insertion order;
        // `findTool`'s fleet-wide scan (spec §4.F) depends on that order.
        let server_ids: Vec<String> = configs.list().into_iter().map(String::from).collect();
        let pool = Arc::new(ConnectionPool::new(configs, events_tx.clone()));
        pool.spawn_idle_sweep();
        Self {
            pool,
            events_tx,
            server_ids: Arc::new(server_ids),
        }
    }

    /// Subscribe to lifecycle events across every pooled server.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    /// Configured server ids, in insertion order.
    #[must_use]
    pub fn server_ids(&self) -> &[String] {
        &self.server_ids
    }

    /// Find the first tool named `tool_name` across all configured servers.
    /// Per-server failures (connect errors, etc.) are logged and skipped.
    pub async fn find_tool(&self, tool_name: &str) -> Option<ToolDefinition> {
        for server_id in self.server_ids.iter() {
            let checkout = match self.pool.acquire(server_id).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(server = %server_id, error = %e, "find_tool: acquire failed");
                    continue;
                },
            };
            let tools = checkout.session.list_tools().await;
            let found = tools.into_iter().find(|t| t.name == tool_name);
            self.pool.release(checkout).await;
            if let Some(tool) = found {
                return Some(tool);
            }
        }
        None
    }

    /// List tools from every configured server, fanning the acquire/list out
    /// concurrently and merging results. Per-server failures are logged and
    /// excluded rather than failing the whole call.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let fetches = self.server_ids.iter().map(|server_id| async move {
            match self.pool.acquire(server_id).await {
                Ok(checkout) => {
                    let tools = checkout.session.list_tools().await;
                    self.pool.release(checkout).await;
                    tools
                },
                Err(e) => {
                    tracing::warn!(server = %server_id, error = %e, "list_tools: acquire failed");
                    Vec::new()
                },
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// List resources. With `server_id` given, scopes to that server's
    /// discovered resources. With `server_id` omitted, fans the acquire/list
    /// out concurrently across every configured server and merges results,
    /// same settle-all semantics as [`McpManager::list_tools`].
    ///
    /// # Errors
    ///
    /// When `server_id` is given, returns whatever error the pool produces
    /// acquiring that server's session.
    pub async fn list_resources(
        &self,
        server_id: Option<&str>,
    ) -> McpResult<Vec<ResourceDefinition>> {
        if let Some(server_id) = server_id {
            let checkout = self.pool.acquire(server_id).await?;
            let resources = checkout.session.list_resources().await;
            self.pool.release(checkout).await;
            return Ok(resources);
        }

        let fetches = self.server_ids.iter().map(|server_id| async move {
            match self.pool.acquire(server_id).await {
                Ok(checkout) => {
                    let resources = checkout.session.list_resources().await;
                    self.pool.release(checkout).await;
                    resources
                },
                Err(e) => {
                    tracing::warn!(server = %server_id, error = %e, "list_resources: acquire failed");
                    Vec::new()
                },
            }
        });
        Ok(join_all(fetches).await.into_iter().flatten().collect())
    }

    /// Execute a tool on a specific server. Propagates the session's error
    /// verbatim; the pooled connection is always released, even on error.
    ///
    /// # Errors
    ///
    /// Returns whatever error the session produces: acquire failure,
    /// capability gating, argument validation, or a server-side RPC error.
    pub async fn execute_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        args: Value,
    ) -> McpResult<ToolResult> {
        let checkout = self.pool.acquire(server_id).await?;
        let result = checkout.session.execute_tool(tool_name, args).await;
        self.pool.release(checkout).await;
        result
    }

    /// Fetch a resource from a specific server. Same always-release
    /// guarantee as [`McpManager::execute_tool`].
    ///
    /// # Errors
    ///
    /// Returns whatever error the session produces.
    pub async fn get_resource(&self, server_id: &str, uri: &str) -> McpResult<ResourceContent> {
        let checkout = self.pool.acquire(server_id).await?;
        let result = checkout.session.get_resource(uri).await;
        self.pool.release(checkout).await;
        result
    }

    /// Verify a specific server is reachable and ready, without relying on
    /// cached state. Always releases the pooled connection.
    ///
    /// # Errors
    ///
    /// Returns whatever error the session produces on acquire or ping.
    pub async fn test_connection(&self, server_id: &str) -> McpResult<()> {
        let checkout = self.pool.acquire(server_id).await?;
        let result = checkout.session.ping().await;
        self.pool.release(checkout).await;
        result
    }

    /// Snapshot every currently pooled session's status.
    pub async fn server_statuses(&self) -> Vec<SessionStatus> {
        let mut statuses = Vec::new();
        for server_id in self.server_ids.iter() {
            if let Ok(checkout) = self.pool.acquire(server_id).await {
                statuses.push(checkout.session.status().await);
                self.pool.release(checkout).await;
            }
        }
        statuses
    }

    /// Run a concurrent health check across every currently pooled session.
    pub async fn health_check(&self) -> HealthReport {
        self.pool.health_check().await
    }

    /// Disconnect every pooled session and stop the idle sweep (the sweep
    /// task is detached and will simply find an empty pool on its next
    /// tick).
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("server_ids", &self.server_ids)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn find_tool_returns_none_when_no_servers_configured() {
        let manager = McpManager::new(ServersConfig::default());
        assert!(manager.find_tool("anything").await.is_none());
    }

    #[tokio::test]
    async fn execute_tool_on_unknown_server_is_an_error() {
        let manager = McpManager::new(ServersConfig::default());
        let result = manager
            .execute_tool("nope", "tool", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(McpError::UnknownServer(_))));
    }

    #[tokio::test]
    async fn server_ids_preserve_insertion_order() {
        let mut configs = ServersConfig::default();
        configs.add(ServerConfig::stdio("b", "cat", vec![]));
        configs.add(ServerConfig::stdio("a", "cat", vec![]));
        let manager = McpManager::new(configs);
        assert_eq!(manager.server_ids(), &["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn list_resources_with_unknown_server_id_is_an_error() {
        let manager = McpManager::new(ServersConfig::default());
        let result = manager.list_resources(Some("nope")).await;
        assert!(matches!(result, Err(McpError::UnknownServer(_))));
    }

    #[tokio::test]
    async fn list_resources_with_no_servers_configured_is_empty() {
        let manager = McpManager::new(ServersConfig::default());
        let result = manager.list_resources(None).await.unwrap();
        assert!(result.is_empty());
    }
}
