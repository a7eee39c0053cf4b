//! Multi-transport MCP client runtime.
//!
//! This crate maintains long-lived JSON-RPC 2.0 sessions to heterogeneous
//! MCP tool servers over three transports — stdio child process, HTTP+SSE,
//! and WebSocket — and exposes a single facade for discovering and invoking
//! their tools, resources, and prompts.
//!
//! # Architecture
//!
//! - [`protocol`]: JSON-RPC 2.0 framing, structural validation, MCP method
//!   names and error codes.
//! - [`transport`]: one implementation per substrate (stdio/HTTP/WebSocket),
//!   each moving [`protocol::Frame`]s in and out behind a common trait.
//! - [`correlator`]: matches responses to outstanding requests by id,
//!   enforces per-request timeouts, fans notifications out by method.
//! - [`session`]: the per-server state machine — connect, handshake,
//!   discover, serve `executeTool`/`getResource` — gated by capability and
//!   pre-flight argument validation.
//! - [`pool`]: caches sessions per server id under a fleet-wide cap, evicts
//!   LRU and idle entries, renews on use-count overflow, runs health checks.
//! - [`manager`]: the public facade — `findTool`/`executeTool`/`listTools`/
//!   `listResources`/`getResource`/`testConnection`.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcp_runtime::{McpManager, ServerConfig, ServersConfig};
//!
//! # async fn example() -> Result<(), mcp_runtime::McpError> {
//! let mut config = ServersConfig::default();
//! config.add(ServerConfig::stdio(
//!     "filesystem",
//!     "npx",
//!     vec!["-y".into(), "@anthropics/mcp-server-filesystem".into(), "/tmp".into()],
//! ));
//!
//! let manager = McpManager::new(config);
//!
//! let tools = manager.list_tools().await;
//! for tool in tools {
//!     println!("tool: {}", tool.full_name());
//! }
//!
//! let result = manager
//!     .execute_tool("filesystem", "read_file", serde_json::json!({"path": "/tmp/test.txt"}))
//!     .await?;
//! println!("result: {}", result.text_content());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod manager;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
pub mod validation;

pub use config::{ServerConfig, ServersConfig, Transport};
pub use error::{McpError, McpResult};
pub use events::{HealthReport, HealthResult, LifecycleEvent, LifecycleEventKind};
pub use manager::McpManager;
pub use pool::{Checkout, ConnectionPool};
pub use protocol::{Frame, RequestId, RpcErrorObject};
pub use session::{McpSession, SessionState, SessionStatus};
pub use transport::http::Readiness;
pub use types::{
    PromptArgument, PromptContent, PromptDefinition, PromptMessage, ResourceContent,
    ResourceDefinition, ServerCapabilities, ServerInfo, ToolContent, ToolDefinition,
    ToolResult, ToolsCapability,
};
