//! MCP method name constants and the JSON-RPC/MCP error code table (spec §6).

/// `initialize` — handshake request sent once per session.
pub const INITIALIZE: &str = "initialize";
/// `notifications/initialized` — sent after the handshake completes.
pub const NOTIFICATIONS_INITIALIZED: &str = "notifications/initialized";
/// `tools/list` — discover available tools.
pub const TOOLS_LIST: &str = "tools/list";
/// `tools/execute` — invoke a tool by name.
pub const TOOLS_EXECUTE: &str = "tools/execute";
/// `resources/list` — discover available resources.
pub const RESOURCES_LIST: &str = "resources/list";
/// `resources/get` — fetch a resource's content.
pub const RESOURCES_GET: &str = "resources/get";
/// `resources/watch` — subscribe to updates for a resource.
pub const RESOURCES_WATCH: &str = "resources/watch";
/// `resources/unwatch` — unsubscribe from a resource's updates.
pub const RESOURCES_UNWATCH: &str = "resources/unwatch";
/// `prompts/list` — discover available prompts.
pub const PROMPTS_LIST: &str = "prompts/list";
/// `prompts/get` — fetch a rendered prompt.
pub const PROMPTS_GET: &str = "prompts/get";
/// `logging/setLevel` — adjust the server's log verbosity.
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
/// `ping` — liveness probe.
pub const PING: &str = "ping";

/// `notifications/log` — server-emitted log line.
pub const NOTIFICATIONS_LOG: &str = "notifications/log";
/// `notifications/resources/updated` — a watched resource changed.
pub const NOTIFICATIONS_RESOURCES_UPDATED: &str = "notifications/resources/updated";
/// `notifications/tools/progress` — progress update for a long-running tool call.
pub const NOTIFICATIONS_TOOLS_PROGRESS: &str = "notifications/tools/progress";

/// Standard JSON-RPC and MCP-extension error codes (spec §6).
pub mod error_code {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Generic server-side error.
    pub const SERVER_ERROR: i64 = -32000;
    /// A transport-level failure (connection dropped, write failed, etc).
    pub const TRANSPORT_ERROR: i64 = -32001;
    /// Request exceeded its deadline.
    pub const TIMEOUT: i64 = -32002;
    /// Authentication failed.
    pub const AUTH_ERROR: i64 = -32003;
    /// Authenticated, but not authorized for the requested operation.
    pub const AUTHORIZATION_ERROR: i64 = -32004;
    /// Named tool or resource is not known to the server.
    pub const RESOURCE_NOT_FOUND: i64 = -32005;
    /// The server is busy and cannot serve this request right now.
    pub const RESOURCE_BUSY: i64 = -32006;
    /// Tool execution raised `isError: true`.
    pub const TOOL_EXECUTION_ERROR: i64 = -32007;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_in_expected_ranges() {
        assert!(error_code::PARSE_ERROR < -32600);
        assert!((-32099..=-32000).contains(&error_code::SERVER_ERROR));
        assert!((-32099..=-32000).contains(&error_code::TOOL_EXECUTION_ERROR));
    }

    #[test]
    fn error_codes_match_spec_table() {
        assert_eq!(error_code::SERVER_ERROR, -32000);
        assert_eq!(error_code::TRANSPORT_ERROR, -32001);
        assert_eq!(error_code::TIMEOUT, -32002);
        assert_eq!(error_code::AUTH_ERROR, -32003);
        assert_eq!(error_code::AUTHORIZATION_ERROR, -32004);
        assert_eq!(error_code::RESOURCE_NOT_FOUND, -32005);
        assert_eq!(error_code::RESOURCE_BUSY, -32006);
        assert_eq!(error_code::TOOL_EXECUTION_ERROR, -32007);
    }
}
