//! Structured lifecycle events emitted by sessions and the connection pool
//! (spec §6 "Configuration interface"; wire shape grounded in the teacher's
//! `ServerNotice` channel and the pack's connection-pool metrics channel).

use serde::Serialize;

/// A lifecycle event tagged with the server it concerns.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// The server this event concerns.
    pub server_id: String,
    /// What happened.
    pub kind: LifecycleEventKind,
}

/// The kinds of lifecycle event a session or pool can emit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "details", rename_all = "camelCase")]
pub enum LifecycleEventKind {
    /// A new pooled connection was created for this server.
    ConnectionCreated,
    /// The connection was lost unexpectedly.
    ConnectionLost {
        /// Human-readable cause.
        reason: String,
    },
    /// A transport or protocol error occurred that didn't drop the
    /// connection.
    ConnectionError {
        /// Human-readable cause.
        reason: String,
    },
    /// The session completed its handshake and discovery and is ready.
    ConnectionInitialized,
    /// The pool renewed (reconnected) this server's session, e.g. after
    /// exceeding `max_use_count`.
    ConnectionRenewed,
    /// The connection was closed deliberately.
    ConnectionClosed,
    /// A renewal attempt failed; the old session may still be in use.
    RenewalFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// An error occurred while disposing of a session or transport.
    CleanupError {
        /// Human-readable cause.
        reason: String,
    },
    /// A `notifications/tools/progress` update for a long-running tool call.
    ToolProgress {
        /// Raw `params` from the notification.
        params: Option<serde_json::Value>,
    },
    /// A `notifications/resources/updated` fired and resource re-discovery
    /// was kicked off in response.
    ResourcesUpdated,
    /// A server-initiated notification with no dedicated handling (not
    /// `notifications/log`, `.../resources/updated`, or `.../tools/progress`).
    Notification {
        /// The notification's method name.
        method: String,
        /// Raw `params` from the notification.
        params: Option<serde_json::Value>,
    },
}

impl LifecycleEvent {
    /// Build an event for `server_id`.
    #[must_use]
    pub fn new(server_id: impl Into<String>, kind: LifecycleEventKind) -> Self {
        Self {
            server_id: server_id.into(),
            kind,
        }
    }
}

/// A snapshot of a pool-wide health-check sweep (spec §4.E "Health check").
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Unix timestamp (seconds) when the sweep completed.
    pub checked_at: u64,
    /// Per-server health result.
    pub results: Vec<HealthResult>,
}

/// One server's result within a [`HealthReport`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    /// The server checked.
    pub server_id: String,
    /// Whether the check succeeded.
    pub healthy: bool,
    /// Failure detail, if any.
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_server_id() {
        let event = LifecycleEvent::new("srv-1", LifecycleEventKind::ConnectionInitialized);
        assert_eq!(event.server_id, "srv-1");
    }

    #[test]
    fn health_report_serializes() {
        let report = HealthReport {
            checked_at: 0,
            results: vec![HealthResult {
                server_id: "srv-1".into(),
                healthy: true,
                detail: None,
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("srv-1"));
    }
}
