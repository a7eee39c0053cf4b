//! RPC correlator: matches responses to outstanding requests by id, enforces
//! per-request timeouts, and fans notifications out by method name (spec
//! §4.C).
//!
//! Response ordering is never assumed — a response for request 3 may arrive
//! before the response for request 1. Matching is purely by [`RequestId`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex};

use crate::error::RpcError;
use crate::protocol::{Frame, RequestId, RpcErrorObject};

/// Outcome of a completed request: the raw `result` or an `RpcErrorObject`.
pub type RpcOutcome = Result<serde_json::Value, RpcErrorObject>;

struct Pending {
    waiter: oneshot::Sender<RpcOutcome>,
}

/// Tracks outstanding requests for one session and dispatches notifications.
pub struct Correlator {
    server_id: String,
    counter: AtomicU64,
    pending: Mutex<HashMap<RequestId, Pending>>,
    notifications: broadcast::Sender<Frame>,
}

impl Correlator {
    /// Create a correlator for the given server id, used as the id prefix.
    #[must_use]
    pub fn new(server_id: impl Into<String>) -> Self {
        let (notifications, _rx) = broadcast::channel(256);
        Self {
            server_id: server_id.into(),
            counter: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            notifications,
        }
    }

    /// Generate the next request id: `"<server-id>-<monotonic counter>"`.
    pub fn next_id(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        RequestId::Str(format!("{}-{}", self.server_id, n))
    }

    /// Subscribe to server-initiated notifications.
    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Frame> {
        self.notifications.subscribe()
    }

    /// Register a pending request, then wait for its response or for
    /// `timeout` to elapse. On timeout the pending entry is removed eagerly.
    pub async fn wait_for(&self, id: RequestId, timeout: Duration) -> Result<RpcOutcome, RpcError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), Pending { waiter: tx });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(RpcError::Timeout),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Timeout)
            },
        }
    }

    /// Dispatch an incoming frame: resolves a pending request if it's a
    /// response, or fans it out to notification subscribers otherwise.
    pub async fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Response { id, outcome } => {
                let pending = {
                    let mut map = self.pending.lock().await;
                    map.remove(&id)
                };
                if let Some(pending) = pending {
                    let _ = pending.waiter.send(outcome);
                }
            },
            Frame::Notification { .. } => {
                let _ = self.notifications.send(frame);
            },
            Frame::Request { .. } => {
                // Servers don't send us requests in this design; ignore.
            },
        }
    }

    /// Cancel a pending request eagerly, removing it without resolving the
    /// waiter (the caller's future is dropped separately).
    pub async fn cancel(&self, id: &RequestId) {
        self.pending.lock().await.remove(id);
    }

    /// Number of requests still awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Fail every pending request immediately (used on disconnect).
    pub async fn fail_all(&self) {
        let mut map = self.pending.lock().await;
        for (_, pending) in map.drain() {
            let _ = pending.waiter.send(Err(RpcErrorObject {
                code: crate::protocol::methods::error_code::TRANSPORT_ERROR,
                message: "connection closed".into(),
                data: None,
            }));
        }
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_monotonic_and_prefixed() {
        let correlator = Correlator::new("srv-1");
        let a = correlator.next_id();
        let b = correlator.next_id();
        assert_eq!(a, RequestId::Str("srv-1-0".into()));
        assert_eq!(b, RequestId::Str("srv-1-1".into()));
    }

    #[tokio::test]
    async fn resolves_matching_response_out_of_order() {
        let correlator = Correlator::new("srv-1");
        let id1 = RequestId::Str("srv-1-0".into());
        let id2 = RequestId::Str("srv-1-1".into());

        let correlator = Arc::new(correlator);
        let c1 = Arc::clone(&correlator);
        let c2 = Arc::clone(&correlator);
        let id1_wait = id1.clone();
        let id2_wait = id2.clone();
        let fut1 = tokio::spawn(async move { c1.wait_for(id1_wait, Duration::from_secs(5)).await });
        let fut2 = tokio::spawn(async move { c2.wait_for(id2_wait, Duration::from_secs(5)).await });

        // give the spawned waits a chance to register before dispatching
        tokio::task::yield_now().await;

        correlator
            .dispatch(Frame::response_ok(id2.clone(), serde_json::json!("second")))
            .await;
        correlator
            .dispatch(Frame::response_ok(id1.clone(), serde_json::json!("first")))
            .await;

        let out1 = fut1.await.unwrap().unwrap().unwrap();
        let out2 = fut2.await.unwrap().unwrap().unwrap();
        assert_eq!(out1, serde_json::json!("first"));
        assert_eq!(out2, serde_json::json!("second"));
    }

    #[tokio::test]
    async fn times_out_when_no_response_arrives() {
        let correlator = Correlator::new("srv-1");
        let id = correlator.next_id();
        let result = correlator.wait_for(id, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(RpcError::Timeout)));
    }

    #[tokio::test]
    async fn notifications_fan_out_to_subscribers() {
        let correlator = Correlator::new("srv-1");
        let mut sub = correlator.subscribe_notifications();
        correlator
            .dispatch(Frame::notification("notifications/log", None))
            .await;
        let frame = sub.recv().await.unwrap();
        assert!(matches!(frame, Frame::Notification { method, .. } if method == "notifications/log"));
    }

    #[tokio::test]
    async fn cancel_removes_pending_entry() {
        let correlator = Arc::new(Correlator::new("srv-1"));
        let id = correlator.next_id();
        let waiter = Arc::clone(&correlator);
        let id_wait = id.clone();
        let _handle =
            tokio::spawn(async move { waiter.wait_for(id_wait, Duration::from_secs(5)).await });

        tokio::task::yield_now().await;
        assert_eq!(correlator.pending_count().await, 1);
        correlator.cancel(&id).await;
        assert_eq!(correlator.pending_count().await, 0);
    }
}
