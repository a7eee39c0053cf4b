//! Connection pool: caches one [`McpSession`] per server id, evicts under a
//! fleet-wide cap, sweeps idle connections, renews on use-count overflow, and
//! runs concurrent health checks (spec §4.E "Connection pool").
//!
//! Lock ordering is always pool before session — callers never hold a
//! session lock while trying to acquire the pool's entry map lock — to avoid
//! the deadlock the design note for this component calls out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};

use crate::config::ServersConfig;
use crate::error::{LifecycleError, McpError, McpResult};
use crate::events::{HealthReport, HealthResult, LifecycleEvent, LifecycleEventKind};
use crate::session::McpSession;

/// Exponential backoff policy for session renewal after a failed attempt,
/// mirroring the teacher's server-restart backoff: zero delay for the first
/// attempt, doubling from a 30s base, capped at 300s.
#[derive(Debug, Clone, Copy)]
struct RenewalBackoff {
    base: Duration,
    cap: Duration,
    exponent: f64,
}

impl RenewalBackoff {
    const fn new(base: Duration, cap: Duration, exponent: f64) -> Self {
        Self { base, cap, exponent }
    }

    /// Delay before attempt `n` (0-indexed; `delay_for_attempt(0)` is zero).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let secs = self.base.as_secs_f64() * self.exponent.powi((attempt - 1) as i32);
        let secs = secs.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

fn renewal_backoff() -> RenewalBackoff {
    RenewalBackoff::new(Duration::from_secs(30), Duration::from_secs(300), 2.0)
}

struct PoolEntry {
    session: Arc<McpSession>,
    use_count: AtomicU32,
    in_flight: AtomicU32,
    last_used: RwLock<Instant>,
    last_renewal_attempt: RwLock<Option<Instant>>,
    renewal_failures: AtomicU32,
}

impl PoolEntry {
    fn new(session: Arc<McpSession>) -> Self {
        Self {
            session,
            use_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            last_used: RwLock::new(Instant::now()),
            last_renewal_attempt: RwLock::new(None),
            renewal_failures: AtomicU32::new(0),
        }
    }
}

/// A guard returned by [`ConnectionPool::acquire`]. Dropping it does not
/// release the checkout — callers must call [`ConnectionPool::release`]
/// explicitly so the pool can decide whether to renew before the next use.
pub struct Checkout {
    /// The server id this checkout is for.
    pub server_id: String,
    /// The checked-out session.
    pub session: Arc<McpSession>,
}

/// Caches and manages per-server [`McpSession`]s under a fleet-wide cap.
pub struct ConnectionPool {
    configs: ServersConfig,
    entries: RwLock<HashMap<String, Arc<PoolEntry>>>,
    events_tx: broadcast::Sender<LifecycleEvent>,
}

impl ConnectionPool {
    /// Build a pool over `configs`, with lifecycle events broadcast on
    /// `events_tx` (share one sender across the pool and manager so
    /// `McpManager::subscribe` sees every session's events).
    #[must_use]
    pub fn new(configs: ServersConfig, events_tx: broadcast::Sender<LifecycleEvent>) -> Self {
        Self {
            configs,
            entries: RwLock::new(HashMap::new()),
            events_tx,
        }
    }

    fn emit(&self, server_id: &str, kind: LifecycleEventKind) {
        self.events_tx
            .send(LifecycleEvent::new(server_id.to_string(), kind))
            .ok();
    }

    /// Acquire a ready session for `server_id`, connecting or renewing it as
    /// needed. Triggers LRU eviction first if the fleet cap would otherwise
    /// be exceeded by adding a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::UnknownServer`] if `server_id` isn't configured,
    /// or propagates the session's connect error.
    pub async fn acquire(&self, server_id: &str) -> McpResult<Checkout> {
        if let Some(entry) = self.existing_entry(server_id).await {
            if !entry.session.is_ready().await {
                self.renew(server_id, &entry).await?;
            }
            entry.in_flight.fetch_add(1, Ordering::SeqCst);
            *entry.last_used.write().await = Instant::now();
            return Ok(Checkout {
                server_id: server_id.to_string(),
                session: Arc::clone(&entry.session),
            });
        }

        let config = self
            .configs
            .get(server_id)
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?
            .clone();

        self.evict_for_new_entry().await;

        let session = Arc::new(McpSession::new(config, self.events_tx.clone()));
        session.connect().await?;

        let entry = Arc::new(PoolEntry::new(Arc::clone(&session)));
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .await
            .insert(server_id.to_string(), Arc::clone(&entry));

        Ok(Checkout {
            server_id: server_id.to_string(),
            session,
        })
    }

    async fn existing_entry(&self, server_id: &str) -> Option<Arc<PoolEntry>> {
        self.entries.read().await.get(server_id).cloned()
    }

    /// Release a checkout. Bumps the use count and, if `max_use_count` has
    /// been exceeded, schedules an async renewal (gated by
    /// `allow_concurrent_renewal`).
    pub async fn release(&self, checkout: Checkout) {
        let Some(entry) = self.existing_entry(&checkout.server_id).await else {
            return;
        };
        entry.in_flight.fetch_sub(1, Ordering::SeqCst);
        let uses = entry.use_count.fetch_add(1, Ordering::SeqCst) + 1;

        let Some(config) = self.configs.get(&checkout.server_id) else {
            return;
        };
        if uses < config.max_use_count {
            return;
        }

        if config.allow_concurrent_renewal {
            let pool_entries = Arc::clone(&entry);
            let server_id = checkout.server_id.clone();
            let events_tx = self.events_tx.clone();
            let config = config.clone();
            tokio::spawn(async move {
                renew_entry(&server_id, &pool_entries, &config, &events_tx).await;
            });
        } else if entry.in_flight.load(Ordering::SeqCst) == 0 {
            if let Err(e) = self.renew(&checkout.server_id, &entry).await {
                tracing::warn!(server = %checkout.server_id, error = %e, "renewal failed");
            }
        }
    }

    async fn renew(&self, server_id: &str, entry: &Arc<PoolEntry>) -> McpResult<()> {
        let Some(config) = self.configs.get(server_id) else {
            return Err(McpError::UnknownServer(server_id.to_string()));
        };
        renew_entry(server_id, entry, config, &self.events_tx).await;
        if entry.session.is_ready().await {
            Ok(())
        } else {
            Err(McpError::from(LifecycleError::Disposed))
        }
    }

    /// Evict enough idle (not currently checked-out) entries so that adding
    /// one more stays within `max_connections`. Evicts the least-recently-used
    /// idle entry first; if every entry is in flight, does nothing (the new
    /// entry is simply added over cap, per the design note that an in-flight
    /// session is never forcibly evicted).
    async fn evict_for_new_entry(&self) {
        let max_connections = self.configs.max_connections;
        loop {
            let over_cap = {
                let entries = self.entries.read().await;
                entries.len() + 1 > max_connections
            };
            if !over_cap {
                break;
            }

            let victim = {
                let entries = self.entries.read().await;
                let mut candidates = Vec::new();
                for (id, entry) in entries.iter() {
                    if entry.in_flight.load(Ordering::SeqCst) == 0 {
                        candidates.push((id.clone(), *entry.last_used.read().await));
                    }
                }
                candidates.into_iter().min_by_key(|(_, last_used)| *last_used).map(|(id, _)| id)
            };

            let Some(victim_id) = victim else {
                break;
            };

            let evicted = self.entries.write().await.remove(&victim_id);
            if let Some(entry) = evicted {
                entry.session.disconnect().await;
                self.emit(&victim_id, LifecycleEventKind::ConnectionClosed);
            }
        }
    }

    /// Evict idle entries whose `last_used` exceeds their configured
    /// `idle_timeout`. Intended to be driven by [`ConnectionPool::spawn_idle_sweep`].
    pub async fn sweep_idle(&self) {
        let victims: Vec<String> = {
            let entries = self.entries.read().await;
            let mut out = Vec::new();
            for (id, entry) in entries.iter() {
                if entry.in_flight.load(Ordering::SeqCst) != 0 {
                    continue;
                }
                let Some(config) = self.configs.get(id) else {
                    continue;
                };
                let idle_for = entry.last_used.read().await.elapsed();
                if idle_for >= config.idle_timeout() {
                    out.push(id.clone());
                }
            }
            out
        };

        for id in victims {
            let evicted = self.entries.write().await.remove(&id);
            if let Some(entry) = evicted {
                entry.session.disconnect().await;
                self.emit(&id, LifecycleEventKind::ConnectionClosed);
            }
        }
    }

    /// Spawn a background task that calls [`ConnectionPool::sweep_idle`] on
    /// an interval of `idle_timeout / 4` (using the smallest configured
    /// `idle_timeout` across all servers, or 60s if none are configured).
    pub fn spawn_idle_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let shortest_idle = pool
            .configs
            .servers
            .values()
            .map(|c| c.idle_timeout())
            .min()
            .unwrap_or_else(|| Duration::from_secs(240));
        let period = (shortest_idle / 4).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                pool.sweep_idle().await;
            }
        })
    }

    /// Run a health check (ping) against every currently pooled session
    /// concurrently, producing a snapshot report. Servers with no pooled
    /// session are reported healthy=false with a "not connected" detail.
    pub async fn health_check(&self) -> HealthReport {
        let entries: Vec<(String, Arc<PoolEntry>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        let checks = entries.into_iter().map(|(id, entry)| async move {
            match entry.session.ping().await {
                Ok(()) => HealthResult {
                    server_id: id,
                    healthy: true,
                    detail: None,
                },
                Err(e) => HealthResult {
                    server_id: id,
                    healthy: false,
                    detail: Some(e.to_string()),
                },
            }
        });

        let results = futures::future::join_all(checks).await;
        let checked_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        HealthReport { checked_at, results }
    }

    /// Disconnect and drop every pooled session.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        for (id, entry) in entries.drain() {
            entry.session.disconnect().await;
            self.emit(&id, LifecycleEventKind::ConnectionClosed);
        }
    }

    /// Number of currently pooled sessions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the pool currently holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

async fn renew_entry(
    server_id: &str,
    entry: &Arc<PoolEntry>,
    config: &crate::config::ServerConfig,
    events_tx: &broadcast::Sender<LifecycleEvent>,
) {
    let backoff = renewal_backoff();
    let attempt = entry.renewal_failures.load(Ordering::SeqCst);
    if let Some(last) = *entry.last_renewal_attempt.read().await {
        if last.elapsed() < backoff.delay_for_attempt(attempt) {
            return;
        }
    }
    *entry.last_renewal_attempt.write().await = Some(Instant::now());
    entry.session.note_restart_attempt().await;

    entry.session.disconnect().await;
    match entry.session.connect().await {
        Ok(()) => {
            entry.use_count.store(0, Ordering::SeqCst);
            entry.renewal_failures.store(0, Ordering::SeqCst);
            events_tx
                .send(LifecycleEvent::new(
                    server_id.to_string(),
                    LifecycleEventKind::ConnectionRenewed,
                ))
                .ok();
        },
        Err(e) => {
            entry.renewal_failures.fetch_add(1, Ordering::SeqCst);
            events_tx
                .send(LifecycleEvent::new(
                    server_id.to_string(),
                    LifecycleEventKind::RenewalFailed {
                        reason: e.to_string(),
                    },
                ))
                .ok();
        },
    }
    let _ = config;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn configs_with(server: ServerConfig) -> ServersConfig {
        let mut configs = ServersConfig::default();
        configs.add(server);
        configs
    }

    #[test]
    fn renewal_backoff_matches_teacher_curve() {
        let backoff = renewal_backoff();
        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(300));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn acquire_unknown_server_is_an_error() {
        let configs = ServersConfig::default();
        let (tx, _rx) = broadcast::channel(16);
        let pool = ConnectionPool::new(configs, tx);
        let result = pool.acquire("nope").await;
        assert!(matches!(result, Err(McpError::UnknownServer(_))));
    }

    #[tokio::test]
    async fn pool_starts_empty() {
        let configs = configs_with(ServerConfig::stdio("echo", "cat", vec![]));
        let (tx, _rx) = broadcast::channel(16);
        let pool = ConnectionPool::new(configs, tx);
        assert!(pool.is_empty().await);
        assert_eq!(pool.len().await, 0);
    }
}
