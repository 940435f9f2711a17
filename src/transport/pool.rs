//! Keyed pool of idle connections.
//!
//! Connections are cached per [`ConnectionKey`] in recency order and handed
//! out LIFO. A background cleaner task evicts idle connections and exits
//! once the pool is empty.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ConnectionPool                │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ key A → [newest, ..., oldest]          │  │
//! │  │ key B → [newest, ..., oldest]          │  │
//! │  └────────────────────────────────────────┘  │
//! │        ▲ release (front)   evict (back) ▼    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Cleaner
//!
//! The cleaner is started lazily by the first release into an idle pool.
//! It wakes every `cleaner_interval`, or immediately when the pool becomes
//! empty, and removes connections idle for at least `idle_expiration`.
//! Its running flag lives under the pool mutex, so a release racing the
//! cleaner's exit always restarts it.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::Result;
use crate::options::PoolOptions;
use crate::transport::connection::Connection;
use crate::transport::connector::Connector;
use crate::transport::key::ConnectionKey;

// ============================================================================
// Types
// ============================================================================

/// Pool index: key to connections, newest first.
type PoolIndex = FxHashMap<ConnectionKey, VecDeque<Connection>>;

/// State guarded by the pool mutex.
#[derive(Default)]
struct PoolState {
    /// Idle connections per key.
    index: PoolIndex,
    /// Whether a cleaner task is alive.
    cleaner_running: bool,
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Cache of idle connections keyed by destination and configuration.
///
/// Shared between transports as `Arc<ConnectionPool>`.
///
/// # Example
///
/// ```ignore
/// let pool = ConnectionPool::new(PoolOptions::default());
/// let conn = pool
///     .acquire(&key, &TcpConnector::new(), false, Duration::from_secs(60), &ctx)
///     .await?;
///
/// // ... perform an exchange ...
///
/// pool.release(conn, 200);
/// ```
pub struct ConnectionPool {
    /// Limits and timings.
    options: PoolOptions,
    /// Index and cleaner flag.
    state: Mutex<PoolState>,
    /// Wakes the cleaner early.
    wake: Notify,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(options: PoolOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Mutex::new(PoolState::default()),
            wake: Notify::new(),
        })
    }

    /// Creates an empty pool with default options.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Self::new(PoolOptions::default())
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Returns the pool options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Hands out a connection for `key`.
    ///
    /// Pops the most recently released connection, skipping expired ones,
    /// or connects a new one through `connector` on a miss. With
    /// `force_reset`, every pooled connection for `key` is dropped first.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error, or [`Error::Cancelled`](crate::Error::Cancelled)
    /// if `ctx` is already cancelled.
    pub async fn acquire(
        &self,
        key: &ConnectionKey,
        connector: &dyn Connector,
        force_reset: bool,
        io_timeout: Duration,
        ctx: &Context,
    ) -> Result<Connection> {
        ctx.check("acquire connection")?;

        let mut discarded = Vec::new();
        let pooled = {
            let mut state = self.state.lock();

            if force_reset && let Some(list) = state.index.remove(key) {
                discarded.extend(list);
            }

            let mut found = None;
            let mut emptied = false;
            if let Some(list) = state.index.get_mut(key) {
                while let Some(conn) = list.pop_front() {
                    if conn.is_shutdown() || conn.is_expired(self.options.idle_expiration) {
                        discarded.push(conn);
                        continue;
                    }
                    found = Some(conn);
                    break;
                }
                emptied = list.is_empty();
            }
            if emptied {
                state.index.remove(key);
            }

            if state.index.is_empty() && state.cleaner_running {
                self.wake.notify_one();
            }
            found
        };

        if !discarded.is_empty() {
            debug!(key = %key, count = discarded.len(), force_reset, "Discarded pooled connections");
        }
        drop(discarded);

        if let Some(mut conn) = pooled {
            debug!(connection_id = %conn.id(), key = %key, "Pool hit");
            conn.set_io_timeout(io_timeout);
            return Ok(conn);
        }

        debug!(key = %key, "Pool miss");
        Connection::connect(key.clone(), connector, io_timeout, ctx).await
    }

    /// Returns a connection after an exchange finished with `status`.
    ///
    /// The connection is pooled only when `status` is 2xx, it is not shut
    /// down, and it has not reached `max_connection_uses`. Otherwise it is
    /// dropped, closing the socket. Returns `true` if it was pooled.
    pub fn release(self: &Arc<Self>, mut conn: Connection, status: u16) -> bool {
        if !(200..300).contains(&status) || conn.is_shutdown() {
            debug!(
                connection_id = %conn.id(),
                status,
                shutdown = conn.is_shutdown(),
                "Closing connection instead of pooling"
            );
            return false;
        }

        conn.mark_used();
        if let Some(max) = self.options.max_connection_uses
            && conn.usage_count() >= max
        {
            debug!(connection_id = %conn.id(), uses = conn.usage_count(), "Connection reached usage limit");
            return false;
        }

        let connection_id = conn.id();
        let key = conn.key().clone();

        let (evicted, start_cleaner) = {
            let mut state = self.state.lock();

            let list = state.index.entry(key.clone()).or_default();
            list.push_front(conn);

            let mut evicted = Vec::new();
            while list.len() > self.options.max_connections_per_key {
                if let Some(oldest) = list.pop_back() {
                    evicted.push(oldest);
                }
            }

            let start_cleaner = !state.cleaner_running;
            state.cleaner_running = true;
            (evicted, start_cleaner)
        };

        debug!(connection_id = %connection_id, key = %key, "Connection pooled");
        if !evicted.is_empty() {
            debug!(key = %key, count = evicted.len(), "Evicted connections over per-key cap");
        }
        drop(evicted);

        if start_cleaner {
            self.spawn_cleaner();
        }
        true
    }

    /// Returns the number of idle connections for `key`.
    #[must_use]
    pub fn idle_count(&self, key: &ConnectionKey) -> usize {
        self.state.lock().index.get(key).map_or(0, VecDeque::len)
    }

    /// Returns the number of idle connections across all keys.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().index.values().map(VecDeque::len).sum()
    }

    /// Returns the number of keys with idle connections.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Returns `true` while a cleaner task is alive.
    #[must_use]
    pub fn is_cleaner_running(&self) -> bool {
        self.state.lock().cleaner_running
    }

    /// Drops every idle connection and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut state = self.state.lock();
            let index = std::mem::take(&mut state.index);
            if state.cleaner_running {
                self.wake.notify_one();
            }
            index.into_values().flatten().collect()
        };

        let count = drained.len();
        if count > 0 {
            debug!(count, "Pool cleared");
        }
        count
    }
}

// ============================================================================
// ConnectionPool - Cleaner
// ============================================================================

impl ConnectionPool {
    /// Starts the cleaner on the current runtime.
    fn spawn_cleaner(self: &Arc<Self>) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Arc::clone(self).run_cleaner());
            }
            Err(_) => {
                warn!("No tokio runtime; pool cleaner not started");
                self.state.lock().cleaner_running = false;
            }
        }
    }

    /// Cleaner loop. Exits once the index is empty.
    async fn run_cleaner(self: Arc<Self>) {
        info!(
            interval_secs = self.options.cleaner_interval.as_secs(),
            "Pool cleaner started"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.options.cleaner_interval) => {}
                () = self.wake.notified() => {}
            }

            let (evicted, done) = {
                let mut state = self.state.lock();
                let evicted = evict_expired(&mut state.index, self.options.idle_expiration);
                let done = state.index.is_empty();
                if done {
                    state.cleaner_running = false;
                }
                (evicted, done)
            };

            if !evicted.is_empty() {
                debug!(count = evicted.len(), "Evicted idle connections");
            }
            drop(evicted);

            if done {
                break;
            }
        }

        info!("Pool cleaner stopped");
    }
}

/// Removes expired or shut-down connections from the back of every list,
/// stopping at the first fresh entry, and drops empty keys.
fn evict_expired(index: &mut PoolIndex, idle: Duration) -> Vec<Connection> {
    let mut evicted = Vec::new();

    for list in index.values_mut() {
        while let Some(oldest) = list.back() {
            if !(oldest.is_shutdown() || oldest.is_expired(idle)) {
                break;
            }
            if let Some(conn) = list.pop_back() {
                evicted.push(conn);
            }
        }
    }

    index.retain(|_, list| !list.is_empty());
    evicted
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::identifiers::ConnectionId;
    use crate::options::TransportOptions;
    use crate::transport::key::Destination;
    use crate::transport::testing::{MockConnector, key};

    const IO: Duration = Duration::from_secs(5);

    async fn checkout(pool: &ConnectionPool, connector: &MockConnector, k: &ConnectionKey) -> Connection {
        pool.acquire(k, connector, false, IO, &Context::new())
            .await
            .expect("acquire")
    }

    #[tokio::test]
    async fn test_lifo_reuse() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("lifo");

        let first = checkout(&pool, &connector, &k).await;
        let second = checkout(&pool, &connector, &k).await;
        let (first_id, second_id) = (first.id(), second.id());

        assert!(pool.release(first, 200));
        assert!(pool.release(second, 204));
        assert_eq!(pool.idle_count(&k), 2);

        let again = checkout(&pool, &connector, &k).await;
        assert_eq!(again.id(), second_id);
        let oldest = checkout(&pool, &connector, &k).await;
        assert_eq!(oldest.id(), first_id);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_error_status_is_never_pooled() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("status");

        let conn = checkout(&pool, &connector, &k).await;
        let id = conn.id();
        assert!(!pool.release(conn, 404));

        let next = checkout(&pool, &connector, &k).await;
        assert_ne!(next.id(), id);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_connection_is_never_pooled() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("shutdown");

        let mut conn = checkout(&pool, &connector, &k).await;
        conn.mark_shutdown();
        assert!(!pool.release(conn, 200));
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let dest = Destination::new("http", "shared.test", 80);
        let verified = ConnectionKey::new(dest.clone(), &TransportOptions::default());
        let unverified = ConnectionKey::new(dest, &TransportOptions::default().with_tls_verify(false));

        let conn = checkout(&pool, &connector, &verified).await;
        let id = conn.id();
        pool.release(conn, 200);

        let other = checkout(&pool, &connector, &unverified).await;
        assert_ne!(other.id(), id);
        assert_eq!(pool.idle_count(&verified), 1);
        assert_eq!(pool.key_count(), 1);
    }

    #[tokio::test]
    async fn test_force_reset_drops_pooled() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("reset");

        let conn = checkout(&pool, &connector, &k).await;
        let id = conn.id();
        pool.release(conn, 200);

        let fresh = pool
            .acquire(&k, connector.as_ref(), true, IO, &Context::new())
            .await
            .unwrap();
        assert_ne!(fresh.id(), id);
        assert_eq!(pool.idle_count(&k), 0);
    }

    #[tokio::test]
    async fn test_usage_limit() {
        let pool = ConnectionPool::new(PoolOptions::default().with_max_connection_uses(2));
        let (connector, _peers) = MockConnector::new();
        let k = key("uses");

        let conn = checkout(&pool, &connector, &k).await;
        assert!(pool.release(conn, 200));
        let conn = checkout(&pool, &connector, &k).await;
        assert_eq!(conn.usage_count(), 1);
        assert!(!pool.release(conn, 200));
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_release_respects_cap() {
        const MAX: usize = 4;
        const N: usize = 16;

        let pool = ConnectionPool::new(PoolOptions::default().with_max_connections_per_key(MAX));
        let (connector, _peers) = MockConnector::new();
        let k = key("cap");

        let mut conns = Vec::new();
        for _ in 0..N {
            conns.push(checkout(&pool, &connector, &k).await);
        }

        let mut handles = Vec::new();
        for conn in conns {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.release(conn, 200) }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(pool.idle_count(&k), MAX);
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest() {
        let pool = ConnectionPool::new(PoolOptions::default().with_max_connections_per_key(2));
        let (connector, _peers) = MockConnector::new();
        let k = key("overflow");

        let a = checkout(&pool, &connector, &k).await;
        let b = checkout(&pool, &connector, &k).await;
        let c = checkout(&pool, &connector, &k).await;
        let ids: Vec<ConnectionId> = vec![a.id(), b.id(), c.id()];

        pool.release(a, 200);
        pool.release(b, 200);
        pool.release(c, 200);

        let first = checkout(&pool, &connector, &k).await;
        let second = checkout(&pool, &connector, &k).await;
        assert_eq!(first.id(), ids[2]);
        assert_eq!(second.id(), ids[1]);
        assert_eq!(pool.idle_count(&k), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_skips_expired() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("expired");

        let conn = checkout(&pool, &connector, &k).await;
        let id = conn.id();
        pool.release(conn, 200);

        tokio::time::advance(Duration::from_secs(61)).await;

        let fresh = checkout(&pool, &connector, &k).await;
        assert_ne!(fresh.id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleaner_evicts_and_stops() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("cleaner");

        let conn = checkout(&pool, &connector, &k).await;
        pool.release(conn, 200);
        assert!(pool.is_cleaner_running());

        tokio::time::sleep(Duration::from_secs(100)).await;

        assert_eq!(pool.connection_count(), 0);
        assert!(!pool.is_cleaner_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleaner_exits_early_when_pool_empties() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("wake");

        let conn = checkout(&pool, &connector, &k).await;
        pool.release(conn, 200);
        assert!(pool.is_cleaner_running());

        let started = tokio::time::Instant::now();
        let _conn = checkout(&pool, &connector, &k).await;
        assert_eq!(pool.connection_count(), 0);

        for _ in 0..16 {
            if !pool.is_cleaner_running() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!pool.is_cleaner_running());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleaner_exits_early_after_clear() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();

        let conn = checkout(&pool, &connector, &key("clear")).await;
        pool.release(conn, 200);
        tokio::task::yield_now().await;
        assert!(pool.is_cleaner_running());

        let started = tokio::time::Instant::now();
        assert_eq!(pool.clear(), 1);

        for _ in 0..16 {
            if !pool.is_cleaner_running() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!pool.is_cleaner_running());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleaner_keeps_fresh_connections() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("fresh");

        let old = checkout(&pool, &connector, &k).await;
        let young = checkout(&pool, &connector, &k).await;
        pool.release(old, 200);

        tokio::time::sleep(Duration::from_secs(50)).await;
        pool.release(young, 200);

        // First pass at 90s: `old` idle for 90s, `young` for 40s.
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(pool.idle_count(&k), 1);
        assert!(pool.is_cleaner_running());
    }

    #[tokio::test]
    async fn test_clear() {
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();

        for host in ["a", "b"] {
            let conn = checkout(&pool, &connector, &key(host)).await;
            pool.release(conn, 200);
        }

        assert_eq!(pool.key_count(), 2);
        assert_eq!(pool.clear(), 2);
        assert_eq!(pool.connection_count(), 0);
    }

    #[test]
    fn test_release_without_runtime_does_not_start_cleaner() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let pool = ConnectionPool::with_defaults();
        let (connector, _peers) = MockConnector::new();
        let k = key("no-runtime");

        let conn = runtime.block_on(checkout(&pool, &connector, &k));
        drop(runtime);

        assert!(pool.release(conn, 200));
        assert!(!pool.is_cleaner_running());
        assert_eq!(pool.idle_count(&k), 1);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_cap(max in 1usize..6, n in 0usize..20) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let pool = ConnectionPool::new(PoolOptions::default().with_max_connections_per_key(max));
                let (connector, _peers) = MockConnector::new();
                let k = key("prop");

                let mut conns = Vec::new();
                for _ in 0..n {
                    conns.push(checkout(&pool, &connector, &k).await);
                }
                let newest: Vec<ConnectionId> = conns.iter().rev().take(max).map(Connection::id).collect();
                for conn in conns {
                    pool.release(conn, 200);
                }

                prop_assert_eq!(pool.idle_count(&k), n.min(max));
                for expected in newest {
                    let got = checkout(&pool, &connector, &k).await;
                    prop_assert_eq!(got.id(), expected);
                }
                Ok(())
            })?;
        }
    }
}
