//! Pooled socket wrapper.
//!
//! A [`Connection`] owns one socket plus the bookkeeping the pool needs:
//! its key, last-used time, usage count, and shutdown flag.
//!
//! # Lifecycle
//!
//! ```text
//! connect ──► checked out ──► release(2xx) ──► pooled ──► acquire ──► ...
//!                  │                              │
//!                  └── error / non-2xx ──► closed ◄── expired / evicted
//! ```
//!
//! A connection is always in exactly one place: held by an exchange or
//! stored in the pool. Moving it by value enforces this.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::Result;
use crate::identifiers::ConnectionId;
use crate::transport::connector::Connector;
use crate::transport::io::{self, BoxedSocket};
use crate::transport::key::ConnectionKey;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on a graceful socket shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Connection
// ============================================================================

/// One network connection.
pub struct Connection {
    /// Log identifier.
    id: ConnectionId,
    /// Pool key.
    key: ConnectionKey,
    /// Underlying socket.
    socket: BoxedSocket,
    /// Budget for each read or write.
    io_timeout: Duration,
    /// Last time the connection finished an exchange.
    last_used: Instant,
    /// Completed exchanges.
    usage_count: u64,
    /// Set once the socket failed, reached EOF, or was shut down.
    shutdown: bool,
}

// ============================================================================
// Connection - Constructors
// ============================================================================

impl Connection {
    /// Wraps an already connected socket.
    #[must_use]
    pub fn new(key: ConnectionKey, socket: BoxedSocket, io_timeout: Duration) -> Self {
        let id = ConnectionId::next();
        trace!(connection_id = %id, key = %key, "Connection created");

        Self {
            id,
            key,
            socket,
            io_timeout,
            last_used: Instant::now(),
            usage_count: 0,
            shutdown: false,
        }
    }

    /// Establishes a new connection through `connector`.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error.
    pub async fn connect(
        key: ConnectionKey,
        connector: &dyn Connector,
        io_timeout: Duration,
        ctx: &Context,
    ) -> Result<Self> {
        let socket = connector.connect(&key, ctx).await?;
        let connection = Self::new(key, socket, io_timeout);
        debug!(connection_id = %connection.id, key = %connection.key, "Connection established");
        Ok(connection)
    }
}

// ============================================================================
// Connection - Public API
// ============================================================================

impl Connection {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the pool key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Returns the number of completed exchanges.
    #[inline]
    #[must_use]
    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    /// Returns `true` if the connection already served an exchange.
    #[inline]
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.usage_count > 0
    }

    /// Returns when the connection last finished an exchange.
    #[inline]
    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Returns the per-operation I/O budget.
    #[inline]
    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Replaces the per-operation I/O budget.
    #[inline]
    pub fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    /// Returns `true` if the connection may no longer be used.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Returns `true` if the connection sat idle for at least `idle`.
    #[inline]
    #[must_use]
    pub fn is_expired(&self, idle: Duration) -> bool {
        self.last_used.elapsed() >= idle
    }

    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` at end of stream; the connection is then marked shut
    /// down.
    ///
    /// # Errors
    ///
    /// See [`io::read_some`]. Any error marks the connection shut down.
    pub async fn read_from_socket(&mut self, buf: &mut [u8], ctx: &Context) -> Result<usize> {
        let result = io::read_some(&mut self.socket, buf, self.io_timeout, ctx, "receive").await;

        match result {
            Ok(0) => {
                trace!(connection_id = %self.id, "Peer closed connection");
                self.shutdown = true;
                Ok(0)
            }
            Ok(n) => {
                trace!(connection_id = %self.id, bytes = n, "Received");
                Ok(n)
            }
            Err(e) => {
                self.shutdown = true;
                Err(e)
            }
        }
    }

    /// Sends all of `buf`.
    ///
    /// # Errors
    ///
    /// See [`io::write_all`]. Any error marks the connection shut down.
    pub async fn send_buffer(&mut self, buf: &[u8], ctx: &Context) -> Result<()> {
        let result = io::write_all(&mut self.socket, buf, self.io_timeout, ctx, "send").await;

        match result {
            Ok(()) => {
                trace!(connection_id = %self.id, bytes = buf.len(), "Sent");
                Ok(())
            }
            Err(e) => {
                self.shutdown = true;
                Err(e)
            }
        }
    }

    /// Marks the connection unusable and closes the write side.
    pub async fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.socket.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(connection_id = %self.id, error = %e, "Shutdown failed"),
            Err(_) => trace!(
                connection_id = %self.id,
                timeout = ?SHUTDOWN_TIMEOUT,
                "Shutdown timed out"
            ),
        }
        debug!(connection_id = %self.id, "Connection shut down");
    }

    /// Marks the connection unusable without touching the socket.
    #[inline]
    pub fn mark_shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Records a completed exchange.
    pub(crate) fn mark_used(&mut self) {
        self.usage_count += 1;
        self.last_used = Instant::now();
    }

    /// Splits the socket into read and write halves for an upgraded
    /// protocol. The connection can no longer be pooled.
    #[must_use]
    pub fn into_split(self) -> (ConnectionId, ReadHalf<BoxedSocket>, WriteHalf<BoxedSocket>) {
        let (reader, writer) = tokio::io::split(self.socket);
        (self.id, reader, writer)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("usage_count", &self.usage_count)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncReadExt;

    use crate::transport::testing::{MockConnector, key};

    #[tokio::test]
    async fn test_send_and_read() {
        let (connector, mut peers) = MockConnector::new();
        let ctx = Context::new();
        let mut conn = Connection::connect(key("a"), connector.as_ref(), Duration::from_secs(5), &ctx)
            .await
            .unwrap();
        let mut peer = peers.recv().await.unwrap();

        conn.send_buffer(b"ping", &ctx).await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        let n = conn.read_from_socket(&mut buf, &ctx).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert!(!conn.is_shutdown());
    }

    #[tokio::test]
    async fn test_eof_marks_shutdown() {
        let (connector, mut peers) = MockConnector::new();
        let ctx = Context::new();
        let mut conn = Connection::connect(key("a"), connector.as_ref(), Duration::from_secs(5), &ctx)
            .await
            .unwrap();
        drop(peers.recv().await);

        let mut buf = [0u8; 8];
        assert_eq!(conn.read_from_socket(&mut buf, &ctx).await.unwrap(), 0);
        assert!(conn.is_shutdown());
    }

    #[tokio::test]
    async fn test_read_error_marks_shutdown() {
        let socket = tokio_test::io::Builder::new()
            .write(b"HEAD / HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 200")
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut conn = Connection::new(key("a"), Box::new(socket), Duration::from_secs(5));
        let ctx = Context::new();

        conn.send_buffer(b"HEAD / HTTP/1.1\r\n\r\n", &ctx).await.unwrap();

        let mut buf = [0u8; 32];
        let n = conn.read_from_socket(&mut buf, &ctx).await.unwrap();
        assert_eq!(&buf[..n], b"HTTP/1.1 200");
        assert!(!conn.is_shutdown());

        let err = conn.read_from_socket(&mut buf, &ctx).await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(conn.is_shutdown());
    }

    /// Socket whose shutdown never completes or always fails.
    struct StubbornSocket {
        fail: bool,
    }

    impl tokio::io::AsyncRead for StubbornSocket {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    impl tokio::io::AsyncWrite for StubbornSocket {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.fail {
                std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
            } else {
                std::task::Poll::Pending
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_after_timeout() {
        let socket = StubbornSocket { fail: false };
        let mut conn = Connection::new(key("a"), Box::new(socket), Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        conn.shutdown().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= SHUTDOWN_TIMEOUT);
        assert!(elapsed < SHUTDOWN_TIMEOUT + Duration::from_millis(10));
        assert!(conn.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_error_still_marks_shutdown() {
        let socket = StubbornSocket { fail: true };
        let mut conn = Connection::new(key("a"), Box::new(socket), Duration::from_secs(5));

        conn.shutdown().await;
        assert!(conn.is_shutdown());

        // A second call is a no-op.
        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_tracks_last_use() {
        let (connector, _peers) = MockConnector::new();
        let mut conn = Connection::connect(
            key("a"),
            connector.as_ref(),
            Duration::from_secs(5),
            &Context::new(),
        )
        .await
        .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!conn.is_expired(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(conn.is_expired(Duration::from_secs(60)));

        conn.mark_used();
        assert!(!conn.is_expired(Duration::from_secs(60)));
        assert_eq!(conn.usage_count(), 1);
        assert!(conn.is_reused());
    }
}
