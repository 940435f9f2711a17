//! Sliced socket I/O.
//!
//! Reads and writes are awaited in slices of at most [`POLL_SLICE`], each
//! racing the caller's [`Context`]. The whole operation gets a fixed budget;
//! exhausting it yields [`Error::Timeout`], while caller cancellation yields
//! [`Error::Cancelled`].

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout};

use crate::context::Context;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Longest single wait before cancellation is re-checked.
pub const POLL_SLICE: Duration = Duration::from_secs(1);

// ============================================================================
// Socket
// ============================================================================

/// A bidirectional byte stream usable as a connection.
///
/// Implemented for every `AsyncRead + AsyncWrite + Send + Unpin` type, so
/// TCP streams, TLS streams, and in-memory duplex pipes all qualify.
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized {}

/// Owned, type-erased socket.
pub type BoxedSocket = Box<dyn Socket>;

// ============================================================================
// Sliced Operations
// ============================================================================

/// Reads at most `buf.len()` bytes.
///
/// Returns `Ok(0)` at end of stream.
///
/// # Errors
///
/// - [`Error::Cancelled`] if `ctx` is cancelled while waiting
/// - [`Error::Timeout`] if no data arrives within `budget`
/// - [`Error::Transport`] if the socket reports an error
pub async fn read_some<R>(
    reader: &mut R,
    buf: &mut [u8],
    budget: Duration,
    ctx: &Context,
    operation: &str,
) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let started = Instant::now();

    loop {
        let slice = next_slice(started, budget, ctx, operation)?;

        tokio::select! {
            biased;

            () = ctx.cancelled() => return Err(Error::cancelled(operation)),

            result = timeout(slice, reader.read(buf)) => match result {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) => return Err(Error::transport(format!("{operation} failed: {e}"))),
                Err(_) => continue,
            },
        }
    }
}

/// Writes some prefix of `buf` and returns its length.
///
/// # Errors
///
/// As [`read_some`]; a write accepting zero bytes is a transport error.
pub async fn write_some<W>(
    writer: &mut W,
    buf: &[u8],
    budget: Duration,
    ctx: &Context,
    operation: &str,
) -> Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let started = Instant::now();

    loop {
        let slice = next_slice(started, budget, ctx, operation)?;

        tokio::select! {
            biased;

            () = ctx.cancelled() => return Err(Error::cancelled(operation)),

            result = timeout(slice, writer.write(buf)) => match result {
                Ok(Ok(0)) if !buf.is_empty() => {
                    return Err(Error::transport(format!("{operation} failed: socket closed")));
                }
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) => return Err(Error::transport(format!("{operation} failed: {e}"))),
                Err(_) => continue,
            },
        }
    }
}

/// Writes all of `buf`, then flushes.
///
/// Each partial write gets its own budget.
///
/// # Errors
///
/// See [`write_some`].
pub async fn write_all<W>(
    writer: &mut W,
    mut buf: &[u8],
    budget: Duration,
    ctx: &Context,
    operation: &str,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while !buf.is_empty() {
        let n = write_some(writer, buf, budget, ctx, operation).await?;
        buf = &buf[n..];
    }

    match timeout(budget, writer.flush()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::transport(format!("{operation} failed: {e}"))),
        Err(_) => Err(Error::timeout(operation, millis(budget))),
    }
}

/// Computes the next wait slice, or fails if the context is done or the
/// budget is spent.
fn next_slice(started: Instant, budget: Duration, ctx: &Context, operation: &str) -> Result<Duration> {
    ctx.check(operation)?;

    let elapsed = started.elapsed();
    if elapsed >= budget {
        return Err(Error::timeout(operation, millis(budget)));
    }

    Ok(POLL_SLICE.min(budget - elapsed))
}

#[inline]
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_some_returns_available_bytes() {
        let (mut client, mut server) = duplex(64);
        server.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let ctx = Context::new();
        let n = read_some(&mut client, &mut buf, Duration::from_secs(5), &ctx, "read")
            .await
            .unwrap();

        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_read_some_reports_eof() {
        let (mut client, server) = duplex(64);
        drop(server);

        let mut buf = [0u8; 16];
        let n = read_some(&mut client, &mut buf, Duration::from_secs(5), &Context::new(), "read")
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_some_times_out_after_budget() {
        let (mut client, _server) = duplex(64);

        let mut buf = [0u8; 16];
        let err = read_some(&mut client, &mut buf, Duration::from_secs(3), &Context::new(), "read")
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_some_observes_cancellation() {
        let (mut client, _server) = duplex(64);
        let ctx = Context::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let mut buf = [0u8; 16];
        let err = read_some(&mut client, &mut buf, Duration::from_secs(60), &ctx, "read")
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_cancellation_not_timeout() {
        let (mut client, _server) = duplex(64);
        let ctx = Context::with_timeout(Duration::from_secs(2));

        let mut buf = [0u8; 16];
        let err = read_some(&mut client, &mut buf, Duration::from_secs(60), &ctx, "read")
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_all_delivers_everything() {
        let (mut client, mut server) = duplex(4);
        let payload = b"0123456789abcdef".to_vec();

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.unwrap();
            received
        });

        write_all(&mut client, &payload, Duration::from_secs(5), &Context::new(), "write")
            .await
            .unwrap();
        drop(client);

        assert_eq!(reader.await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_fails() {
        let (mut client, server) = duplex(4);
        drop(server);

        let err = write_all(&mut client, b"data", Duration::from_secs(5), &Context::new(), "write")
            .await
            .unwrap_err();
        assert!(err.is_transport_error());
    }
}
