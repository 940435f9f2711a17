//! Frame I/O over an upgraded connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::frame::{self, ByteSource, Frame, Opcode};
use super::statistics::Counters;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::exchange::UpgradedConnection;
use crate::identifiers::ConnectionId;
use crate::transport::BoxedSocket;
use crate::transport::io::{read_some, write_all};

// ============================================================================
// FrameReader
// ============================================================================

/// Read side: socket half plus bytes not yet consumed by the decoder.
struct FrameReader {
    half: ReadHalf<BoxedSocket>,
    buffer: BytesMut,
    scratch: Vec<u8>,
    io_timeout: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl ByteSource for FrameReader {
    async fn read_exact(&mut self, buf: &mut [u8], ctx: &Context) -> Result<()> {
        let mut filled = 0;

        while filled < buf.len() {
            if !self.buffer.is_empty() {
                let n = self.buffer.len().min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&self.buffer[..n]);
                self.buffer.advance(n);
                filled += n;
                continue;
            }

            self.counters.record_transport_read();

            // Large payloads go straight into the caller's buffer.
            let n = if buf.len() - filled >= self.scratch.len() {
                let n = read_some(&mut self.half, &mut buf[filled..], self.io_timeout, ctx, "read frame").await?;
                filled += n;
                n
            } else {
                let n = read_some(&mut self.half, &mut self.scratch, self.io_timeout, ctx, "read frame").await?;
                self.buffer.extend_from_slice(&self.scratch[..n]);
                n
            };

            if n == 0 {
                return Err(Error::transport("connection closed by peer"));
            }
        }

        Ok(())
    }
}

// ============================================================================
// FrameStream
// ============================================================================

/// Reads and writes whole frames on an upgraded connection.
///
/// Reads and writes are serialized by separate locks, so a keep-alive
/// task can send while a caller is blocked receiving, and two writers
/// never interleave partial frames.
pub struct FrameStream {
    id: ConnectionId,
    reader: Mutex<FrameReader>,
    writer: Mutex<WriteHalf<BoxedSocket>>,
    io_timeout: Duration,
}

impl FrameStream {
    /// Wraps an upgraded connection. `read_buffer_size` bounds each socket
    /// read for small frames.
    #[must_use]
    pub fn new(upgraded: UpgradedConnection, read_buffer_size: usize) -> Self {
        let io_timeout = upgraded.connection.io_timeout();
        let (id, read_half, write_half) = upgraded.connection.into_split();
        let buffer = BytesMut::from(&upgraded.leftover[..]);

        debug!(connection_id = %id, leftover = buffer.len(), "Frame stream attached");

        Self {
            id,
            reader: Mutex::new(FrameReader {
                half: read_half,
                buffer,
                scratch: vec![0u8; read_buffer_size.max(1)],
                io_timeout,
                counters: Arc::new(Counters::default()),
            }),
            writer: Mutex::new(write_half),
            io_timeout,
        }
    }

    /// Returns the underlying connection's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn attach_counters(&mut self, counters: Arc<Counters>) {
        self.reader.get_mut().counters = counters;
    }

    /// Decodes the next frame.
    ///
    /// A [`Error::Timeout`] before any byte of a frame arrived leaves the
    /// stream usable; any error after that leaves it mid-frame.
    ///
    /// # Errors
    ///
    /// See [`frame::decode`].
    pub async fn read_frame(&self, ctx: &Context) -> Result<Frame> {
        let mut reader = self.reader.lock().await;
        let frame = frame::decode(&mut *reader, ctx).await?;
        trace!(
            connection_id = %self.id,
            opcode = %frame.opcode,
            is_final = frame.is_final,
            bytes = frame.payload.len(),
            "Frame received"
        );
        Ok(frame)
    }

    /// Encodes and writes one masked frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the write fails
    /// - [`Error::Timeout`] / [`Error::Cancelled`] while waiting
    pub async fn write_frame(&self, opcode: Opcode, is_final: bool, payload: &[u8], ctx: &Context) -> Result<()> {
        let encoded = frame::encode(opcode, is_final, payload);
        let mut writer = self.writer.lock().await;
        write_all(&mut *writer, &encoded, self.io_timeout, ctx, "write frame").await?;
        trace!(
            connection_id = %self.id,
            opcode = %opcode,
            is_final,
            bytes = payload.len(),
            "Frame sent"
        );
        Ok(())
    }

    /// Shuts down the write side. Errors are ignored.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!(connection_id = %self.id, error = %e, "Shutdown failed");
        }
    }
}

impl fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameStream")
            .field("id", &self.id)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    use crate::transport::Connection;
    use crate::transport::testing::key;

    fn stream_over(leftover: &[u8], read_buffer_size: usize) -> (FrameStream, DuplexStream) {
        let (local, peer) = duplex(1 << 20);
        let connection = Connection::new(key("svc"), Box::new(local), Duration::from_secs(5));
        let upgraded = UpgradedConnection {
            connection,
            leftover: Bytes::copy_from_slice(leftover),
        };
        (FrameStream::new(upgraded, read_buffer_size), peer)
    }

    #[tokio::test]
    async fn test_leftover_bytes_decoded_first() {
        let (stream, _peer) = stream_over(&[0x81, 0x02, b'h', b'i'], 16);
        let frame = stream.read_frame(&Context::new()).await.unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_frame_split_between_leftover_and_socket() {
        use tokio::io::AsyncWriteExt;

        let (stream, mut peer) = stream_over(&[0x82, 0x03, 1], 2);
        peer.write_all(&[2, 3, 0x81, 0x00]).await.unwrap();

        let ctx = Context::new();
        let first = stream.read_frame(&ctx).await.unwrap();
        assert_eq!(&first.payload[..], &[1, 2, 3]);
        let second = stream.read_frame(&ctx).await.unwrap();
        assert_eq!(second.opcode, Opcode::Text);
        assert!(second.payload.is_empty());
    }

    #[tokio::test]
    async fn test_large_payload_read_directly() {
        use tokio::io::AsyncWriteExt;

        let (stream, mut peer) = stream_over(&[], 8);
        let payload = vec![7u8; 70_000];
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        wire.extend_from_slice(&payload);

        let writer = tokio::spawn(async move {
            peer.write_all(&wire).await.unwrap();
            peer
        });

        let frame = stream.read_frame(&Context::new()).await.unwrap();
        assert_eq!(frame.payload.len(), 70_000);
        let _peer = writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_eof_is_transport_error() {
        let (stream, peer) = stream_over(&[0x81], 16);
        drop(peer);
        let err = stream.read_frame(&Context::new()).await.unwrap_err();
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_write_frame_is_masked() {
        let (stream, mut peer) = stream_over(&[], 16);
        stream
            .write_frame(Opcode::Binary, true, b"abc", &Context::new())
            .await
            .unwrap();

        let mut wire = [0u8; 9];
        peer.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire[0], 0x82);
        assert_eq!(wire[1], 0x80 | 3);

        let mut source = Bytes::copy_from_slice(&wire);
        let frame = frame::decode(&mut source, &Context::new()).await.unwrap();
        assert_eq!(&frame.payload[..], b"abc");
    }

    #[tokio::test]
    async fn test_transport_reads_counted() {
        use tokio::io::AsyncWriteExt;

        let (mut stream, mut peer) = stream_over(&[], 64);
        let counters = Arc::new(Counters::default());
        stream.attach_counters(Arc::clone(&counters));

        peer.write_all(&[0x81, 0x01, b'x']).await.unwrap();
        stream.read_frame(&Context::new()).await.unwrap();
        assert!(counters.snapshot().transport_reads >= 1);
    }
}
