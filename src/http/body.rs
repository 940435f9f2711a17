//! Request body sources.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use bytes::Bytes;

use crate::context::Context;
use crate::error::Result;

// ============================================================================
// BodyStream
// ============================================================================

/// A rewindable source of request body bytes with a known length.
#[async_trait]
pub trait BodyStream: Send + Sync {
    /// Total number of bytes the stream yields from the start.
    fn length(&self) -> u64;

    /// Reads up to `buf.len()` bytes. Returns `Ok(0)` at the end.
    async fn read(&mut self, buf: &mut [u8], ctx: &Context) -> Result<usize>;

    /// Restarts the stream from the beginning.
    fn rewind(&mut self) -> Result<()>;
}

// ============================================================================
// MemoryBodyStream
// ============================================================================

/// In-memory [`BodyStream`].
#[derive(Debug, Clone)]
pub struct MemoryBodyStream {
    data: Bytes,
    position: usize,
}

impl MemoryBodyStream {
    /// Creates a stream over `data`.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    /// Returns the bytes not yet read.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

#[async_trait]
impl BodyStream for MemoryBodyStream {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read(&mut self, buf: &mut [u8], ctx: &Context) -> Result<usize> {
        ctx.check("read request body")?;

        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
