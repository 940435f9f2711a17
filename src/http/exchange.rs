//! One request/response exchange over one connection.
//!
//! # Flow
//!
//! ```text
//! write_head ──► [upload body] ──► read head ──► ResponseBody (Streaming)
//!      │                                              │
//!      │  PUT: Expect: 100-continue                   ├─ drained: pool or close
//!      └──► read head ─► 100? upload, read head       └─ dropped early: close
//! ```
//!
//! The pool-or-close decision lives in [`ConnectionGuard`], which makes it
//! exactly once: when the body is drained, or when the guard is dropped on
//! any other path.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::Stream;
use futures_util::stream;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::chunked::ChunkDecoder;
use crate::http::headers::Headers;
use crate::http::parser::ResponseParser;
use crate::http::request::{HttpMethod, Request, RequestBody, serialize_head};
use crate::http::response::{HttpVersion, Response, ResponseHead};
use crate::options::TransportOptions;
use crate::transport::{Connection, ConnectionPool, Destination};

// ============================================================================
// Constants
// ============================================================================

/// Buffer size used by [`ResponseBody::read_to_end`] and streams.
const BODY_READ_CHUNK: usize = 8 * 1024;

/// Largest up-front allocation for a fixed-length body.
const MAX_PREALLOCATION: u64 = 1024 * 1024;

// ============================================================================
// ExchangeState
// ============================================================================

/// Whether the response head has been handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Request being sent or response head being read.
    Performing,
    /// Response body being read by the caller.
    Streaming,
}

// ============================================================================
// BodyFraming
// ============================================================================

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body.
    Empty,
    /// Exactly this many bytes.
    Fixed(u64),
    /// Chunked transfer encoding.
    Chunked,
    /// Everything until the server closes the connection.
    UntilClose,
}

impl BodyFraming {
    /// Determines the framing of a response to `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an unparsable `content-length`.
    pub fn for_response(method: HttpMethod, head: &ResponseHead) -> Result<Self> {
        let status = head.status();
        if method == HttpMethod::Head || status == 204 || status == 304 || head.is_informational() {
            return Ok(Self::Empty);
        }

        if let Some(length) = head.headers().get("content-length") {
            let length = length
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::protocol(format!("invalid content-length '{length}'")))?;
            return Ok(if length == 0 { Self::Empty } else { Self::Fixed(length) });
        }

        if head.headers().has_token("transfer-encoding", "chunked") {
            return Ok(Self::Chunked);
        }

        Ok(Self::UntilClose)
    }
}

// ============================================================================
// ConnectionGuard
// ============================================================================

/// Owns the connection during an exchange and decides, exactly once,
/// whether it returns to the pool or is closed.
pub(crate) struct ConnectionGuard {
    connection: Option<Connection>,
    /// `None` when keep-alive is off.
    pool: Option<Arc<ConnectionPool>>,
    state: ExchangeState,
    status: u16,
    reusable: bool,
}

impl ConnectionGuard {
    pub(crate) fn new(connection: Connection, pool: Option<Arc<ConnectionPool>>) -> Self {
        Self {
            connection: Some(connection),
            pool,
            state: ExchangeState::Performing,
            status: 0,
            reusable: true,
        }
    }

    pub(crate) fn connection(&mut self) -> Result<&mut Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::invalid_state("connection already released"))
    }

    pub(crate) fn state(&self) -> ExchangeState {
        self.state
    }

    /// Hands the response to the caller.
    pub(crate) fn begin_streaming(&mut self, status: u16, reusable: bool) {
        self.state = ExchangeState::Streaming;
        self.status = status;
        self.reusable &= reusable;
    }

    /// Forbids pooling regardless of how the exchange ends.
    pub(crate) fn forbid_reuse(&mut self) {
        self.reusable = false;
    }

    /// Removes the connection without a pool decision.
    pub(crate) fn take(&mut self) -> Option<Connection> {
        self.connection.take()
    }

    /// Pools or closes the connection. Later calls do nothing.
    pub(crate) fn finish(&mut self, drained: bool) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let poolable = self.state == ExchangeState::Streaming && drained && self.reusable;
        match (&self.pool, poolable) {
            (Some(pool), true) => {
                pool.release(connection, self.status);
            }
            _ => {
                debug!(
                    connection_id = %connection.id(),
                    state = ?self.state,
                    drained,
                    reusable = self.reusable,
                    "Closing connection"
                );
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.finish(false);
    }
}

// ============================================================================
// HttpExchange
// ============================================================================

/// Drives one request over one connection.
pub struct HttpExchange {
    guard: ConnectionGuard,
    /// Bytes read past the current parse position.
    buffer: BytesMut,
    /// Socket read buffer.
    scratch: Vec<u8>,
    upload_chunk_size: usize,
    reused: bool,
}

impl HttpExchange {
    /// Starts an exchange. With `pool`, the connection may be returned to
    /// it when the exchange ends cleanly.
    #[must_use]
    pub fn new(connection: Connection, pool: Option<Arc<ConnectionPool>>, options: &TransportOptions) -> Self {
        let reused = connection.is_reused();
        Self {
            guard: ConnectionGuard::new(connection, pool),
            buffer: BytesMut::new(),
            scratch: vec![0; options.read_buffer_size.max(1)],
            upload_chunk_size: options.upload_chunk_size.max(1),
            reused,
        }
    }

    /// Returns `true` if the connection came from the pool.
    #[inline]
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Returns the exchange state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.guard.state()
    }

    /// Sends a serialized request head.
    ///
    /// # Errors
    ///
    /// Propagates the connection's send error.
    pub async fn write_head(&mut self, head: &[u8], ctx: &Context) -> Result<()> {
        self.guard.connection()?.send_buffer(head, ctx).await
    }

    /// Uploads the body if needed, reads the response head, and returns the
    /// response with a streaming body.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the connection fails or closes early
    /// - [`Error::Protocol`] for a malformed response head
    /// - [`Error::InvalidArgument`] if a body stream is shorter than its length
    pub async fn finish_request(
        mut self,
        request: &mut Request,
        expect_continue: bool,
        ctx: &Context,
    ) -> Result<Response> {
        let head = if expect_continue {
            match self.read_continue(ctx).await? {
                None => {
                    trace!("Server sent 100 Continue");
                    self.upload(request.body_mut(), ctx).await?;
                    self.read_final_head(ctx).await?
                }
                Some(head) => {
                    debug!(status = head.status(), "Upload skipped; server answered before 100 Continue");
                    self.guard.forbid_reuse();
                    head
                }
            }
        } else {
            self.upload(request.body_mut(), ctx).await?;
            self.read_final_head(ctx).await?
        };

        let framing = BodyFraming::for_response(request.method(), &head)?;
        let reusable = keeps_alive(&head) && framing != BodyFraming::UntilClose;

        debug!(
            method = %request.method(),
            url = %request.url(),
            status = head.status(),
            framing = ?framing,
            "Response head received"
        );

        self.guard.begin_streaming(head.status(), reusable);
        let body = ResponseBody::new(self.into_body_parts(), framing);
        Ok(Response::new(head, body))
    }

    /// Reads the response to an upgrade request.
    ///
    /// On `101 Switching Protocols` the connection is handed over together
    /// with any bytes read past the head. Any other status closes the
    /// connection.
    ///
    /// # Errors
    ///
    /// As [`finish_request`](Self::finish_request).
    pub async fn finish_upgrade(mut self, ctx: &Context) -> Result<(ResponseHead, Option<UpgradedConnection>)> {
        let head = self.read_head(ctx).await?;
        if head.status() != 101 {
            return Ok((head, None));
        }

        let connection = self
            .guard
            .take()
            .ok_or_else(|| Error::invalid_state("connection already released"))?;
        let leftover = std::mem::take(&mut self.buffer).freeze();
        trace!(connection_id = %connection.id(), leftover = leftover.len(), "Connection upgraded");

        Ok((head, Some(UpgradedConnection { connection, leftover })))
    }

    /// Reads heads until one that is not 1xx (other than 101).
    async fn read_final_head(&mut self, ctx: &Context) -> Result<ResponseHead> {
        loop {
            let head = self.read_head(ctx).await?;
            if head.is_informational() && head.status() != 101 {
                trace!(status = head.status(), "Skipping informational response");
                continue;
            }
            return Ok(head);
        }
    }

    /// Waits for `100 Continue`, skipping other informational heads.
    /// Returns the final head if the server answered without `100`.
    async fn read_continue(&mut self, ctx: &Context) -> Result<Option<ResponseHead>> {
        loop {
            let head = self.read_head(ctx).await?;
            match head.status() {
                100 => return Ok(None),
                101 => return Ok(Some(head)),
                status if head.is_informational() => {
                    trace!(status, "Skipping informational response");
                }
                _ => return Ok(Some(head)),
            }
        }
    }

    /// Reads one response head, leaving extra bytes in the buffer.
    async fn read_head(&mut self, ctx: &Context) -> Result<ResponseHead> {
        let mut parser = ResponseParser::new();

        loop {
            if !self.buffer.is_empty() {
                let consumed = parser.parse(&self.buffer)?;
                self.buffer.advance(consumed);
                if parser.is_completed() {
                    return parser.finish();
                }
            }

            let connection = self.guard.connection()?;
            let n = connection.read_from_socket(&mut self.scratch, ctx).await?;
            if n == 0 {
                return Err(Error::transport("connection closed before the response head was received"));
            }
            self.buffer.extend_from_slice(&self.scratch[..n]);
        }
    }

    /// Sends the request body in chunks.
    async fn upload(&mut self, body: &mut RequestBody, ctx: &Context) -> Result<()> {
        let chunk_size = self.upload_chunk_size;

        match body {
            RequestBody::Empty => Ok(()),
            RequestBody::Bytes(bytes) => {
                let connection = self.guard.connection()?;
                for chunk in bytes.chunks(chunk_size) {
                    connection.send_buffer(chunk, ctx).await?;
                }
                trace!(bytes = bytes.len(), "Uploaded body");
                Ok(())
            }
            RequestBody::Stream(stream) => {
                let length = stream.length();
                let mut chunk = vec![0u8; chunk_size];
                let mut sent: u64 = 0;

                while sent < length {
                    let want = usize::try_from(length - sent).unwrap_or(usize::MAX).min(chunk_size);
                    let n = stream.read(&mut chunk[..want], ctx).await?;
                    if n == 0 {
                        self.guard.forbid_reuse();
                        return Err(Error::invalid_argument(format!(
                            "body stream ended after {sent} of {length} bytes"
                        )));
                    }
                    self.guard.connection()?.send_buffer(&chunk[..n], ctx).await?;
                    sent += n as u64;
                }
                trace!(bytes = sent, "Uploaded streamed body");
                Ok(())
            }
        }
    }

    fn into_body_parts(self) -> BodyParts {
        BodyParts {
            guard: self.guard,
            buffer: self.buffer,
            scratch: self.scratch,
        }
    }
}

/// State moved from an exchange into its response body.
struct BodyParts {
    guard: ConnectionGuard,
    buffer: BytesMut,
    scratch: Vec<u8>,
}

/// Builds the request head and reports whether it asks for `100-continue`.
#[must_use]
pub(crate) fn prepare_head(request: &Request, destination: &Destination, user_agent: Option<&str>) -> (Vec<u8>, bool) {
    let mut headers: Headers = request.headers().clone();
    headers.insert_if_absent("host", destination.host_header());
    if let Some(agent) = user_agent {
        headers.insert_if_absent("user-agent", agent);
    }

    let length = request.body().length();
    let method = request.method();
    headers.insert_if_absent("content-length", length.to_string());

    let expect_continue = method == HttpMethod::Put;
    if expect_continue {
        headers.insert("expect", "100-continue");
    }

    (serialize_head(method, &request.request_target(), &headers), expect_continue)
}

/// Whether the server allows the connection to stay open.
fn keeps_alive(head: &ResponseHead) -> bool {
    if head.headers().has_token("connection", "close") {
        return false;
    }
    head.version() != HttpVersion::HTTP_10 || head.headers().has_token("connection", "keep-alive")
}

// ============================================================================
// UpgradedConnection
// ============================================================================

/// A connection taken over by another protocol after `101`.
pub struct UpgradedConnection {
    /// The connection, never returned to the pool.
    pub connection: Connection,
    /// Bytes read past the `101` head.
    pub leftover: Bytes,
}

impl fmt::Debug for UpgradedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradedConnection")
            .field("connection", &self.connection)
            .field("leftover", &self.leftover.len())
            .finish()
    }
}

// ============================================================================
// ResponseBody
// ============================================================================

/// Pull stream over a response body.
///
/// Reading to the end hands the connection back to the pool when allowed;
/// dropping the body earlier closes it.
pub struct ResponseBody {
    guard: ConnectionGuard,
    framing: BodyFraming,
    /// Bytes already read from the socket but not yet returned.
    leftover: BytesMut,
    scratch: Vec<u8>,
    decoder: ChunkDecoder,
    received: u64,
    drained: bool,
}

impl ResponseBody {
    fn new(parts: BodyParts, framing: BodyFraming) -> Self {
        let mut body = Self {
            guard: parts.guard,
            framing,
            leftover: parts.buffer,
            scratch: parts.scratch,
            decoder: ChunkDecoder::new(),
            received: 0,
            drained: false,
        };
        if framing == BodyFraming::Empty {
            body.complete();
        }
        body
    }

    /// Returns the body framing.
    #[inline]
    #[must_use]
    pub fn framing(&self) -> BodyFraming {
        self.framing
    }

    /// Returns `true` once the whole body was read.
    #[inline]
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Returns the number of body bytes returned so far.
    #[inline]
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Reads up to `buf.len()` body bytes. Returns `Ok(0)` at the end.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the connection closes before the body ends,
    ///   naming the expected and received byte counts
    /// - [`Error::Protocol`] for malformed chunk framing
    ///
    /// Any error closes the connection.
    pub async fn read(&mut self, buf: &mut [u8], ctx: &Context) -> Result<usize> {
        if self.drained || buf.is_empty() {
            return Ok(0);
        }

        let result = match self.framing {
            BodyFraming::Empty => Ok(0),
            BodyFraming::Fixed(total) => self.read_fixed(total, buf, ctx).await,
            BodyFraming::Chunked => self.read_chunked(buf, ctx).await,
            BodyFraming::UntilClose => self.read_until_close(buf, ctx).await,
        };

        match result {
            Ok(n) => {
                self.received += n as u64;
                trace!(bytes = n, total = self.received, "Body read");
                Ok(n)
            }
            Err(e) => {
                self.guard.finish(false);
                Err(e)
            }
        }
    }

    /// Reads the rest of the body.
    ///
    /// # Errors
    ///
    /// See [`read`](Self::read).
    pub async fn read_to_end(mut self, ctx: &Context) -> Result<Bytes> {
        let capacity = match self.framing {
            BodyFraming::Fixed(total) => usize::try_from(total.min(MAX_PREALLOCATION)).unwrap_or(0),
            _ => 0,
        };
        let mut out = BytesMut::with_capacity(capacity);
        let mut buf = vec![0u8; BODY_READ_CHUNK];

        loop {
            let n = self.read(&mut buf, ctx).await?;
            if n == 0 {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Converts the body into a stream of byte chunks.
    ///
    /// The stream ends after the last chunk or after the first error.
    pub fn into_stream(self, ctx: Context) -> impl Stream<Item = Result<Bytes>> + Send {
        stream::unfold(Some((self, ctx)), |state| async move {
            let (mut body, ctx) = state?;
            let mut buf = vec![0u8; BODY_READ_CHUNK];

            match body.read(&mut buf, &ctx).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some((body, ctx))))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn read_fixed(&mut self, total: u64, buf: &mut [u8], ctx: &Context) -> Result<usize> {
        let remaining = total - self.received;
        let want = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());

        let n = if self.leftover.is_empty() {
            let n = self.guard.connection()?.read_from_socket(&mut buf[..want], ctx).await?;
            if n == 0 {
                return Err(Error::premature_close(total, self.received));
            }
            n
        } else {
            let n = want.min(self.leftover.len());
            buf[..n].copy_from_slice(&self.leftover[..n]);
            self.leftover.advance(n);
            n
        };

        if self.received + n as u64 == total {
            self.complete();
        }
        Ok(n)
    }

    async fn read_chunked(&mut self, buf: &mut [u8], ctx: &Context) -> Result<usize> {
        loop {
            if self.leftover.is_empty() {
                let n = self.guard.connection()?.read_from_socket(&mut self.scratch, ctx).await?;
                if n == 0 {
                    // A peer closing inside the trailer section still sent
                    // the whole body.
                    if self.decoder.in_trailer() {
                        self.complete();
                        return Ok(0);
                    }
                    return Err(Error::premature_close(
                        self.decoder.chunk_size(),
                        self.decoder.consumed_in_chunk(),
                    ));
                }
                self.leftover.extend_from_slice(&self.scratch[..n]);
            }

            let (consumed, produced) = self.decoder.decode(&self.leftover, buf)?;
            self.leftover.advance(consumed);

            if self.decoder.is_completed() {
                self.complete();
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
        }
    }

    async fn read_until_close(&mut self, buf: &mut [u8], ctx: &Context) -> Result<usize> {
        if !self.leftover.is_empty() {
            let n = buf.len().min(self.leftover.len());
            buf[..n].copy_from_slice(&self.leftover[..n]);
            self.leftover.advance(n);
            return Ok(n);
        }

        let n = self.guard.connection()?.read_from_socket(buf, ctx).await?;
        if n == 0 {
            self.complete();
        }
        Ok(n)
    }

    fn complete(&mut self) {
        if !self.drained {
            self.drained = true;
            self.guard.finish(true);
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("framing", &self.framing)
            .field("received", &self.received)
            .field("drained", &self.drained)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
