//! WebSocket client session.
//!
//! A [`WebSocket`] runs the opening handshake over a [`WebSocketTransport`],
//! then exchanges frames until either side closes.
//!
//! # State Machine
//!
//! ```text
//!  Invalid ──┐
//!            ├──► Opening ──► Open ──► Closing ──► Closed
//!  Closed ───┘       │          │                    ▲
//!                    └──────────┴────────────────────┘
//! ```
//!
//! A failed open goes back to `Closed`; a close frame from the peer moves
//! `Open` straight to `Closed`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::frame::{CloseCode, Frame, Opcode, close_payload, parse_close_payload};
use super::handshake::{apply_upgrade_headers, chosen_protocol, generate_key, verify_socket_accept};
use super::statistics::{Counters, WebSocketStatistics};
use super::stream::FrameStream;
use super::transport::{Upgrade, WebSocketTransport};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::headers::Headers;
use crate::http::request::{HttpMethod, Request};
use crate::http::transport::HttpTransport;
use crate::identifiers::SessionId;
use crate::options::WebSocketOptions;

// ============================================================================
// SocketState
// ============================================================================

/// Lifecycle state of a [`WebSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Never opened.
    Invalid,
    /// Not connected; may be opened again.
    Closed,
    /// Handshake in progress.
    Opening,
    /// Frames may be sent and received.
    Open,
    /// Close frame sent, waiting for the peer's.
    Closing,
}

impl SocketState {
    /// Returns `true` if the session may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Invalid | Self::Closed, Self::Opening) => true,
            (Self::Opening, Self::Open | Self::Closed) => true,
            (Self::Open, Self::Closing | Self::Closed) => true,
            (Self::Closing, Self::Closed) => true,
            (Self::Invalid, _)
            | (Self::Closed, _)
            | (Self::Opening, _)
            | (Self::Open, _)
            | (Self::Closing, _) => false,
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// WebSocketFrame
// ============================================================================

/// A frame delivered to the caller.
///
/// Pings, pongs, and continuation opcodes never surface: continuations are
/// reported with the type of the message they continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketFrame {
    /// Text data. Fragments are not reassembled.
    Text {
        /// `true` on the last fragment of a message.
        is_final: bool,
        /// Payload bytes.
        data: Bytes,
    },
    /// Binary data.
    Binary {
        /// `true` on the last fragment of a message.
        is_final: bool,
        /// Payload bytes.
        data: Bytes,
    },
    /// The peer closed the session.
    PeerClosed {
        /// Close status sent by the peer.
        status: CloseCode,
        /// Close reason.
        reason: String,
    },
}

impl WebSocketFrame {
    /// Returns the text payload, if this is a text frame with valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { data, .. } => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Where frames go once the session is open.
#[derive(Clone)]
enum Channel {
    Raw(Arc<FrameStream>),
    Native(Arc<dyn WebSocketTransport>),
}

impl Channel {
    async fn send(&self, opcode: Opcode, is_final: bool, payload: &[u8], ctx: &Context) -> Result<()> {
        match self {
            Self::Raw(stream) => stream.write_frame(opcode, is_final, payload, ctx).await,
            Self::Native(transport) => transport.send_frame(opcode, is_final, payload, ctx).await,
        }
    }

    async fn receive(&self, ctx: &Context) -> Result<Frame> {
        match self {
            Self::Raw(stream) => stream.read_frame(ctx).await,
            Self::Native(transport) => transport.receive_frame(ctx).await,
        }
    }

    async fn shutdown(&self) {
        if let Self::Raw(stream) = self {
            stream.shutdown().await;
        }
    }
}

/// Resources of one open session.
struct OpenSession {
    channel: Channel,
    /// Cancelled when the session closes; stops the pinger and any close
    /// drain in progress.
    closed: CancellationToken,
    pinger: Option<JoinHandle<()>>,
}

impl OpenSession {
    async fn teardown(self) {
        self.closed.cancel();
        if let Some(pinger) = self.pinger
            && let Err(e) = pinger.await
        {
            warn!(error = %e, "Ping task failed");
        }
        self.channel.shutdown().await;
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// State guarded by the session lock. Never held across an await.
struct Inner {
    state: SocketState,
    headers: Headers,
    chosen_protocol: Option<String>,
    /// Type of the last Text/Binary message started by the peer.
    message_type: Option<Opcode>,
    /// `true` while an outgoing message has unsent fragments.
    sending_fragments: bool,
    session: Option<OpenSession>,
}

/// A client WebSocket session.
///
/// # Example
///
/// ```ignore
/// let socket = WebSocket::new("ws://127.0.0.1:9001/echo", WebSocketOptions::new())?;
/// let ctx = Context::with_timeout(Duration::from_secs(10));
///
/// socket.open(&ctx).await?;
/// socket.send_text("hello", true, &ctx).await?;
/// let reply = socket.receive_frame(&ctx).await?;
/// socket.close(&ctx).await?;
/// ```
pub struct WebSocket {
    id: SessionId,
    url: Url,
    options: WebSocketOptions,
    transport: Arc<dyn WebSocketTransport>,
    inner: Mutex<Inner>,
    counters: Arc<Counters>,
}

// ============================================================================
// WebSocket - Constructors
// ============================================================================

impl WebSocket {
    /// Creates a session that connects with an [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if `url` does not parse
    /// - [`Error::Config`] for unsupported schemes or invalid options
    pub fn new(url: &str, options: WebSocketOptions) -> Result<Self> {
        let transport = HttpTransport::new(options.transport.clone())?;
        Self::with_transport(url, Arc::new(transport), options)
    }

    /// Creates a session over `transport`.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_transport(
        url: &str,
        transport: Arc<dyn WebSocketTransport>,
        options: WebSocketOptions,
    ) -> Result<Self> {
        options.validate()?;

        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(Error::config(format!("unsupported WebSocket scheme '{}'", url.scheme())));
        }

        Ok(Self {
            id: SessionId::generate(),
            url,
            options,
            transport,
            inner: Mutex::new(Inner {
                state: SocketState::Invalid,
                headers: Headers::new(),
                chosen_protocol: None,
                message_type: None,
                sending_fragments: false,
                session: None,
            }),
            counters: Arc::new(Counters::default()),
        })
    }
}

// ============================================================================
// WebSocket - Accessors
// ============================================================================

impl WebSocket {
    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// Returns the remote URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SocketState {
        self.inner.lock().state
    }

    /// Returns `true` while the session is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SocketState::Open
    }

    /// Returns the subprotocol picked by the server during the last open.
    #[must_use]
    pub fn chosen_protocol(&self) -> Option<String> {
        self.inner.lock().chosen_protocol.clone()
    }

    /// Returns a snapshot of the traffic counters.
    #[must_use]
    pub fn statistics(&self) -> WebSocketStatistics {
        self.counters.snapshot()
    }

    /// Adds a header sent with every subsequent opening handshake.
    pub fn add_header(&self, name: impl AsRef<str>, value: impl Into<String>) {
        self.inner.lock().headers.insert(name, value);
    }
}

// ============================================================================
// WebSocket - Lifecycle
// ============================================================================

impl WebSocket {
    /// Runs the opening handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the session is `Invalid` or `Closed`
    /// - [`Error::Transport`] if the server does not answer `101`
    /// - [`Error::Protocol`] if `Sec-WebSocket-Accept` does not match
    /// - any connection error from the transport
    ///
    /// On error the session is `Closed` and may be opened again.
    pub async fn open(&self, ctx: &Context) -> Result<()> {
        let extra_headers = {
            let mut inner = self.inner.lock();
            transition(&mut inner, SocketState::Opening)?;
            inner.headers.clone()
        };

        match self.handshake(extra_headers, ctx).await {
            Ok((session, protocol)) => {
                let mut inner = self.inner.lock();
                transition(&mut inner, SocketState::Open)?;
                inner.chosen_protocol = protocol.clone();
                inner.message_type = None;
                inner.sending_fragments = false;
                inner.session = Some(session);
                drop(inner);

                info!(
                    session_id = %self.id,
                    url = %self.url,
                    protocol = protocol.as_deref().unwrap_or(""),
                    "WebSocket opened"
                );
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.state = SocketState::Closed;
                drop(inner);
                debug!(session_id = %self.id, error = %e, "WebSocket open failed");
                Err(e)
            }
        }
    }

    async fn handshake(&self, extra_headers: Headers, ctx: &Context) -> Result<(OpenSession, Option<String>)> {
        let native = self.transport.has_native_websocket_support();
        let mut request = Request::new(HttpMethod::Get, self.url.clone());

        let key = generate_key();
        if native {
            if !self.options.protocols.is_empty() {
                request
                    .headers_mut()
                    .insert("sec-websocket-protocol", self.options.protocols.join(", "));
            }
        } else {
            apply_upgrade_headers(&mut request, &key, &self.options.protocols);
        }

        if let Some(service_name) = &self.options.service_name {
            request.headers_mut().insert("user-agent", service_name.as_str());
        }
        for (name, value) in extra_headers.iter() {
            request.headers_mut().insert(name, value);
        }
        let origin = format!("{}://{}", self.url.scheme(), self.url.host_str().unwrap_or_default());
        request.headers_mut().insert("origin", origin);

        let Upgrade { response, stream } = self.transport.open(request, ctx).await?;

        if response.status() != 101 {
            return Err(Error::transport(format!(
                "unexpected handshake response: {} {}",
                response.status(),
                response.reason()
            )));
        }

        let protocol = chosen_protocol(&response);
        let closed = CancellationToken::new();

        if native {
            let session = OpenSession {
                channel: Channel::Native(Arc::clone(&self.transport)),
                closed,
                pinger: None,
            };
            return Ok((session, protocol));
        }

        if !verify_socket_accept(&key, response.headers().get("sec-websocket-accept")) {
            return Err(Error::protocol("Sec-WebSocket-Accept does not match the request key"));
        }

        let mut stream =
            stream.ok_or_else(|| Error::transport("transport returned no connection for the upgrade"))?;
        stream.attach_counters(Arc::clone(&self.counters));
        let stream = Arc::new(stream);

        let pinger = (!self.options.ping_interval.is_zero()).then(|| {
            spawn_pinger(
                Arc::clone(&stream),
                self.options.ping_interval,
                closed.child_token(),
                Arc::clone(&self.counters),
            )
        });

        let session = OpenSession {
            channel: Channel::Raw(stream),
            closed,
            pinger,
        };
        Ok((session, protocol))
    }

    /// Closes with status 1001 (going away).
    ///
    /// # Errors
    ///
    /// See [`close_with_status`](Self::close_with_status).
    pub async fn close(&self, ctx: &Context) -> Result<()> {
        self.close_with_status(CloseCode::GOING_AWAY, "", ctx).await
    }

    /// Sends a close frame, then discards incoming frames until the peer's
    /// close frame arrives or the wait runs out.
    ///
    /// The wait is bounded by `ctx`'s deadline, or by the configured close
    /// timeout when `ctx` has none. Running out is logged, not returned.
    /// Closing a `Closed` session does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the session is not `Open` or `Closed`
    /// - the send error if the close frame cannot be written; the session
    ///   is `Closed` afterwards either way
    /// - [`Error::Cancelled`] if `ctx` is cancelled while waiting
    pub async fn close_with_status(&self, status: CloseCode, reason: &str, ctx: &Context) -> Result<()> {
        let (channel, closed) = {
            let mut inner = self.inner.lock();
            if inner.state == SocketState::Closed {
                return Ok(());
            }
            transition(&mut inner, SocketState::Closing)?;
            match &inner.session {
                Some(session) => (session.channel.clone(), session.closed.clone()),
                None => return Err(Error::invalid_state("open session has no channel")),
            }
        };

        let result = match &channel {
            Channel::Native(transport) => transport.close(status, reason, ctx).await,
            Channel::Raw(_) => self.close_raw(&channel, &closed, status, reason, ctx).await,
        };

        self.finish_close().await;
        info!(session_id = %self.id, status = %status, "WebSocket closed");
        result
    }

    async fn close_raw(
        &self,
        channel: &Channel,
        closed: &CancellationToken,
        status: CloseCode,
        reason: &str,
        ctx: &Context,
    ) -> Result<()> {
        let payload = close_payload(status, reason);
        channel.send(Opcode::Close, true, &payload, ctx).await?;
        self.counters.record_sent(Opcode::Close, payload.len());

        let drain_ctx = match ctx.deadline() {
            Some(_) => ctx.clone(),
            None => ctx.child_with_timeout(self.options.close_timeout),
        };

        loop {
            let frame = tokio::select! {
                biased;

                () = closed.cancelled() => return Ok(()),
                frame = channel.receive(&drain_ctx) => frame,
            };

            match frame {
                Ok(frame) if frame.opcode == Opcode::Close => {
                    self.counters.record_received(Opcode::Close, frame.payload.len());
                    let (status, _) = parse_close_payload(&frame.payload)?;
                    trace!(session_id = %self.id, status = %status, "Peer acknowledged close");
                    return Ok(());
                }
                Ok(frame) => {
                    self.counters.record_dropped();
                    trace!(session_id = %self.id, opcode = %frame.opcode, "Dropping frame during close");
                }
                Err(e) if ctx.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(
                        session_id = %self.id,
                        dropped = self.counters.snapshot().frames_dropped_by_close,
                        error = %e,
                        "Peer did not acknowledge close"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Moves to `Closed` and releases the session's resources.
    async fn finish_close(&self) {
        let session = {
            let mut inner = self.inner.lock();
            inner.state = SocketState::Closed;
            inner.session.take()
        };
        if let Some(session) = session {
            session.teardown().await;
        }
    }
}

// ============================================================================
// WebSocket - Frames
// ============================================================================

impl WebSocket {
    /// Sends a text frame. Pass `is_final = false` for all but the last
    /// fragment of a message.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the session is `Open`
    /// - transport errors from the write
    pub async fn send_text(&self, text: &str, is_final: bool, ctx: &Context) -> Result<()> {
        self.send(Opcode::Text, text.as_bytes(), is_final, ctx).await
    }

    /// Sends a binary frame.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn send_binary(&self, data: &[u8], is_final: bool, ctx: &Context) -> Result<()> {
        self.send(Opcode::Binary, data, is_final, ctx).await
    }

    async fn send(&self, message_type: Opcode, payload: &[u8], is_final: bool, ctx: &Context) -> Result<()> {
        let (channel, opcode) = {
            let mut inner = self.inner.lock();
            let channel = open_channel(&inner, "send")?;
            let opcode = if inner.sending_fragments {
                Opcode::Continuation
            } else {
                message_type
            };
            inner.sending_fragments = !is_final;
            (channel, opcode)
        };

        channel.send(opcode, is_final, payload, ctx).await?;
        self.counters.record_sent(opcode, payload.len());
        Ok(())
    }

    /// Receives the next data or close frame.
    ///
    /// Pings are answered and pongs discarded without returning. A close
    /// frame from the peer is echoed back and moves the session to
    /// `Closed`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the session is `Open` or `Closing`
    /// - [`Error::Protocol`] for a continuation with no message started,
    ///   or a malformed frame
    /// - transport errors from the read
    pub async fn receive_frame(&self, ctx: &Context) -> Result<WebSocketFrame> {
        let channel = {
            let inner = self.inner.lock();
            match (&inner.session, inner.state) {
                (Some(session), SocketState::Open | SocketState::Closing) => session.channel.clone(),
                (_, state) => {
                    return Err(Error::invalid_state(format!("cannot receive while {state}")));
                }
            }
        };

        loop {
            let frame = channel.receive(ctx).await?;

            match frame.opcode {
                Opcode::Ping => {
                    self.counters.record_received(Opcode::Ping, frame.payload.len());
                    trace!(session_id = %self.id, "Answering ping");
                    channel.send(Opcode::Pong, true, &frame.payload, ctx).await?;
                    self.counters.record_sent(Opcode::Pong, frame.payload.len());
                }
                Opcode::Pong => {
                    self.counters.record_received(Opcode::Pong, frame.payload.len());
                }
                Opcode::Text | Opcode::Binary => {
                    self.inner.lock().message_type = Some(frame.opcode);
                    return Ok(self.data_frame(frame.opcode, frame));
                }
                Opcode::Continuation => {
                    let message_type = self.inner.lock().message_type;
                    let Some(message_type) = message_type else {
                        return Err(Error::protocol("continuation frame with no message in progress"));
                    };
                    return Ok(self.data_frame(message_type, frame));
                }
                Opcode::Close => {
                    self.counters.record_received(Opcode::Close, frame.payload.len());
                    return self.peer_closed(&channel, &frame.payload, ctx).await;
                }
            }
        }
    }

    fn data_frame(&self, message_type: Opcode, frame: Frame) -> WebSocketFrame {
        self.counters.record_received(message_type, frame.payload.len());
        let Frame { is_final, payload, .. } = frame;
        if message_type == Opcode::Text {
            WebSocketFrame::Text { is_final, data: payload }
        } else {
            WebSocketFrame::Binary { is_final, data: payload }
        }
    }

    async fn peer_closed(&self, channel: &Channel, payload: &[u8], ctx: &Context) -> Result<WebSocketFrame> {
        let (status, reason) = parse_close_payload(payload)?;

        let was_open = self.state() == SocketState::Open;
        if was_open && matches!(channel, Channel::Raw(_)) {
            let echo = close_payload(status_to_echo(status), "");
            match channel.send(Opcode::Close, true, &echo, ctx).await {
                Ok(()) => self.counters.record_sent(Opcode::Close, echo.len()),
                Err(e) => debug!(session_id = %self.id, error = %e, "Close echo failed"),
            }
        }

        self.finish_close().await;
        info!(session_id = %self.id, status = %status, reason = %reason, "Peer closed WebSocket");
        Ok(WebSocketFrame::PeerClosed { status, reason })
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        if let Some(session) = self.inner.get_mut().session.take() {
            session.closed.cancel();
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn transition(inner: &mut Inner, next: SocketState) -> Result<()> {
    if !inner.state.can_transition_to(next) {
        return Err(Error::invalid_state(format!(
            "cannot move from {} to {next}",
            inner.state
        )));
    }
    inner.state = next;
    Ok(())
}

fn open_channel(inner: &Inner, operation: &str) -> Result<Channel> {
    match (&inner.session, inner.state) {
        (Some(session), SocketState::Open) => Ok(session.channel.clone()),
        (_, state) => Err(Error::invalid_state(format!("cannot {operation} while {state}"))),
    }
}

/// Status to echo for a peer's close. Codes that must not appear on the
/// wire are replaced with a normal closure.
fn status_to_echo(status: CloseCode) -> CloseCode {
    match status {
        CloseCode::NO_STATUS | CloseCode::ABNORMAL | CloseCode::TLS_HANDSHAKE => CloseCode::NORMAL,
        other => other,
    }
}

/// Sends a ping with four random bytes every `interval` until `stop` is
/// cancelled or a write fails.
fn spawn_pinger(
    stream: Arc<FrameStream>,
    interval: Duration,
    stop: CancellationToken,
    counters: Arc<Counters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctx = Context::from_token(stop.clone());
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(connection_id = %stream.id(), interval_ms = interval.as_millis() as u64, "Ping task started");

        loop {
            tokio::select! {
                biased;

                () = stop.cancelled() => break,

                _ = ticker.tick() => {
                    let payload: [u8; 4] = rand::random();
                    if let Err(e) = stream.write_frame(Opcode::Ping, true, &payload, &ctx).await {
                        if !e.is_cancelled() {
                            warn!(connection_id = %stream.id(), error = %e, "Ping failed; stopping ping task");
                        }
                        break;
                    }
                    counters.record_sent(Opcode::Ping, payload.len());
                }
            }
        }

        debug!(connection_id = %stream.id(), "Ping task stopped");
    })
}

// ============================================================================
// Tests
// ============================================================================
