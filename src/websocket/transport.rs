//! Transports able to carry a WebSocket session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use super::frame::{CloseCode, Frame, Opcode};
use super::stream::FrameStream;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::request::Request;
use crate::http::response::ResponseHead;
use crate::http::transport::HttpTransport;

// ============================================================================
// Upgrade
// ============================================================================

/// Result of an opening handshake.
pub struct Upgrade {
    /// The handshake response head.
    pub response: ResponseHead,
    /// The raw connection on `101`, for transports without native support.
    pub stream: Option<FrameStream>,
}

impl fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgrade")
            .field("response", &self.response)
            .field("stream", &self.stream)
            .finish()
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// A transport that can open WebSocket sessions.
///
/// Raw transports return a [`FrameStream`] from [`open`](Self::open) and
/// leave framing to the session. Transports with native support handle
/// framing, masking, and keep-alive themselves and implement the frame
/// hooks instead.
#[async_trait]
pub trait WebSocketTransport: Send + Sync {
    /// Sends the upgrade request.
    ///
    /// Raw transports send `request` as is; the session has already added
    /// the upgrade headers.
    async fn open(&self, request: Request, ctx: &Context) -> Result<Upgrade>;

    /// Returns `true` if the transport frames messages itself.
    fn has_native_websocket_support(&self) -> bool {
        false
    }

    /// Sends one frame on a native session.
    async fn send_frame(&self, opcode: Opcode, is_final: bool, payload: &[u8], ctx: &Context) -> Result<()> {
        let _ = (opcode, is_final, payload, ctx);
        Err(Error::unsupported("send_frame"))
    }

    /// Receives one frame from a native session.
    async fn receive_frame(&self, ctx: &Context) -> Result<Frame> {
        let _ = ctx;
        Err(Error::unsupported("receive_frame"))
    }

    /// Runs the close handshake on a native session.
    async fn close(&self, code: CloseCode, reason: &str, ctx: &Context) -> Result<()> {
        let _ = (code, reason, ctx);
        Err(Error::unsupported("close"))
    }
}

#[async_trait]
impl WebSocketTransport for HttpTransport {
    async fn open(&self, request: Request, ctx: &Context) -> Result<Upgrade> {
        let (response, upgraded) = self.upgrade(&request, ctx).await?;
        debug!(url = %request.url(), status = response.status(), "Upgrade response received");

        let read_buffer_size = self.options().read_buffer_size;
        let stream = upgraded.map(|upgraded| FrameStream::new(upgraded, read_buffer_size));
        Ok(Upgrade { response, stream })
    }
}

// ============================================================================
// Tests
// ============================================================================
