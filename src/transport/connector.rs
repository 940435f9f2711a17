//! Connection establishment.
//!
//! A [`Connector`] turns a [`ConnectionKey`] into a connected socket. The
//! default [`TcpConnector`] speaks TCP, optionally through an HTTP `CONNECT`
//! proxy tunnel, and runs a rustls handshake for `https`/`wss` destinations.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, trace};
use url::Url;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::ResponseParser;
use crate::options::DEFAULT_IO_TIMEOUT;
use crate::transport::io::{self, BoxedSocket};
use crate::transport::key::ConnectionKey;
use crate::transport::tls::TlsConfigs;

// ============================================================================
// Constants
// ============================================================================

/// Read buffer used while waiting for the proxy's tunnel reply.
const TUNNEL_READ_BUFFER: usize = 1024;

// ============================================================================
// Connector
// ============================================================================

/// Establishes connections for a key.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to the key's destination.
    ///
    /// # Errors
    ///
    /// Implementations return [`Error::Transport`] for network failures,
    /// [`Error::Cancelled`] when `ctx` is cancelled, and [`Error::Config`]
    /// for destinations they cannot serve.
    async fn connect(&self, key: &ConnectionKey, ctx: &Context) -> Result<BoxedSocket>;
}

// ============================================================================
// TcpConnector
// ============================================================================

/// TCP connector with TLS and HTTP proxy tunnelling.
///
/// TLS follows the key's settings: `tls_verify`, `ca_path` and
/// `tls_revocation_check`. Clones share one cache of client configurations.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Budget for each proxy tunnel read or write, and for the TLS handshake.
    io_timeout: Duration,
    tls: Arc<TlsConfigs>,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            tls: Arc::new(TlsConfigs::default()),
        }
    }
}

impl TcpConnector {
    /// Creates a connector with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the I/O budget used for the proxy and TLS handshakes.
    #[inline]
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, key: &ConnectionKey, ctx: &Context) -> Result<BoxedSocket> {
        let destination = key.destination();
        let target = match key.proxy() {
            Some(proxy) => proxy_authority(proxy)?,
            None => destination.authority(),
        };

        let mut stream = open_tcp(&target, key.connect_timeout(), ctx).await?;
        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "Failed to set TCP_NODELAY");
        }

        if key.proxy().is_some() {
            self.tunnel(&mut stream, &destination.authority(), ctx).await?;
        }

        let socket: BoxedSocket = Box::new(stream);
        let socket = if destination.is_secure() {
            self.tls.handshake(key, socket, self.io_timeout, ctx).await?
        } else {
            socket
        };

        debug!(key = %key, target = %target, "Connected");
        Ok(socket)
    }
}

// ============================================================================
// TcpConnector - Internal
// ============================================================================

impl TcpConnector {
    /// Opens a `CONNECT` tunnel through an already connected proxy.
    async fn tunnel(&self, stream: &mut TcpStream, authority: &str, ctx: &Context) -> Result<()> {
        let request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
        io::write_all(stream, request.as_bytes(), self.io_timeout, ctx, "proxy CONNECT").await?;

        let mut parser = ResponseParser::new();
        let mut buf = [0u8; TUNNEL_READ_BUFFER];

        while !parser.is_completed() {
            let n = io::read_some(stream, &mut buf, self.io_timeout, ctx, "proxy reply").await?;
            if n == 0 {
                return Err(Error::transport(format!(
                    "proxy closed the connection before answering CONNECT {authority}"
                )));
            }

            let consumed = parser.parse(&buf[..n])?;
            if parser.is_completed() && consumed < n {
                return Err(Error::protocol("proxy sent data after the CONNECT reply"));
            }
        }

        let head = parser.finish()?;
        if !(200..300).contains(&head.status()) {
            return Err(Error::transport(format!(
                "proxy refused CONNECT {authority}: {} {}",
                head.status(),
                head.reason()
            )));
        }

        debug!(authority, status = head.status(), "Proxy tunnel established");
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Connects a TCP stream, honouring the connect timeout and cancellation.
async fn open_tcp(target: &str, connect_timeout: Option<Duration>, ctx: &Context) -> Result<TcpStream> {
    ctx.check("connect")?;

    let connect = async {
        match connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, TcpStream::connect(target)).await {
                Ok(result) => result.map_err(|e| Error::transport(format!("connect to {target} failed: {e}"))),
                Err(_) => Err(Error::timeout(
                    format!("connect to {target}"),
                    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                )),
            },
            None => TcpStream::connect(target)
                .await
                .map_err(|e| Error::transport(format!("connect to {target} failed: {e}"))),
        }
    };

    tokio::select! {
        biased;
        () = ctx.cancelled() => Err(Error::cancelled("connect")),
        result = connect => result,
    }
}

/// Extracts `host:port` from an `http://` proxy URL.
fn proxy_authority(proxy: &str) -> Result<String> {
    let url = Url::parse(proxy).map_err(|e| Error::config(format!("invalid proxy '{proxy}': {e}")))?;
    if url.scheme() != "http" {
        return Err(Error::config(format!("proxy must use http://, got '{proxy}'")));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::config(format!("proxy has no host: '{proxy}'")))?;
    let port = url.port_or_known_default().unwrap_or(80);
    Ok(format!("{host}:{port}"))
}

// ============================================================================
// Tests
// ============================================================================
