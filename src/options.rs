//! Transport, pool, and WebSocket configuration.
//!
//! Each options type has sensible defaults, fluent `with_*` builders, and a
//! `validate()` check. All types are serde-serializable so callers may load
//! them from configuration files.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wire_transport::TransportOptions;
//!
//! let options = TransportOptions::new()
//!     .with_proxy("http://proxy.internal:3128")
//!     .with_connect_timeout(Duration::from_secs(10))
//!     .with_upload_chunk_size(128 * 1024);
//!
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default size of each upload chunk (64 KiB).
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Default size of the response read buffer (1 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default overall budget for a single socket read or write.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on idle connections kept per key.
pub const DEFAULT_MAX_CONNECTIONS_PER_KEY: usize = 1024;

/// Default interval between cleaner passes.
pub const DEFAULT_CLEANER_INTERVAL: Duration = Duration::from_secs(90);

/// Default idle time after which a pooled connection is evicted.
pub const DEFAULT_IDLE_EXPIRATION: Duration = Duration::from_secs(60);

/// Default WebSocket keep-alive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Default time to wait for the peer's close frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(20);

// ============================================================================
// TransportOptions
// ============================================================================

/// Options controlling how connections are established and used.
///
/// The proxy, TLS, and timeout settings also form part of the
/// [`ConnectionKey`](crate::transport::ConnectionKey) fingerprint, so
/// transports with different settings never share pooled connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// HTTP proxy URL (`http://host:port`).
    pub proxy: Option<String>,

    /// PEM file or directory of trusted CAs. Replaces the bundled web PKI
    /// roots when set.
    pub ca_path: Option<PathBuf>,

    /// Verify the server certificate.
    pub tls_verify: bool,

    /// Enforce certificate revocation lists found under `ca_path`.
    pub tls_revocation_check: bool,

    /// Maximum time to establish a connection. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,

    /// Return connections to the pool after successful exchanges.
    pub keep_alive: bool,

    /// Size of each chunk sent from a streamed request body.
    pub upload_chunk_size: usize,

    /// Size of the buffer used to read response heads and bodies.
    pub read_buffer_size: usize,

    /// Overall budget for a single socket read or write.
    pub io_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            ca_path: None,
            tls_verify: true,
            tls_revocation_check: true,
            connect_timeout: None,
            keep_alive: true,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl TransportOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP proxy.
    #[inline]
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the CA bundle path.
    #[inline]
    #[must_use]
    pub fn with_ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    /// Enables or disables certificate verification.
    #[inline]
    #[must_use]
    pub fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Enables or disables certificate revocation checks.
    #[inline]
    #[must_use]
    pub fn with_tls_revocation_check(mut self, check: bool) -> Self {
        self.tls_revocation_check = check;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enables or disables connection reuse.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the upload chunk size.
    #[inline]
    #[must_use]
    pub fn with_upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size;
        self
    }

    /// Sets the read buffer size.
    #[inline]
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the socket I/O budget.
    #[inline]
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a size or timeout is zero, or if the
    /// proxy is not an `http://` URL.
    pub fn validate(&self) -> Result<()> {
        if self.upload_chunk_size == 0 {
            return Err(Error::config("upload_chunk_size must be greater than zero"));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::config("read_buffer_size must be greater than zero"));
        }
        if self.io_timeout.is_zero() {
            return Err(Error::config("io_timeout must be greater than zero"));
        }
        if let Some(proxy) = &self.proxy {
            let url = url::Url::parse(proxy)
                .map_err(|e| Error::config(format!("invalid proxy '{proxy}': {e}")))?;
            if url.scheme() != "http" || url.host_str().is_none() {
                return Err(Error::config(format!(
                    "proxy must be an http://host[:port] URL, got '{proxy}'"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// PoolOptions
// ============================================================================

/// Options for [`ConnectionPool`](crate::transport::ConnectionPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Maximum idle connections kept per key.
    pub max_connections_per_key: usize,

    /// Interval between cleaner passes.
    pub cleaner_interval: Duration,

    /// Idle time after which a pooled connection is evicted.
    pub idle_expiration: Duration,

    /// Number of exchanges after which a connection is no longer pooled.
    pub max_connection_uses: Option<u64>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections_per_key: DEFAULT_MAX_CONNECTIONS_PER_KEY,
            cleaner_interval: DEFAULT_CLEANER_INTERVAL,
            idle_expiration: DEFAULT_IDLE_EXPIRATION,
            max_connection_uses: None,
        }
    }
}

impl PoolOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-key idle connection cap.
    #[inline]
    #[must_use]
    pub fn with_max_connections_per_key(mut self, max: usize) -> Self {
        self.max_connections_per_key = max;
        self
    }

    /// Sets the cleaner interval.
    #[inline]
    #[must_use]
    pub fn with_cleaner_interval(mut self, interval: Duration) -> Self {
        self.cleaner_interval = interval;
        self
    }

    /// Sets the idle expiration threshold.
    #[inline]
    #[must_use]
    pub fn with_idle_expiration(mut self, expiration: Duration) -> Self {
        self.idle_expiration = expiration;
        self
    }

    /// Sets the per-connection usage limit.
    #[inline]
    #[must_use]
    pub fn with_max_connection_uses(mut self, uses: u64) -> Self {
        self.max_connection_uses = Some(uses);
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a limit or interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections_per_key == 0 {
            return Err(Error::config("max_connections_per_key must be greater than zero"));
        }
        if self.cleaner_interval.is_zero() {
            return Err(Error::config("cleaner_interval must be greater than zero"));
        }
        if self.max_connection_uses == Some(0) {
            return Err(Error::config("max_connection_uses must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// WebSocketOptions
// ============================================================================

/// Options for [`WebSocket`](crate::websocket::WebSocket) sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketOptions {
    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in preference order.
    pub protocols: Vec<String>,

    /// Interval between keep-alive pings. Zero disables pings.
    pub ping_interval: Duration,

    /// Service name sent as the `User-Agent`.
    pub service_name: Option<String>,

    /// Time to wait for the peer's close frame when the caller gave no
    /// deadline.
    pub close_timeout: Duration,

    /// Options for the underlying connection.
    pub transport: TransportOptions,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
            service_name: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            transport: TransportOptions::default().with_keep_alive(false),
        }
    }
}

impl WebSocketOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an offered subprotocol.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Sets the ping interval.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the service name.
    #[inline]
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Sets the close timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the transport options. Keep-alive is always turned off for
    /// upgraded connections.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport.with_keep_alive(false);
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a subprotocol is empty or contains a
    /// separator, or if the transport options are invalid.
    pub fn validate(&self) -> Result<()> {
        for protocol in &self.protocols {
            if protocol.is_empty() || protocol.contains([',', ' ', '\r', '\n']) {
                return Err(Error::config(format!("invalid subprotocol '{protocol}'")));
            }
        }
        self.transport.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================
