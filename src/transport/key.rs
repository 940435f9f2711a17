//! Pool keys.
//!
//! A [`ConnectionKey`] identifies interchangeable connections: same
//! destination and same connection-affecting configuration.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;

use url::Url;

use crate::error::{Error, Result};
use crate::options::TransportOptions;

// ============================================================================
// Destination
// ============================================================================

/// Scheme, host, and port of a remote endpoint.
///
/// `ws` and `wss` URLs normalize to `http` and `https`; the upgrade runs
/// over a plain HTTP/1.1 connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// `http` or `https`.
    scheme: String,
    /// Host as it appears in the URL (IPv6 literals keep their brackets).
    host: String,
    /// Port, explicit or scheme default.
    port: u16,
}

impl Destination {
    /// Creates a destination from its parts.
    #[must_use]
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Extracts the destination of a URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for schemes other than `http`, `https`,
    /// `ws`, and `wss`, or when the URL has no host.
    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => return Err(Error::config(format!("unsupported URL scheme '{other}'"))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("URL has no host: {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("URL has no port: {url}")))?;

        Ok(Self::new(scheme, host, port))
    }

    /// Returns the normalized scheme.
    #[inline]
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` for `https` destinations.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }

    /// Returns `host:port`, the form used to connect and in `CONNECT`.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the `Host` header value; the port is omitted when it is the
    /// scheme default.
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.is_secure() { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// ============================================================================
// ConnectionKey
// ============================================================================

/// Destination plus configuration fingerprint.
///
/// Two connections are interchangeable only when their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    destination: Destination,
    proxy: Option<String>,
    tls_verify: bool,
    tls_revocation_check: bool,
    ca_path: Option<PathBuf>,
    connect_timeout_ms: Option<u128>,
}

impl ConnectionKey {
    /// Builds the key for `destination` under `options`.
    #[must_use]
    pub fn new(destination: Destination, options: &TransportOptions) -> Self {
        Self {
            destination,
            proxy: options.proxy.clone(),
            tls_verify: options.tls_verify,
            tls_revocation_check: options.tls_revocation_check,
            ca_path: options.ca_path.clone(),
            connect_timeout_ms: options.connect_timeout.map(|t| t.as_millis()),
        }
    }

    /// Builds the key for a URL under `options`.
    ///
    /// # Errors
    ///
    /// See [`Destination::from_url`].
    pub fn for_url(url: &Url, options: &TransportOptions) -> Result<Self> {
        Ok(Self::new(Destination::from_url(url)?, options))
    }

    /// Returns the destination.
    #[inline]
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Returns the proxy, if any.
    #[inline]
    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Returns whether certificates are verified.
    #[inline]
    #[must_use]
    pub fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Returns whether revocation is checked.
    #[inline]
    #[must_use]
    pub fn tls_revocation_check(&self) -> bool {
        self.tls_revocation_check
    }

    /// Returns the CA bundle path, if any.
    #[inline]
    #[must_use]
    pub fn ca_path(&self) -> Option<&PathBuf> {
        self.ca_path.as_ref()
    }

    /// Returns the connect timeout, if any.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<std::time::Duration> {
        self.connect_timeout_ms
            .map(|ms| std::time::Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX)))
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(proxy) = &self.proxy {
            write!(f, " via {proxy}")?;
        }
        if !self.tls_verify {
            write!(f, " [insecure]")?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
