//! Incoming responses.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::Bytes;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::exchange::ResponseBody;
use crate::http::headers::Headers;

// ============================================================================
// HttpVersion
// ============================================================================

/// Protocol version from a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HttpVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl HttpVersion {
    /// `HTTP/1.0`
    pub const HTTP_10: Self = Self { major: 1, minor: 0 };
    /// `HTTP/1.1`
    pub const HTTP_11: Self = Self { major: 1, minor: 1 };

    /// Parses `HTTP/x.y`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for anything else.
    pub fn parse(token: &str) -> Result<Self> {
        let digits = token
            .strip_prefix("HTTP/")
            .ok_or_else(|| Error::protocol(format!("invalid HTTP version '{token}'")))?;
        let (major, minor) = digits
            .split_once('.')
            .ok_or_else(|| Error::protocol(format!("invalid HTTP version '{token}'")))?;

        let parse_digit = |s: &str| -> Result<u8> {
            if s.len() != 1 {
                return Err(Error::protocol(format!("invalid HTTP version '{token}'")));
            }
            s.parse::<u8>()
                .map_err(|_| Error::protocol(format!("invalid HTTP version '{token}'")))
        };

        Ok(Self {
            major: parse_digit(major)?,
            minor: parse_digit(minor)?,
        })
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

// ============================================================================
// ResponseHead
// ============================================================================

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    version: HttpVersion,
    status: u16,
    reason: String,
    headers: Headers,
}

impl ResponseHead {
    /// Creates a head from its parts.
    #[must_use]
    pub fn new(version: HttpVersion, status: u16, reason: impl Into<String>, headers: Headers) -> Self {
        Self {
            version,
            status,
            reason: reason.into(),
            headers,
        }
    }

    /// Returns the protocol version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Returns the status code.
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the reason phrase.
    #[inline]
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns `true` for 2xx statuses.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns `true` for 1xx statuses.
    #[inline]
    #[must_use]
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response whose body is read on demand.
///
/// Dropping the response before the body is drained closes the connection.
#[derive(Debug)]
pub struct Response {
    head: ResponseHead,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(head: ResponseHead, body: ResponseBody) -> Self {
        Self { head, body }
    }

    /// Returns the status line and headers.
    #[inline]
    #[must_use]
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Returns the status code.
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.head.status
    }

    /// Returns the reason phrase.
    #[inline]
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.head.reason
    }

    /// Returns the protocol version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.head.version
    }

    /// Returns the headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    /// Returns the body mutably.
    #[inline]
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Splits off the body.
    #[must_use]
    pub fn into_parts(self) -> (ResponseHead, ResponseBody) {
        (self.head, self.body)
    }

    /// Consumes the response and returns its body.
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// See [`ResponseBody::read_to_end`].
    pub async fn bytes(self, ctx: &Context) -> Result<Bytes> {
        self.body.read_to_end(ctx).await
    }
}

// ============================================================================
// Tests
// ============================================================================
