//! Error types for the transport core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wire_transport::{Context, Result};
//!
//! async fn example(transport: &HttpTransport, request: Request) -> Result<()> {
//!     let ctx = Context::new();
//!     let response = transport.send(request, &ctx).await?;
//!     let body = response.into_body().read_to_end(&ctx).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Transport`], [`Error::Io`] |
//! | Waiting | [`Error::Timeout`], [`Error::Cancelled`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | Usage | [`Error::InvalidState`], [`Error::Unsupported`] |
//! | External | [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when transport, pool, or WebSocket options are invalid, or
    /// when a destination cannot be served by the configured connector.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Socket-level failure.
    ///
    /// Returned when connecting, sending, or receiving fails, or when the
    /// server closes the connection before the exchange completes.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // Waiting Errors
    // ========================================================================
    /// Socket budget exhausted.
    ///
    /// Returned when a read or write does not make progress within the
    /// transport's I/O timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Caller cancellation observed.
    ///
    /// Returned when the caller's [`Context`](crate::Context) was cancelled
    /// or its deadline passed while the operation was waiting.
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// Description of the operation that was cancelled.
        operation: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Wire protocol violation.
    ///
    /// Returned for malformed status lines, reserved frame bits, accept-key
    /// mismatches, and similar violations.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument.
    ///
    /// Returned when a header line has no `:` delimiter.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// Operation not permitted in the current state.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the state violation.
        message: String,
    },

    /// Operation not supported by the transport.
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// The unsupported operation.
        operation: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a transport error describing a connection that closed before
    /// the expected number of bytes arrived.
    #[inline]
    pub fn premature_close(expected: u64, received: u64) -> Self {
        Self::Transport {
            message: format!(
                "connection closed before the full response was read: \
                 expected {expected} bytes, received {received} bytes"
            ),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a cancellation error.
    #[inline]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    #[inline]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the caller cancelled the operation.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if this is a socket-level failure.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_))
    }

    /// Returns `true` if the peer violated the wire protocol.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when an outer policy retries them on
    /// a fresh connection.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Io(_) | Self::Timeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
