//! Wire Transport - HTTP/1.1 and WebSocket transport core.
//!
//! This library moves bytes for service clients: it opens and pools
//! connections, frames HTTP/1.1 requests and responses by hand, and runs
//! RFC 6455 WebSocket sessions over upgraded connections.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐      ┌───────────────┐      ┌────────────────┐
//! │   WebSocket   │────► │ HttpTransport │────► │ ConnectionPool │
//! │   (session)   │      │  (exchange)   │      │  (keyed LIFO)  │
//! └───────────────┘      └───────────────┘      └────────────────┘
//!                                                        │
//!                                                        ▼
//!                                                ┌───────────────┐
//!                                                │   Connector   │
//!                                                │ (TCP, tunnel) │
//!                                                └───────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Every blocking call takes a [`Context`] and waits in slices of at most
//!   one second, so cancellation is observed promptly
//! - A connection returns to the pool only after a fully drained `2xx`
//!   response
//! - Pools are values, not globals: share one by passing the same `Arc`
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use wire_transport::{Context, HttpTransport, Request, Result, TransportOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = HttpTransport::new(TransportOptions::default())?;
//!     let ctx = Context::with_timeout(Duration::from_secs(30));
//!
//!     let response = transport.send(Request::get("http://127.0.0.1:8080/")?, &ctx).await?;
//!     println!("status: {}", response.status());
//!
//!     let body = response.bytes(&ctx).await?;
//!     println!("{} bytes", body.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Cancellation tokens and deadlines |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection and session IDs |
//! | [`options`] | Transport, pool, and WebSocket options |
//! | [`transport`] | Connections, connectors, and the pool |
//! | [`http`] | HTTP/1.1 requests, responses, and exchanges |
//! | [`websocket`] | WebSocket frames, handshake, and sessions |

// ============================================================================
// Modules
// ============================================================================

/// Cancellation context.
///
/// Every blocking operation takes a [`Context`].
pub mod context;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// HTTP/1.1 client.
///
/// Use [`HttpTransport::send`] to run a request over a pooled connection.
pub mod http;

/// Type-safe identifiers for connections and sessions.
pub mod identifiers;

/// Configuration structs.
pub mod options;

/// Connection transport layer.
///
/// Connection establishment, sliced socket I/O, and the connection pool.
pub mod transport;

/// WebSocket client.
///
/// Use [`WebSocket::new`] to create a session.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

// Context
pub use context::Context;

// Error types
pub use error::{Error, Result};

// HTTP types
pub use http::{
    BodyStream, Headers, HttpMethod, HttpTransport, MemoryBodyStream, Request, RequestBody,
    Response, ResponseBody, ResponseHead,
};

// Identifier types
pub use identifiers::{ConnectionId, SessionId};

// Options
pub use options::{PoolOptions, TransportOptions, WebSocketOptions};

// Transport types
pub use transport::{Connection, ConnectionKey, ConnectionPool, Connector, TcpConnector};

// WebSocket types
pub use websocket::{CloseCode, SocketState, WebSocket, WebSocketFrame, WebSocketStatistics};
