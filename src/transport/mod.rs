//! Connection transport layer.
//!
//! This module owns network connections: how they are established, how
//! bytes move over them under cancellation, and how idle connections are
//! cached for reuse.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  acquire   ┌────────────────┐  connect  ┌─────────────┐
//! │ HttpTransport │──────────► │ ConnectionPool │─────────► │  Connector  │
//! │               │ ◄───────── │  (per key,     │ ◄──────── │ (TCP, TLS,  │
//! │               │  release   │   LIFO)        │  socket   │  proxy)     │
//! └───────────────┘            └────────────────┘           └─────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `key` | Destinations and pool keys |
//! | `io` | Sliced, cancellable socket reads and writes |
//! | `connector` | Connection establishment |
//! | `connection` | Pooled socket wrapper |
//! | `pool` | Keyed idle-connection cache with background cleaner |
//! | `tls` | rustls client configuration per key |

// ============================================================================
// Submodules
// ============================================================================

/// Pooled socket wrapper.
pub mod connection;

/// Connection establishment.
pub mod connector;

/// Sliced socket I/O.
pub mod io;

/// Destinations and pool keys.
pub mod key;

/// Keyed idle-connection cache.
pub mod pool;

/// TLS client configuration and handshake.
mod tls;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use connector::{Connector, TcpConnector};
pub use io::{BoxedSocket, Socket};
pub use key::{ConnectionKey, Destination};
pub use pool::ConnectionPool;
