//! RFC 6455 WebSocket client.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐  open   ┌────────────────────┐  upgrade  ┌───────────────┐
//! │ WebSocket │───────► │ WebSocketTransport │─────────► │ HttpTransport │
//! │ (session) │         └────────────────────┘           └───────────────┘
//! │           │  frames ┌─────────────┐
//! │           │───────► │ FrameStream │ ◄── ping task
//! └───────────┘         └─────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame encoding and decoding |
//! | `handshake` | Accept-key computation and upgrade headers |
//! | `stream` | Frame I/O over an upgraded connection |
//! | `statistics` | Per-session traffic counters |
//! | `transport` | Transports able to carry a session |
//! | `session` | The client session and its state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Frame encoding and decoding.
pub mod frame;

/// Opening handshake helpers.
pub mod handshake;

/// Client session.
pub mod session;

/// Traffic counters.
pub mod statistics;

/// Frame I/O.
pub mod stream;

/// WebSocket-capable transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{ByteSource, CloseCode, Frame, Opcode};
pub use handshake::{compute_socket_accept, generate_key, verify_socket_accept};
pub use session::{SocketState, WebSocket, WebSocketFrame};
pub use statistics::WebSocketStatistics;
pub use stream::FrameStream;
pub use transport::{Upgrade, WebSocketTransport};
