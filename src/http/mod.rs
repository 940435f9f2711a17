//! HTTP/1.1 over raw connections.
//!
//! Requests are framed by hand: the head is serialized directly, responses
//! are parsed incrementally, and bodies are exposed as pull streams so the
//! connection can go back to the pool once the body is drained.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `headers` | Ordered, case-insensitive header map |
//! | `request` | Methods, requests, and request bodies |
//! | `response` | Status line, response head, and response |
//! | `body` | Rewindable request body sources |
//! | `parser` | Incremental response-head parser |
//! | `chunked` | Chunked transfer-encoding decoder |
//! | `exchange` | One request/response over one connection |
//! | `transport` | Pooled HTTP client transport |

// ============================================================================
// Submodules
// ============================================================================

/// Rewindable request body sources.
pub mod body;

/// Chunked transfer-encoding decoder.
pub mod chunked;

/// One request/response exchange.
pub mod exchange;

/// Header map.
pub mod headers;

/// Incremental response-head parser.
pub mod parser;

/// Requests.
pub mod request;

/// Responses.
pub mod response;

/// Pooled HTTP client transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use body::{BodyStream, MemoryBodyStream};
pub use chunked::ChunkDecoder;
pub use exchange::{BodyFraming, ExchangeState, HttpExchange, ResponseBody, UpgradedConnection};
pub use headers::Headers;
pub use parser::{ParserState, ResponseParser};
pub use request::{HttpMethod, Request, RequestBody};
pub use response::{HttpVersion, Response, ResponseHead};
pub use transport::HttpTransport;
