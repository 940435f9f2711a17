//! Opening handshake helpers.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::http::request::Request;
use crate::http::response::ResponseHead;

// ============================================================================
// Constants
// ============================================================================

/// GUID appended to the key before hashing (RFC 6455 §1.3).
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version sent in `Sec-WebSocket-Version`.
pub const WEBSOCKET_VERSION: &str = "13";

// ============================================================================
// Key Helpers
// ============================================================================

/// Generates a `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// Computes the `Sec-WebSocket-Accept` value the server must send for `key`.
#[must_use]
pub fn compute_socket_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Returns `true` if `accept` matches `key`. A missing header never matches.
#[must_use]
pub fn verify_socket_accept(key: &str, accept: Option<&str>) -> bool {
    accept.is_some_and(|accept| accept.trim() == compute_socket_accept(key))
}

// ============================================================================
// Request Decoration
// ============================================================================

/// Adds the upgrade headers to `request`.
///
/// Caller-supplied headers with the same names are replaced.
pub(crate) fn apply_upgrade_headers(request: &mut Request, key: &str, protocols: &[String]) {
    let headers = request.headers_mut();
    headers.insert("upgrade", "websocket");
    headers.insert("connection", "upgrade");
    headers.insert("sec-websocket-version", WEBSOCKET_VERSION);
    headers.insert("sec-websocket-key", key);
    if !protocols.is_empty() {
        headers.insert("sec-websocket-protocol", protocols.join(", "));
    }
}

/// Returns the subprotocol the server picked, if any.
pub(crate) fn chosen_protocol(head: &ResponseHead) -> Option<String> {
    head.headers()
        .get("sec-websocket-protocol")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::headers::Headers;
    use crate::http::response::HttpVersion;

    #[test]
    fn test_rfc_sample_accept() {
        assert_eq!(
            compute_socket_accept("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_verify_socket_accept() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert!(verify_socket_accept(key, Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")));
        assert!(verify_socket_accept(key, Some(" s3pPLMBiTxaQ9kYGzzhZRbK+xOo= ")));
        assert!(!verify_socket_accept(key, Some("AAAAAAAAAAAAAAAAAAAAAAAAAAA=")));
        assert!(!verify_socket_accept(key, None));
    }

    #[test]
    fn test_generate_key_is_16_bytes() {
        let key = generate_key();
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_apply_upgrade_headers() {
        let mut request = Request::get("ws://svc/socket")
            .unwrap()
            .with_header("Connection", "keep-alive");
        apply_upgrade_headers(&mut request, "abc", &["chat".to_string(), "v2".to_string()]);

        let headers = request.headers();
        assert_eq!(headers.get("connection"), Some("upgrade"));
        assert_eq!(headers.get("upgrade"), Some("websocket"));
        assert_eq!(headers.get("sec-websocket-version"), Some("13"));
        assert_eq!(headers.get("sec-websocket-key"), Some("abc"));
        assert_eq!(headers.get("sec-websocket-protocol"), Some("chat, v2"));
    }

    #[test]
    fn test_chosen_protocol() {
        let mut headers = Headers::new();
        headers.insert("Sec-WebSocket-Protocol", " chat ");
        let head = ResponseHead::new(HttpVersion::HTTP_11, 101, "Switching Protocols", headers);
        assert_eq!(chosen_protocol(&head).as_deref(), Some("chat"));

        let head = ResponseHead::new(HttpVersion::HTTP_11, 101, "Switching Protocols", Headers::new());
        assert_eq!(chosen_protocol(&head), None);
    }
}
