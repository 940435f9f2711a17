//! Outgoing requests.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::Bytes;
use url::Url;

use crate::error::Result;
use crate::http::body::BodyStream;
use crate::http::headers::Headers;

// ============================================================================
// HttpMethod
// ============================================================================

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `PATCH`
    Patch,
}

impl HttpMethod {
    /// Returns the method token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RequestBody
// ============================================================================

/// Request payload.
#[derive(Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// In-memory body.
    Bytes(Bytes),
    /// Streamed body, sent in chunks.
    Stream(Box<dyn BodyStream>),
}

impl RequestBody {
    /// Returns the body length in bytes.
    #[must_use]
    pub fn length(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Stream(stream) => stream.length(),
        }
    }

    /// Returns `true` if there is nothing to upload.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Rewinds a streamed body. Other bodies need no rewinding.
    ///
    /// # Errors
    ///
    /// Propagates the stream's rewind error.
    pub fn rewind(&mut self) -> Result<()> {
        match self {
            Self::Stream(stream) => stream.rewind(),
            Self::Empty | Self::Bytes(_) => Ok(()),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(stream) => f.debug_tuple("Stream").field(&stream.length()).finish(),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

// ============================================================================
// Request
// ============================================================================

/// One HTTP/1.1 request.
///
/// # Example
///
/// ```ignore
/// let request = Request::new(HttpMethod::Post, url)
///     .with_header("Content-Type", "application/json")
///     .with_body(r#"{"ok":true}"#);
/// ```
#[derive(Debug)]
pub struct Request {
    method: HttpMethod,
    url: Url,
    headers: Headers,
    body: RequestBody,
}

impl Request {
    /// Creates a request with no headers and no body.
    #[must_use]
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: RequestBody::Empty,
        }
    }

    /// Creates a `GET` request for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`](crate::Error::Url) if `url` does not parse.
    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(HttpMethod::Get, Url::parse(url)?))
    }

    /// Adds a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a streamed body.
    #[inline]
    #[must_use]
    pub fn with_stream(mut self, stream: impl BodyStream + 'static) -> Self {
        self.body = RequestBody::Stream(Box::new(stream));
        self
    }

    /// Returns the method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Returns the URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the headers mutably.
    #[inline]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Returns the body mutably.
    #[inline]
    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// Returns the origin-form request target: path plus query.
    #[must_use]
    pub fn request_target(&self) -> String {
        let path = self.url.path();
        let path = if path.is_empty() { "/" } else { path };
        match self.url.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        }
    }
}

/// Serializes a request line and header block, including the blank line.
#[must_use]
pub(crate) fn serialize_head(method: HttpMethod, target: &str, headers: &Headers) -> Vec<u8> {
    let mut head = format!("{method} {target} HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::body::MemoryBodyStream;

    #[test]
    fn test_request_target_includes_query() {
        let request = Request::get("http://example.com/a/b?x=1&y=2").unwrap();
        assert_eq!(request.request_target(), "/a/b?x=1&y=2");

        let root = Request::get("http://example.com").unwrap();
        assert_eq!(root.request_target(), "/");
    }

    #[test]
    fn test_body_lengths() {
        assert_eq!(RequestBody::Empty.length(), 0);
        assert_eq!(RequestBody::from("hello").length(), 5);

        let request = Request::get("http://example.com/")
            .unwrap()
            .with_stream(MemoryBodyStream::new(vec![0u8; 300]));
        assert_eq!(request.body().length(), 300);
    }

    #[test]
    fn test_serialize_head() {
        let mut headers = Headers::new();
        headers.insert("Host", "example.com");
        headers.insert("content-length", "0");

        let head = serialize_head(HttpMethod::Delete, "/item/7", &headers);
        assert_eq!(
            head,
            b"DELETE /item/7 HTTP/1.1\r\nhost: example.com\r\ncontent-length: 0\r\n\r\n".to_vec()
        );
    }
}
