//! Incremental response-head parser.
//!
//! The parser is fed whatever bytes the socket produced. A status line or
//! header split across reads is held in an accumulator until its line
//! terminator arrives, so any fragmentation of the input yields the same
//! result.
//!
//! # States
//!
//! ```text
//! StatusLine ──(status line)──► Headers ──(blank line)──► Completed
//!                                  ▲  │
//!                                  └──┘ header line
//! ```

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::error::{Error, Result};
use crate::http::headers::Headers;
use crate::http::response::{HttpVersion, ResponseHead};

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted status or header line.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Most header lines accepted in one response head.
const MAX_HEADERS: usize = 512;

// ============================================================================
// ParserState
// ============================================================================

/// Position of the parser within a response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for the status line.
    StatusLine,
    /// Reading header lines.
    Headers,
    /// The blank line after the headers was consumed.
    Completed,
}

// ============================================================================
// ResponseParser
// ============================================================================

/// Streaming parser for a status line plus headers.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParserState,
    /// Partial line carried across [`parse`](Self::parse) calls.
    line: Vec<u8>,
    version: HttpVersion,
    status: u16,
    reason: String,
    headers: Headers,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    /// Creates a parser waiting for a status line.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ParserState::StatusLine,
            line: Vec::new(),
            version: HttpVersion::HTTP_11,
            status: 0,
            reason: String::new(),
            headers: Headers::new(),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Returns `true` once the whole head was parsed.
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == ParserState::Completed
    }

    /// Feeds `input` and returns how many bytes were consumed.
    ///
    /// Consumption stops right after the blank line that ends the head;
    /// anything after it belongs to the body.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] for a malformed status line or an oversized line
    /// - [`Error::InvalidArgument`] for a header line without `:`
    pub fn parse(&mut self, input: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        while self.state != ParserState::Completed && consumed < input.len() {
            let rest = &input[consumed..];

            match rest.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.line.extend_from_slice(&rest[..end]);
                    consumed += end + 1;
                    self.check_line_length()?;

                    let mut line = std::mem::take(&mut self.line);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    self.process_line(&line)?;
                }
                None => {
                    self.line.extend_from_slice(rest);
                    consumed = input.len();
                    self.check_line_length()?;
                }
            }
        }

        Ok(consumed)
    }

    /// Returns the parsed head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the head is not complete.
    pub fn finish(self) -> Result<ResponseHead> {
        if self.state != ParserState::Completed {
            return Err(Error::protocol("response head is incomplete"));
        }
        Ok(ResponseHead::new(self.version, self.status, self.reason, self.headers))
    }

    fn check_line_length(&self) -> Result<()> {
        if self.line.len() > MAX_LINE_LENGTH {
            return Err(Error::protocol(format!(
                "response line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }
        Ok(())
    }

    fn process_line(&mut self, line: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(line);

        match self.state {
            ParserState::StatusLine => {
                // Stray CRLFs before the status line are tolerated.
                if text.is_empty() {
                    return Ok(());
                }
                self.parse_status_line(&text)?;
                self.state = ParserState::Headers;
            }
            ParserState::Headers => {
                if text.is_empty() {
                    trace!(status = self.status, headers = self.headers.len(), "Response head parsed");
                    self.state = ParserState::Completed;
                    return Ok(());
                }
                if self.headers.len() >= MAX_HEADERS {
                    return Err(Error::protocol(format!("more than {MAX_HEADERS} response headers")));
                }
                self.headers.add_header_line(&text)?;
            }
            ParserState::Completed => {}
        }
        Ok(())
    }

    fn parse_status_line(&mut self, line: &str) -> Result<()> {
        let malformed = || Error::protocol(format!("malformed status line: {line:?}"));

        let (version, rest) = line.split_once(' ').ok_or_else(malformed)?;
        let rest = rest.trim_start_matches(' ');
        let (code, reason) = match rest.split_once(' ') {
            Some((code, reason)) => (code, reason),
            None => (rest, ""),
        };

        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        self.version = HttpVersion::parse(version)?;
        self.status = code.parse().map_err(|_| malformed())?;
        self.reason = reason.trim().to_owned();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
