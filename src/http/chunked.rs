//! Chunked transfer-encoding decoder.
//!
//! Decodes `<hex-size>[;ext]\r\n<data>\r\n ... 0\r\n[trailers]\r\n`
//! incrementally. Input may be split anywhere.
//!
//! A size line without any hex digits is read as size zero and ends the
//! message.

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted chunk-size or trailer line.
const MAX_CHUNK_LINE: usize = 8 * 1024;

// ============================================================================
// ChunkState
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Reading a chunk-size line.
    Size,
    /// Copying chunk data.
    Data,
    /// Skipping the CRLF after chunk data.
    DataCrlf,
    /// Skipping trailer lines after the zero-size chunk.
    Trailer,
    /// Final blank line consumed.
    Done,
}

// ============================================================================
// ChunkDecoder
// ============================================================================

/// Incremental chunked-body decoder.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: ChunkState,
    /// Partial size, CRLF, or trailer line.
    line: Vec<u8>,
    chunk_size: u64,
    consumed_in_chunk: u64,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    /// Creates a decoder expecting the first chunk-size line.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
            line: Vec::new(),
            chunk_size: 0,
            consumed_in_chunk: 0,
        }
    }

    /// Size of the current chunk.
    #[inline]
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Bytes of the current chunk already produced.
    #[inline]
    #[must_use]
    pub fn consumed_in_chunk(&self) -> u64 {
        self.consumed_in_chunk
    }

    /// Returns `true` after the terminating chunk and trailer section.
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Returns `true` while trailers after the last chunk are being read.
    #[inline]
    #[must_use]
    pub fn in_trailer(&self) -> bool {
        self.state == ChunkState::Trailer
    }

    /// Decodes from `input` into `output`.
    ///
    /// Returns `(consumed, produced)`. Decoding stops when `input` is
    /// exhausted, `output` is full, or the message is complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a size overflows or a line is too
    /// long.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize)> {
        let mut consumed = 0;
        let mut produced = 0;

        while consumed < input.len() && self.state != ChunkState::Done {
            let rest = &input[consumed..];

            match self.state {
                ChunkState::Data => {
                    if produced == output.len() {
                        break;
                    }
                    let left_in_chunk = self.chunk_size - self.consumed_in_chunk;
                    let n = usize::try_from(left_in_chunk)
                        .unwrap_or(usize::MAX)
                        .min(rest.len())
                        .min(output.len() - produced);

                    output[produced..produced + n].copy_from_slice(&rest[..n]);
                    consumed += n;
                    produced += n;
                    self.consumed_in_chunk += n as u64;

                    if self.consumed_in_chunk == self.chunk_size {
                        self.state = ChunkState::DataCrlf;
                    }
                }
                ChunkState::Size | ChunkState::DataCrlf | ChunkState::Trailer => {
                    let Some(line) = self.take_line(rest, &mut consumed)? else {
                        continue;
                    };
                    self.finish_line(&line)?;
                }
                ChunkState::Done => break,
            }
        }

        Ok((consumed, produced))
    }

    /// Accumulates bytes up to and including `\n`. Returns the line without
    /// its terminator once complete.
    fn take_line(&mut self, rest: &[u8], consumed: &mut usize) -> Result<Option<Vec<u8>>> {
        let line = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => {
                self.line.extend_from_slice(&rest[..end]);
                *consumed += end + 1;
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Some(line)
            }
            None => {
                self.line.extend_from_slice(rest);
                *consumed += rest.len();
                None
            }
        };

        if self.line.len() > MAX_CHUNK_LINE || line.as_ref().is_some_and(|l| l.len() > MAX_CHUNK_LINE) {
            return Err(Error::protocol(format!("chunk line exceeds {MAX_CHUNK_LINE} bytes")));
        }
        Ok(line)
    }

    fn finish_line(&mut self, line: &[u8]) -> Result<()> {
        match self.state {
            ChunkState::Size => {
                self.chunk_size = parse_chunk_size(line)?;
                self.consumed_in_chunk = 0;
                trace!(chunk_size = self.chunk_size, "Chunk header");
                self.state = if self.chunk_size == 0 {
                    ChunkState::Trailer
                } else {
                    ChunkState::Data
                };
            }
            ChunkState::DataCrlf => {
                self.state = ChunkState::Size;
            }
            ChunkState::Trailer => {
                if line.is_empty() {
                    self.state = ChunkState::Done;
                } else {
                    trace!(trailer = %String::from_utf8_lossy(line), "Discarding trailer");
                }
            }
            ChunkState::Data | ChunkState::Done => {}
        }
        Ok(())
    }
}

/// Parses the leading hex digits of a chunk-size line. Extensions after
/// `;` are ignored. No digits at all reads as zero.
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let mut size: u64 = 0;

    for &b in line.iter().skip_while(|b| **b == b' ' || **b == b'\t') {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => break,
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or_else(|| Error::protocol("chunk size overflows"))?;
    }

    Ok(size)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8], step: usize) -> (Vec<u8>, bool) {
        let mut decoder = ChunkDecoder::new();
        let mut out = Vec::new();
        let mut buf = [0u8; 7];

        for piece in input.chunks(step) {
            let mut offset = 0;
            loop {
                let (consumed, produced) = decoder.decode(&piece[offset..], &mut buf).unwrap();
                out.extend_from_slice(&buf[..produced]);
                offset += consumed;
                if offset == piece.len() || decoder.is_completed() || (consumed == 0 && produced == 0) {
                    break;
                }
            }
        }
        (out, decoder.is_completed())
    }

    #[test]
    fn test_single_chunk_then_eof() {
        let (out, done) = decode_all(b"3\r\n123\r\n0\r\n\r\n", 64);
        assert_eq!(out, b"123");
        assert!(done);
    }

    #[test]
    fn test_every_split() {
        let input = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\nExpires: never\r\n\r\n";
        for step in 1..=input.len() {
            let (out, done) = decode_all(input, step);
            assert_eq!(out, b"Wikipedia in\r\n\r\nchunks.", "step {step}");
            assert!(done);
        }
    }

    #[test]
    fn test_bare_crlf_size_line_ends_message() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = [0u8; 8];
        let (consumed, produced) = decoder.decode(b"\r\n\r\n", &mut buf).unwrap();

        assert_eq!(consumed, 4);
        assert_eq!(produced, 0);
        assert!(decoder.is_completed());
    }

    #[test]
    fn test_stops_when_output_full() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = [0u8; 2];
        let input = b"5\r\nhello\r\n0\r\n\r\n";

        let (consumed, produced) = decoder.decode(input, &mut buf).unwrap();
        assert_eq!(produced, 2);
        assert_eq!(&buf, b"he");
        assert_eq!(decoder.chunk_size(), 5);
        assert_eq!(decoder.consumed_in_chunk(), 2);
        assert_eq!(consumed, 5);
        assert!(!decoder.is_completed());
    }

    #[test]
    fn test_trailer_state_visible() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = [0u8; 8];
        decoder.decode(b"0\r\nX-Sum: 1\r\n", &mut buf).unwrap();
        assert!(decoder.in_trailer());
        decoder.decode(b"\r\n", &mut buf).unwrap();
        assert!(decoder.is_completed());
    }

    #[test]
    fn test_size_overflow_is_protocol_error() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = [0u8; 8];
        let err = decoder.decode(b"fffffffffffffffff\r\n", &mut buf).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size(b"1A").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"ff;name=value").unwrap(), 255);
        assert_eq!(parse_chunk_size(b"zz").unwrap(), 0);
        assert_eq!(parse_chunk_size(b"").unwrap(), 0);
    }
}
