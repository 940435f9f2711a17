//! RFC 6455 frame encoding and decoding.
//!
//! Pure framing with no socket handling: [`encode`] produces the bytes of
//! one client frame and [`decode`] pulls one frame out of a [`ByteSource`].
//!
//! # Frame Layout
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |  (if payload len==126/127)    |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                  Masking key (if MASK set)                    |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use rand::RngCore;

use crate::context::Context;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// FIN bit.
const FIN_BIT: u8 = 0x80;

/// RSV1-3 bits.
const RESERVED_BITS: u8 = 0x70;

/// Opcode bits.
const OPCODE_MASK: u8 = 0x0F;

/// MASK bit in the second byte.
const MASK_BIT: u8 = 0x80;

/// Payload length bits in the second byte.
const LENGTH_MASK: u8 = 0x7F;

/// Largest payload length stored inline.
const MAX_INLINE_LENGTH: usize = 125;

/// Sentinel for a 16-bit extended length.
const LENGTH_16: u8 = 126;

/// Sentinel for a 64-bit extended length.
const LENGTH_64: u8 = 127;

/// Largest accepted payload.
pub const MAX_PAYLOAD_LENGTH: u64 = 256 * 1024 * 1024;

// ============================================================================
// Opcode
// ============================================================================

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continues a fragmented message.
    Continuation,
    /// UTF-8 text.
    Text,
    /// Binary data.
    Binary,
    /// Close handshake.
    Close,
    /// Keep-alive request.
    Ping,
    /// Keep-alive reply.
    Pong,
}

impl Opcode {
    /// Parses the low four bits of the first header byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Returns `true` for Close, Ping, and Pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// CloseCode
// ============================================================================

/// Close status code (RFC 6455 §7.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// 1000: normal closure.
    pub const NORMAL: Self = Self(1000);
    /// 1001: endpoint going away.
    pub const GOING_AWAY: Self = Self(1001);
    /// 1002: protocol error.
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// 1003: unsupported data.
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    /// 1005: no status received. Never sent.
    pub const NO_STATUS: Self = Self(1005);
    /// 1006: abnormal closure. Never sent.
    pub const ABNORMAL: Self = Self(1006);
    /// 1007: invalid payload data.
    pub const INVALID_PAYLOAD: Self = Self(1007);
    /// 1008: policy violation.
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// 1009: message too big.
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    /// 1010: mandatory extension missing.
    pub const MANDATORY_EXTENSION: Self = Self(1010);
    /// 1011: internal server error.
    pub const INTERNAL_ERROR: Self = Self(1011);
    /// 1012: service restart.
    pub const SERVICE_RESTART: Self = Self(1012);
    /// 1013: try again later.
    pub const TRY_AGAIN_LATER: Self = Self(1013);
    /// 1014: bad gateway.
    pub const BAD_GATEWAY: Self = Self(1014);
    /// 1015: TLS handshake failure. Never sent.
    pub const TLS_HANDSHAKE: Self = Self(1015);

    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame opcode.
    pub opcode: Opcode,
    /// FIN bit.
    pub is_final: bool,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(opcode: Opcode, is_final: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            is_final,
            payload: payload.into(),
        }
    }
}

/// Builds a Close payload: big-endian status followed by the reason.
#[must_use]
pub fn close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.as_u16().to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Splits a Close payload into status and reason.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the payload is shorter than two bytes.
pub fn parse_close_payload(payload: &[u8]) -> Result<(CloseCode, String)> {
    if payload.len() < 2 {
        return Err(Error::protocol(format!(
            "close frame payload has {} bytes, expected at least 2",
            payload.len()
        )));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Ok((CloseCode(code), reason))
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a masked client frame with a fresh random mask.
#[must_use]
pub fn encode(opcode: Opcode, is_final: bool, payload: &[u8]) -> Vec<u8> {
    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);
    encode_with_mask(opcode, is_final, payload, mask)
}

/// Encodes a masked client frame with the given mask.
#[must_use]
pub fn encode_with_mask(opcode: Opcode, is_final: bool, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 14);

    let fin = if is_final { FIN_BIT } else { 0 };
    out.push(fin | opcode.as_u8());

    if len <= MAX_INLINE_LENGTH {
        out.push(MASK_BIT | len as u8);
    } else if let Ok(len16) = u16::try_from(len) {
        out.push(MASK_BIT | LENGTH_16);
        out.extend_from_slice(&len16.to_be_bytes());
    } else {
        out.push(MASK_BIT | LENGTH_64);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(&mask);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    out
}

// ============================================================================
// Decoding
// ============================================================================

/// A source of frame bytes.
#[async_trait]
pub trait ByteSource: Send {
    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the source ends first.
    async fn read_exact(&mut self, buf: &mut [u8], ctx: &Context) -> Result<()>;
}

#[async_trait]
impl ByteSource for Bytes {
    async fn read_exact(&mut self, buf: &mut [u8], ctx: &Context) -> Result<()> {
        ctx.check("read frame")?;
        if self.len() < buf.len() {
            return Err(Error::transport(format!(
                "frame truncated: needed {} bytes, {} available",
                buf.len(),
                self.len()
            )));
        }
        self.copy_to_slice(buf);
        Ok(())
    }
}

/// Decodes one frame.
///
/// Server frames should be unmasked; masked ones are unmasked rather than
/// rejected.
///
/// # Errors
///
/// - [`Error::Protocol`] for reserved bits, unknown opcodes, oversized or
///   fragmented control frames, or lengths above [`MAX_PAYLOAD_LENGTH`]
/// - the source's error if it ends early
pub async fn decode<S>(source: &mut S, ctx: &Context) -> Result<Frame>
where
    S: ByteSource + ?Sized,
{
    let mut header = [0u8; 2];
    source.read_exact(&mut header, ctx).await?;

    if header[0] & RESERVED_BITS != 0 {
        return Err(Error::protocol(format!(
            "reserved frame bits set: {:#04x}",
            header[0] & RESERVED_BITS
        )));
    }

    let is_final = header[0] & FIN_BIT != 0;
    let opcode = Opcode::from_u8(header[0] & OPCODE_MASK)
        .ok_or_else(|| Error::protocol(format!("unknown opcode {:#x}", header[0] & OPCODE_MASK)))?;
    let masked = header[1] & MASK_BIT != 0;

    let length = match header[1] & LENGTH_MASK {
        LENGTH_16 => {
            let mut ext = [0u8; 2];
            source.read_exact(&mut ext, ctx).await?;
            u64::from(u16::from_be_bytes(ext))
        }
        LENGTH_64 => {
            let mut ext = [0u8; 8];
            source.read_exact(&mut ext, ctx).await?;
            let length = u64::from_be_bytes(ext);
            if length & (1 << 63) != 0 {
                return Err(Error::protocol("64-bit frame length has its top bit set"));
            }
            length
        }
        inline => u64::from(inline),
    };

    if opcode.is_control() && (length > MAX_INLINE_LENGTH as u64 || !is_final) {
        return Err(Error::protocol(format!(
            "invalid {opcode} frame: length {length}, final {is_final}"
        )));
    }
    if length > MAX_PAYLOAD_LENGTH {
        return Err(Error::protocol(format!(
            "frame payload of {length} bytes exceeds {MAX_PAYLOAD_LENGTH}"
        )));
    }

    let mask = if masked {
        let mut mask = [0u8; 4];
        source.read_exact(&mut mask, ctx).await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; usize::try_from(length).unwrap_or(usize::MAX)];
    source.read_exact(&mut payload, ctx).await?;

    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Frame {
        opcode,
        is_final,
        payload: Bytes::from(payload),
    })
}

// ============================================================================
// Tests
// ============================================================================
