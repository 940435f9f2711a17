//! Per-session traffic counters.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::frame::Opcode;

// ============================================================================
// WebSocketStatistics
// ============================================================================

/// Point-in-time copy of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WebSocketStatistics {
    /// Frames written, control frames included.
    pub frames_sent: u64,
    /// Frames decoded, control frames included.
    pub frames_received: u64,
    /// Payload bytes written.
    pub bytes_sent: u64,
    /// Payload bytes decoded.
    pub bytes_received: u64,
    /// Text frames received, continuations of text messages included.
    pub text_frames_received: u64,
    /// Binary frames received, continuations of binary messages included.
    pub binary_frames_received: u64,
    /// Pings sent by the keep-alive task.
    pub pings_sent: u64,
    /// Pings received and answered.
    pub pings_received: u64,
    /// Pongs received and discarded.
    pub pongs_received: u64,
    /// Frames discarded while waiting for the peer's close.
    pub frames_dropped_by_close: u64,
    /// Reads issued against the socket.
    pub transport_reads: u64,
}

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    text_frames_received: AtomicU64,
    binary_frames_received: AtomicU64,
    pings_sent: AtomicU64,
    pings_received: AtomicU64,
    pongs_received: AtomicU64,
    frames_dropped_by_close: AtomicU64,
    transport_reads: AtomicU64,
}

impl Counters {
    pub(crate) fn record_sent(&self, opcode: Opcode, payload_len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(payload_len as u64, Ordering::Relaxed);
        if opcode == Opcode::Ping {
            self.pings_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `opcode` is the effective type, with continuations already resolved.
    pub(crate) fn record_received(&self, opcode: Opcode, payload_len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(payload_len as u64, Ordering::Relaxed);
        let counter = match opcode {
            Opcode::Text => &self.text_frames_received,
            Opcode::Binary => &self.binary_frames_received,
            Opcode::Ping => &self.pings_received,
            Opcode::Pong => &self.pongs_received,
            Opcode::Close | Opcode::Continuation => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped_by_close.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_read(&self) {
        self.transport_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WebSocketStatistics {
        WebSocketStatistics {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            text_frames_received: self.text_frames_received.load(Ordering::Relaxed),
            binary_frames_received: self.binary_frames_received.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pings_received: self.pings_received.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            frames_dropped_by_close: self.frames_dropped_by_close.load(Ordering::Relaxed),
            transport_reads: self.transport_reads.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();
        counters.record_sent(Opcode::Text, 5);
        counters.record_sent(Opcode::Ping, 4);
        counters.record_received(Opcode::Binary, 10);
        counters.record_received(Opcode::Pong, 4);
        counters.record_received(Opcode::Close, 2);
        counters.record_dropped();
        counters.record_transport_read();

        let stats = counters.snapshot();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 9);
        assert_eq!(stats.pings_sent, 1);
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.bytes_received, 16);
        assert_eq!(stats.binary_frames_received, 1);
        assert_eq!(stats.pongs_received, 1);
        assert_eq!(stats.text_frames_received, 0);
        assert_eq!(stats.frames_dropped_by_close, 1);
        assert_eq!(stats.transport_reads, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = WebSocketStatistics {
            frames_sent: 3,
            ..WebSocketStatistics::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["frames_sent"], 3);
    }
}
