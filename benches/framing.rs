//! Wire framing benchmark suite.
//!
//! Benchmarks the hot paths that run per frame or per response:
//! - WebSocket frame encoding (masking) at several payload sizes
//! - WebSocket frame decoding from memory
//! - Response-head parsing, whole and byte-at-a-time
//! - Chunked body decoding
//!
//! Run with: cargo bench --bench framing
//! Results saved to: target/criterion/

use std::hint::black_box;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use wire_transport::Context;
use wire_transport::http::{ChunkDecoder, ResponseParser};
use wire_transport::websocket::frame::{self, Opcode};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[16, 125, 4 * 1024, 64 * 1024, 1024 * 1024];

const RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: application/json; charset=utf-8\r\n\
    Content-Length: 1024\r\n\
    Date: Thu, 01 Jan 2026 00:00:00 GMT\r\n\
    Server: bench\r\n\
    Cache-Control: no-cache\r\n\
    X-Request-Id: 2f1c8c4e-6a57-4a0f-9d43-0d3f6c7d2b11\r\n\
    \r\n";

// ============================================================================
// Benchmark: Frame Encoding
// ============================================================================

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for &size in PAYLOAD_SIZES {
        let payload = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("masked", size), &payload, |b, payload| {
            b.iter(|| frame::encode(Opcode::Binary, true, black_box(payload)));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Frame Decoding
// ============================================================================

fn bench_frame_decode(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctx = Context::new();

    let mut group = c.benchmark_group("frame_decode");

    for &size in PAYLOAD_SIZES {
        let wire = Bytes::from(frame::encode(Opcode::Binary, true, &vec![0xA5u8; size]));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("masked", size), &wire, |b, wire| {
            b.to_async(&rt).iter(|| async {
                let mut source = wire.clone();
                frame::decode(&mut source, &ctx).await.unwrap()
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Response Parsing
// ============================================================================

fn bench_response_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_parse");
    group.throughput(Throughput::Bytes(RESPONSE_HEAD.len() as u64));

    group.bench_function("whole", |b| {
        b.iter(|| {
            let mut parser = ResponseParser::new();
            parser.parse(black_box(RESPONSE_HEAD)).unwrap();
            parser.finish().unwrap()
        });
    });

    group.bench_function("byte_at_a_time", |b| {
        b.iter(|| {
            let mut parser = ResponseParser::new();
            for byte in RESPONSE_HEAD.chunks(1) {
                parser.parse(black_box(byte)).unwrap();
            }
            parser.finish().unwrap()
        });
    });

    group.finish();
}

// ============================================================================
// Benchmark: Chunked Decoding
// ============================================================================

fn bench_chunked_decode(c: &mut Criterion) {
    let mut body = Vec::new();
    for _ in 0..64 {
        body.extend_from_slice(b"400\r\n");
        body.extend_from_slice(&[b'x'; 0x400]);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"0\r\n\r\n");

    let mut group = c.benchmark_group("chunked_decode");
    group.throughput(Throughput::Bytes(body.len() as u64));

    group.bench_function("64x1KiB", |b| {
        let mut out = vec![0u8; 8 * 1024];
        b.iter(|| {
            let mut decoder = ChunkDecoder::new();
            let mut offset = 0;
            while !decoder.is_completed() {
                let (consumed, _) = decoder.decode(black_box(&body[offset..]), &mut out).unwrap();
                offset += consumed;
            }
            offset
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_response_parse,
    bench_chunked_decode
);
criterion_main!(benches);
