//! WebSocket session against an echo server.
//!
//! Demonstrates:
//! - Opening a session with a subprotocol offer
//! - Sending text, fragmented text, and binary frames
//! - Reading echoed frames and closing cleanly
//! - Reading session statistics
//!
//! Usage:
//!   cargo run --example websocket_echo -- ws://127.0.0.1:9001/
//!   cargo run --example websocket_echo -- ws://127.0.0.1:9001/ --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wire_transport::{Context, Result, WebSocket, WebSocketFrame, WebSocketOptions};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let url = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "ws://127.0.0.1:9001/".to_string());

    init_logging(debug);

    if let Err(e) = run(&url).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(url: &str) -> Result<()> {
    println!("=== WebSocket Echo ===\n");

    let options = WebSocketOptions::new()
        .with_protocol("echo")
        .with_service_name("wire-transport-demo/0.1")
        .with_ping_interval(Duration::from_secs(10));
    let socket = WebSocket::new(url, options)?;
    let ctx = Context::with_timeout(Duration::from_secs(30));

    // ========================================================================
    // Open
    // ========================================================================

    println!("[1] Opening {url}...");
    socket.open(&ctx).await?;
    println!("    ✓ Session {} open", socket.session_id());
    if let Some(protocol) = socket.chosen_protocol() {
        println!("    Protocol: {protocol}");
    }
    println!();

    // ========================================================================
    // Exchange Frames
    // ========================================================================

    println!("[2] Sending frames...");
    socket.send_text("hello", true, &ctx).await?;
    socket.send_text("frag", false, &ctx).await?;
    socket.send_text("mented", true, &ctx).await?;
    socket.send_binary(&[0xDE, 0xAD, 0xBE, 0xEF], true, &ctx).await?;

    for _ in 0..3 {
        match socket.receive_frame(&ctx).await? {
            WebSocketFrame::Text { is_final, data } => {
                println!("    Text ({is_final}): {}", String::from_utf8_lossy(&data));
            }
            WebSocketFrame::Binary { is_final, data } => {
                println!("    Binary ({is_final}): {:02x?}", data.to_vec());
            }
            WebSocketFrame::PeerClosed { status, reason } => {
                println!("    Peer closed: {status} {reason}");
                return Ok(());
            }
        }
    }
    println!();

    // ========================================================================
    // Close
    // ========================================================================

    println!("[3] Closing...");
    socket.close(&ctx).await?;
    println!("    ✓ State: {}", socket.state());

    let stats = socket.statistics();
    println!(
        "    Frames sent/received: {}/{}, bytes sent/received: {}/{}",
        stats.frames_sent, stats.frames_received, stats.bytes_sent, stats.bytes_received
    );

    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug { "wire_transport=debug" } else { "wire_transport=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
