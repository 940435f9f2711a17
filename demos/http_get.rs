//! Plain HTTP GET over a pooled connection.
//!
//! Demonstrates:
//! - Creating an HttpTransport with default options
//! - Sending two requests that share one pooled connection
//! - Streaming a response body in pieces
//!
//! Usage:
//!   cargo run --example http_get -- http://127.0.0.1:8080/
//!   cargo run --example http_get -- http://127.0.0.1:8080/ --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;
use wire_transport::{Context, HttpTransport, Request, Result, TransportOptions};

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
        .unwrap_or_else(|| "http://127.0.0.1:8080/".to_string());

    init_logging(debug);

    if let Err(e) = run(&url).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(url: &str) -> Result<()> {
    println!("=== HTTP GET ===\n");

    let transport = HttpTransport::new(TransportOptions::default())?.with_user_agent("wire-transport-demo/0.1");
    let ctx = Context::with_timeout(Duration::from_secs(30));

    // ========================================================================
    // First Request
    // ========================================================================

    println!("[1] GET {url}");
    let response = transport.send(Request::get(url)?, &ctx).await?;
    println!("    Status: {} {}", response.status(), response.reason());
    for (name, value) in response.headers().iter() {
        println!("    {name}: {value}");
    }

    let mut body = Box::pin(response.into_body().into_stream(ctx.clone()));
    let mut total = 0;
    while let Some(chunk) = body.next().await {
        total += chunk?.len();
    }
    println!("    ✓ {total} body bytes\n");

    // ========================================================================
    // Second Request (pooled)
    // ========================================================================

    println!("[2] GET {url} again");
    let response = transport.send(Request::get(url)?, &ctx).await?;
    let status = response.status();
    let bytes = response.bytes(&ctx).await?;
    println!("    Status: {status}, {} body bytes", bytes.len());
    println!("    Pooled connections: {}", transport.pool().connection_count());

    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug { "wire_transport=debug" } else { "wire_transport=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
