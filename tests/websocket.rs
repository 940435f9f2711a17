//! End-to-end WebSocket tests against a tokio-tungstenite server.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WireCloseCode;
use wire_transport::{CloseCode, Context, SocketState, WebSocket, WebSocketFrame, WebSocketOptions};

// ============================================================================
// Server Helpers
// ============================================================================

/// Binds a listener and returns it with its `ws://` URL.
async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/socket", listener.local_addr().unwrap());
    (listener, url)
}

/// Accepts one connection, answering `chat` when offered.
async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let offered = request
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if offered.split(',').any(|p| p.trim() == "chat") {
            response
                .headers_mut()
                .insert("sec-websocket-protocol", HeaderValue::from_static("chat"));
        }
        Ok(response)
    };
    tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap()
}

/// Echoes data messages until the client closes.
async fn echo(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err() {
            break;
        }
    }
}

fn options() -> WebSocketOptions {
    WebSocketOptions::new().with_ping_interval(Duration::ZERO)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn echo_text_and_binary() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move { echo(accept(&listener).await).await });

    let socket = WebSocket::new(&url, options().with_protocol("chat"))?;
    let ctx = Context::with_timeout(Duration::from_secs(10));

    socket.open(&ctx).await?;
    assert_eq!(socket.state(), SocketState::Open);
    assert_eq!(socket.chosen_protocol().as_deref(), Some("chat"));

    socket.send_text("hello", true, &ctx).await?;
    assert_eq!(socket.receive_frame(&ctx).await?.as_text(), Some("hello"));

    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
    socket.send_binary(&payload, true, &ctx).await?;
    match socket.receive_frame(&ctx).await? {
        WebSocketFrame::Binary { is_final, data } => {
            assert!(is_final);
            assert_eq!(&data[..], &payload[..]);
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    socket.close(&ctx).await?;
    assert_eq!(socket.state(), SocketState::Closed);
    server.await?;
    Ok(())
}

#[tokio::test]
async fn fragmented_send_is_reassembled_by_peer() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move { echo(accept(&listener).await).await });

    let socket = WebSocket::new(&url, options())?;
    let ctx = Context::with_timeout(Duration::from_secs(10));
    socket.open(&ctx).await?;

    socket.send_text("frag", false, &ctx).await?;
    socket.send_text("mented", true, &ctx).await?;
    assert_eq!(socket.receive_frame(&ctx).await?.as_text(), Some("fragmented"));

    socket.close(&ctx).await?;
    server.await?;
    Ok(())
}

#[tokio::test]
async fn server_ping_is_answered() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let (pong_tx, pong_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::Ping(Bytes::from_static(b"are-you-there"))).await.unwrap();
        ws.send(Message::Text("after-ping".into())).await.unwrap();

        let mut pong_tx = Some(pong_tx);
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Pong(payload) = message
                && let Some(tx) = pong_tx.take()
            {
                let _ = tx.send(payload);
            }
        }
    });

    let socket = WebSocket::new(&url, options())?;
    let ctx = Context::with_timeout(Duration::from_secs(10));
    socket.open(&ctx).await?;

    assert_eq!(socket.receive_frame(&ctx).await?.as_text(), Some("after-ping"));
    assert_eq!(&pong_rx.await?[..], b"are-you-there");
    assert_eq!(socket.statistics().pings_received, 1);

    socket.close(&ctx).await?;
    server.await?;
    Ok(())
}

#[tokio::test]
async fn server_close_reports_status_and_reason() -> anyhow::Result<()> {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.close(Some(CloseFrame {
            code: WireCloseCode::Normal,
            reason: "shutting down".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let socket = WebSocket::new(&url, options())?;
    let ctx = Context::with_timeout(Duration::from_secs(10));
    socket.open(&ctx).await?;

    let frame = socket.receive_frame(&ctx).await?;
    assert_eq!(
        frame,
        WebSocketFrame::PeerClosed {
            status: CloseCode::NORMAL,
            reason: "shutting down".to_string(),
        }
    );
    assert_eq!(socket.state(), SocketState::Closed);

    server.await?;
    Ok(())
}

#[tokio::test]
async fn keep_alive_pings_reach_server() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let (ping_tx, ping_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let mut ping_tx = Some(ping_tx);
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Ping(payload) = message
                && let Some(tx) = ping_tx.take()
            {
                let _ = tx.send(payload.len());
            }
        }
    });

    let socket = WebSocket::new(&url, WebSocketOptions::new().with_ping_interval(Duration::from_millis(50)))?;
    let ctx = Context::with_timeout(Duration::from_secs(10));
    socket.open(&ctx).await?;

    assert_eq!(ping_rx.await?, 4);
    assert!(socket.statistics().pings_sent >= 1);

    socket.close(&ctx).await?;
    server.await?;
    Ok(())
}

#[tokio::test]
async fn reopen_after_close() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            echo(accept(&listener).await).await;
        }
    });

    let socket = WebSocket::new(&url, options())?;
    let ctx = Context::with_timeout(Duration::from_secs(10));

    for round in ["first", "second"] {
        socket.open(&ctx).await?;
        socket.send_text(round, true, &ctx).await?;
        assert_eq!(socket.receive_frame(&ctx).await?.as_text(), Some(round));
        socket.close_with_status(CloseCode::NORMAL, round, &ctx).await?;
        assert_eq!(socket.state(), SocketState::Closed);
    }

    server.await?;
    Ok(())
}

#[tokio::test]
async fn plain_http_server_rejects_upgrade() -> anyhow::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
    });

    let socket = WebSocket::new(&url, options())?;
    let err = socket.open(&Context::new()).await.unwrap_err();

    assert!(err.is_transport_error(), "{err}");
    assert_eq!(socket.state(), SocketState::Closed);
    server.await?;
    Ok(())
}
