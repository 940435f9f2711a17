//! In-memory connector for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::Result;
use crate::transport::connector::Connector;
use crate::transport::io::BoxedSocket;
use crate::transport::key::{ConnectionKey, Destination};
use crate::options::TransportOptions;

/// Capacity of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Hands out duplex pipes and forwards the server halves to the test.
pub(crate) struct MockConnector {
    connects: AtomicUsize,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connects: AtomicUsize::new(0),
            peers: tx,
        });
        (connector, rx)
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _key: &ConnectionKey, ctx: &Context) -> Result<BoxedSocket> {
        ctx.check("connect")?;
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (client, server) = duplex(PIPE_CAPACITY);
        let _ = self.peers.send(server);
        Ok(Box::new(client))
    }
}

/// Key for `http://host:80` with default options.
pub(crate) fn key(host: &str) -> ConnectionKey {
    ConnectionKey::new(Destination::new("http", host, 80), &TransportOptions::default())
}
