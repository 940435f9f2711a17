//! HTTP/1.1 client transport.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Context;
use crate::error::Result;
use crate::http::exchange::{HttpExchange, UpgradedConnection, prepare_head};
use crate::http::request::Request;
use crate::http::response::{Response, ResponseHead};
use crate::options::TransportOptions;
use crate::transport::{Connection, ConnectionKey, ConnectionPool, Connector, TcpConnector};

// ============================================================================
// Constants
// ============================================================================

/// Connections tried when request heads fail on reused connections. The
/// last attempt resets the key's pooled connections.
const MAX_SEND_ATTEMPTS: u32 = 3;

// ============================================================================
// HttpTransport
// ============================================================================

/// Sends requests over pooled connections.
///
/// # Example
///
/// ```ignore
/// let transport = HttpTransport::new(TransportOptions::default())?;
/// let ctx = Context::with_timeout(Duration::from_secs(30));
///
/// let response = transport.send(Request::get("http://127.0.0.1:8080/")?, &ctx).await?;
/// let body = response.bytes(&ctx).await?;
/// ```
#[derive(Clone)]
pub struct HttpTransport {
    options: TransportOptions,
    pool: Arc<ConnectionPool>,
    connector: Arc<dyn Connector>,
    user_agent: Option<String>,
}

// ============================================================================
// HttpTransport - Constructors
// ============================================================================

impl HttpTransport {
    /// Creates a transport with its own pool and a [`TcpConnector`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `options` are invalid.
    pub fn new(options: TransportOptions) -> Result<Self> {
        options.validate()?;

        let connector = TcpConnector::new().with_io_timeout(options.io_timeout);
        Ok(Self {
            options,
            pool: ConnectionPool::with_defaults(),
            connector: Arc::new(connector),
            user_agent: None,
        })
    }

    /// Shares `pool` with other transports.
    #[inline]
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Replaces the connector, e.g. with one that adds client certificates.
    #[inline]
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Sends `user_agent` unless a request sets its own.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

// ============================================================================
// HttpTransport - Public API
// ============================================================================

impl HttpTransport {
    /// Returns the transport options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Returns the connection pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Sends `request` and returns the response with an unread body.
    ///
    /// If writing the request head fails on a reused connection, another
    /// connection is tried, up to three in total; the last attempt drops
    /// every pooled connection for the destination first.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) for unsupported URLs
    /// - [`Error::Transport`](crate::Error::Transport) for connection failures
    /// - [`Error::Timeout`](crate::Error::Timeout) when the I/O budget runs out
    /// - [`Error::Cancelled`](crate::Error::Cancelled) when `ctx` is cancelled
    /// - [`Error::Protocol`](crate::Error::Protocol) for malformed responses
    pub async fn send(&self, mut request: Request, ctx: &Context) -> Result<Response> {
        let key = ConnectionKey::for_url(request.url(), &self.options)?;
        let (head, expect_continue) =
            prepare_head(&request, key.destination(), self.user_agent.as_deref());
        let pool = self.options.keep_alive.then(|| Arc::clone(&self.pool));

        let mut attempt = 0;
        loop {
            attempt += 1;
            let force_reset = attempt == MAX_SEND_ATTEMPTS;

            let connection = self
                .pool
                .acquire(&key, self.connector.as_ref(), force_reset, self.options.io_timeout, ctx)
                .await?;
            let mut exchange = HttpExchange::new(connection, pool.clone(), &self.options);

            match exchange.write_head(&head, ctx).await {
                Ok(()) => {
                    debug!(method = %request.method(), url = %request.url(), attempt, "Request sent");
                    return exchange.finish_request(&mut request, expect_continue, ctx).await;
                }
                Err(e) if exchange.is_reused() && e.is_transport_error() && attempt < MAX_SEND_ATTEMPTS => {
                    warn!(key = %key, attempt, error = %e, "Reused connection failed; retrying");
                    request.body_mut().rewind()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends an upgrade request on a fresh connection that is never pooled.
    ///
    /// Returns the response head and, on `101`, the connection with any
    /// bytes already read past the head.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub async fn upgrade(
        &self,
        request: &Request,
        ctx: &Context,
    ) -> Result<(ResponseHead, Option<UpgradedConnection>)> {
        let key = ConnectionKey::for_url(request.url(), &self.options)?;
        let (head, _) = prepare_head(request, key.destination(), self.user_agent.as_deref());

        let connection =
            Connection::connect(key, self.connector.as_ref(), self.options.io_timeout, ctx).await?;
        let mut exchange = HttpExchange::new(connection, None, &self.options);

        exchange.write_head(&head, ctx).await?;
        exchange.finish_upgrade(ctx).await
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("options", &self.options)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
