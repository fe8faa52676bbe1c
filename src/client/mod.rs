//! Default transports for the router, and the factories that build them.
//!
//! Two transports are provided:
//!
//! 1. The *legacy* transport, [`HttpTransport`], sends HTTP/1.1 over a TCP connection
//!    dialed with a bounded connect timeout, dual-stack racing and a 30 second TCP
//!    keep-alive.
//! 2. The *modern* transport, [`H2cTransport`], sends HTTP/2 over cleartext TCP
//!    with prior knowledge.
//!
//! Both keep their connections in a pool: HTTP/1.1 connections are reused once a
//! response has been read, and h2c keeps one multiplexed connection per authority.
//! Idle connections are closed after [`DEFAULT_POOL_IDLE_TIMEOUT`].
//!
//! [`auto_transport`] joins them in an [`AutoTransport`] with the default
//! configuration. There is no process-wide instance: construct the router once at
//! startup and hand it (or clones of it) to whatever sends requests. Clones share
//! the connection pools.
//!
//! Use [`Builder`] for anything beyond the connect timeout.

use std::time::Duration;

use http_body::Body;

use crate::service::AutoTransport;

mod builder;
pub mod conn;
mod error;

pub use self::builder::Builder;
pub use self::conn::tcp::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE};
pub use self::conn::{H2cTransport, HttpTransport, TcpTransportConfig, DEFAULT_POOL_IDLE_TIMEOUT};
pub use self::error::Error;

/// The default router: HTTP/1.1 for legacy requests, h2c for HTTP/2 requests.
pub type DefaultTransport<B> = AutoTransport<HttpTransport<B>, H2cTransport<B>>;

/// Build the legacy HTTP/1.1 transport.
///
/// Connections are dialed with `connect_timeout` as the upper bound on establishing
/// a connection, a 30 second keep-alive probe interval and dual-stack dialing.
/// Everything else uses hyper's defaults.
pub fn legacy_transport<B>(connect_timeout: Duration) -> HttpTransport<B>
where
    B: Body + Send,
    B::Data: Send,
{
    Builder::new()
        .connect_timeout(connect_timeout)
        .build_legacy()
}

/// Build the modern h2c transport with the default configuration.
pub fn modern_transport<B>() -> H2cTransport<B>
where
    B: Body + Send,
    B::Data: Send,
{
    Builder::new().build_modern()
}

/// Build the default router, using [`DEFAULT_CONNECT_TIMEOUT`] for the legacy transport.
pub fn auto_transport<B>() -> DefaultTransport<B>
where
    B: Body + Send,
    B::Data: Send,
{
    AutoTransport::new(
        legacy_transport(DEFAULT_CONNECT_TIMEOUT),
        modern_transport(),
    )
}
