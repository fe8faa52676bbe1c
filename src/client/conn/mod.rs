//! Client connection types.
//!
//! A request sent through one of the default transports passes through three stages:
//!
//! ## Resolving
//!
//! The host in the request URI is turned into candidate socket addresses by a resolver,
//! a [`tower::Service`] accepting a hostname. [`dns::GaiResolver`] uses the operating
//! system's `getaddrinfo`.
//!
//! ## Dialing
//!
//! [`TcpTransport`] dials the candidates. When a host has both IPv4 and IPv6 addresses,
//! the families are raced with a short fallback delay (dual-stack dialing). The whole dial
//! is bounded by the connect timeout, and connected sockets get TCP keep-alive.
//!
//! ## Protocol
//!
//! The connected stream is handed to a pooled hyper client for the HTTP handshake:
//! HTTP/1.1 in [`HttpTransport`], HTTP/2 with prior knowledge in [`H2cTransport`].
//! [`HttpConnector`] is the glue between the pool and the dialer. Idle connections
//! stay in the pool until [`DEFAULT_POOL_IDLE_TIMEOUT`] passes.

pub mod dns;
pub mod http;
pub mod tcp;

pub use self::http::{
    pool_builder, H2cTransport, HttpConnector, HttpTransport, DEFAULT_POOL_IDLE_TIMEOUT,
};
pub use self::tcp::{TcpConnectionError, TcpTransport, TcpTransportConfig};
