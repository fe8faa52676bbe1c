//! Autotransport
//!
//! Pick the right HTTP transport for each outgoing request.
//!
//! The core of this crate is [`AutoTransport`], a [`tower::Service`] which holds two
//! transports: a *legacy* transport for HTTP/1.x requests and a *modern* transport for
//! HTTP/2 requests. Each request is forwarded to one of them based on [`http::Request::version`],
//! and the result is handed back untouched.
//!
//! Default transports are provided in the [`client`] module: an HTTP/1.1 transport
//! which dials TCP with a bounded connect timeout and keep-alive, and an HTTP/2 cleartext
//! (h2c) transport which multiplexes requests over one connection per authority.
//!
//! ```no_run
//! # use http_body_util::Empty;
//! # use bytes::Bytes;
//! # use tower::ServiceExt as _;
//! # async fn run() -> Result<(), autotransport::client::Error> {
//! let transport = autotransport::client::auto_transport::<Empty<Bytes>>();
//!
//! let request = http::Request::get("http://example.com/")
//!     .version(http::Version::HTTP_2)
//!     .body(Empty::new())
//!     .unwrap();
//!
//! // Sent with h2c.
//! let response = transport.oneshot(request).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::future::Future;
use std::pin::Pin;

pub mod client;
pub(crate) mod happy_eyeballs;
pub mod service;

pub use service::{AutoTransport, Route};

/// A type-erased error, as used throughout the hyper ecosystem.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
