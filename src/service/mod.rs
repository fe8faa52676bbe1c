//! The router, and utilities for plugging transports into it.
//!
//! Any [`tower::Service`] accepting an [`http::Request`] can serve as a transport: a
//! concrete type, a closure wrapped with [`service_fn`], or a type-erased
//! [`SharedService`] when transports of different types must sit behind one type.
//!
//! Type erasure is useful when the legacy and modern transports are chosen at
//! runtime, or when one of them is a test double:
//!
//! ```
//! # use std::convert::Infallible;
//! # use autotransport::service::{service_fn, SharedService};
//! # use autotransport::AutoTransport;
//! type Transport = SharedService<http::Request<()>, &'static str, Infallible>;
//!
//! let legacy: Transport =
//!     SharedService::new(service_fn(|_: http::Request<()>| async { Ok::<_, Infallible>("h1") }));
//! let modern: Transport =
//!     SharedService::new(service_fn(|_: http::Request<()>| async { Ok::<_, Infallible>("h2") }));
//!
//! let transport = AutoTransport::new(legacy, modern);
//! ```

mod auto;

pub use self::auto::{AutoTransport, AutoTransportFuture, AutoTransportLayer, Route};
pub use tower::{service_fn, Service, ServiceExt};

/// A type-erased transport that can be cloned, sent, and shared across threads.
pub type SharedService<T, U, E> = tower::util::BoxCloneSyncService<T, U, E>;
