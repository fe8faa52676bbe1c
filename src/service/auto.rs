//! Route requests to a transport by HTTP version.

use std::fmt;
use std::task::{Context, Poll};

use http::{Request, Version};
use tower::Service;
use tracing::trace;

/// Which of the two transports a request is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// HTTP/1.x, and anything else that isn't HTTP/2.
    Legacy,

    /// HTTP/2.
    Modern,
}

impl Route {
    /// Pick the route for a protocol version.
    ///
    /// Only [`Version::HTTP_2`] is routed to the modern transport. HTTP/1.1 (the
    /// default version of an [`http::Request`]), HTTP/1.0, HTTP/0.9 and HTTP/3
    /// all take the legacy path.
    pub fn for_version(version: Version) -> Self {
        if version == Version::HTTP_2 {
            Route::Modern
        } else {
            Route::Legacy
        }
    }

    /// Pick the route for a request.
    pub fn for_request<B>(request: &Request<B>) -> Self {
        Self::for_version(request.version())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Legacy => f.write_str("legacy"),
            Route::Modern => f.write_str("modern"),
        }
    }
}

/// A transport which hands each request to one of two inner transports, chosen by
/// the request's HTTP version.
///
/// HTTP/2 requests go to `modern`; every other request goes to `legacy`. The request
/// is passed through untouched (URI, headers, extensions and body included), and
/// whatever the chosen transport returns, response or error, is returned as-is. The
/// router adds no retries, timeouts or error wrapping of its own; for that reason
/// both transports must agree on `Response` and `Error` types.
///
/// Both inner services must be ready before the router is: the next request could
/// go to either of them.
///
/// # Example
/// ```
/// # use autotransport::AutoTransport;
/// # use tower::{service_fn, ServiceExt as _};
/// # async fn run() -> Result<(), std::convert::Infallible> {
/// let legacy = service_fn(|_: http::Request<()>| async { Ok::<_, std::convert::Infallible>("h1") });
/// let modern = service_fn(|_: http::Request<()>| async { Ok::<_, std::convert::Infallible>("h2") });
/// let transport = AutoTransport::new(legacy, modern);
///
/// let request = http::Request::get("http://example.com/")
///     .version(http::Version::HTTP_2)
///     .body(())
///     .unwrap();
/// assert_eq!(transport.oneshot(request).await?, "h2");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AutoTransport<L, M> {
    legacy: L,
    modern: M,
}

impl<L, M> AutoTransport<L, M> {
    /// Join a legacy (HTTP/1.x) transport and a modern (HTTP/2) transport.
    pub fn new(legacy: L, modern: M) -> Self {
        Self { legacy, modern }
    }

    /// The transport used for everything except HTTP/2.
    pub fn legacy(&self) -> &L {
        &self.legacy
    }

    /// The transport used for HTTP/2.
    pub fn modern(&self) -> &M {
        &self.modern
    }

    /// Unwrap into `(legacy, modern)`.
    pub fn into_parts(self) -> (L, M) {
        (self.legacy, self.modern)
    }
}

impl<L, M, B> Service<Request<B>> for AutoTransport<L, M>
where
    L: Service<Request<B>>,
    M: Service<Request<B>, Response = L::Response, Error = L::Error>,
{
    type Response = L::Response;
    type Error = L::Error;
    type Future = self::future::AutoTransportFuture<L::Future, M::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let legacy = self.legacy.poll_ready(cx)?;
        let modern = self.modern.poll_ready(cx)?;

        if legacy.is_ready() && modern.is_ready() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let route = Route::for_request(&request);
        trace!(version = ?request.version(), %route, "routing request");

        match route {
            Route::Modern => self::future::AutoTransportFuture::modern(self.modern.call(request)),
            Route::Legacy => self::future::AutoTransportFuture::legacy(self.legacy.call(request)),
        }
    }
}

/// Wraps a legacy transport in an [`AutoTransport`] alongside a fixed modern transport.
#[derive(Debug, Clone)]
pub struct AutoTransportLayer<M> {
    modern: M,
}

impl<M> AutoTransportLayer<M> {
    /// Create a layer which routes HTTP/2 requests to `modern`.
    pub fn new(modern: M) -> Self {
        Self { modern }
    }
}

impl<L, M: Clone> tower::Layer<L> for AutoTransportLayer<M> {
    type Service = AutoTransport<L, M>;

    fn layer(&self, legacy: L) -> Self::Service {
        AutoTransport::new(legacy, self.modern.clone())
    }
}

pub use self::future::AutoTransportFuture;

mod future {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use pin_project::pin_project;

    #[derive(Debug)]
    #[pin_project(project = StateProj)]
    enum State<L, M> {
        Legacy(#[pin] L),
        Modern(#[pin] M),
    }

    /// Future returned by [`AutoTransport`](super::AutoTransport), resolving to
    /// whatever the chosen transport produced.
    #[derive(Debug)]
    #[pin_project]
    pub struct AutoTransportFuture<L, M> {
        #[pin]
        state: State<L, M>,
    }

    impl<L, M> AutoTransportFuture<L, M> {
        pub(super) fn legacy(inner: L) -> Self {
            Self {
                state: State::Legacy(inner),
            }
        }

        pub(super) fn modern(inner: M) -> Self {
            Self {
                state: State::Modern(inner),
            }
        }
    }

    impl<L, M, T, E> Future for AutoTransportFuture<L, M>
    where
        L: Future<Output = Result<T, E>>,
        M: Future<Output = Result<T, E>>,
    {
        type Output = Result<T, E>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            match self.project().state.project() {
                StateProj::Legacy(future) => future.poll(cx),
                StateProj::Modern(future) => future.poll(cx),
            }
        }
    }
}
