//! The default legacy and modern transports.
//!
//! Both transports hand requests to a pooled [`Client`] from `hyper-util`, which
//! dials through [`HttpConnector`] (and so through [`TcpTransport`]).
//!
//! [`HttpTransport`] speaks HTTP/1.1 and returns keep-alive connections to the pool
//! once a response has been read. [`H2cTransport`] speaks HTTP/2 over cleartext TCP
//! with prior knowledge (no upgrade dance, no TLS), multiplexing requests over one
//! connection per authority. Concurrent first requests to an authority wait on a
//! single dial instead of racing their own.
//!
//! Idle connections in either pool are closed after [`DEFAULT_POOL_IDLE_TIMEOUT`].

use std::fmt;
use std::io;
use std::task::{Context, Poll};
use std::time::Duration;

use http::{Request, Response, Uri, Version};
use http_body::Body;
use hyper::body::Incoming;
use hyper_util::client::legacy::{Builder as PoolBuilder, Client};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tower::Service as _;
use tracing::{trace, Instrument};

use super::dns::{GaiResolver, SocketAddrs};
use super::tcp::{TcpConnectionError, TcpTransport};
use crate::client::Error;
use crate::{BoxError, BoxFuture};

/// How long an unused connection stays in a pool before it is closed.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// The pool configuration used by the default transports.
///
/// Idle connections expire after [`DEFAULT_POOL_IDLE_TIMEOUT`], reaped on a tokio timer.
pub fn pool_builder() -> PoolBuilder {
    let mut builder = Client::builder(TokioExecutor::new());
    builder
        .timer(TokioTimer::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT);
    builder
}

/// Connector for the pooled clients: dials with a [`TcpTransport`] and wraps the
/// stream for hyper.
pub struct HttpConnector<R = GaiResolver> {
    tcp: TcpTransport<R>,
}

impl<R> HttpConnector<R> {
    /// Dial with `tcp`.
    pub fn new(tcp: TcpTransport<R>) -> Self {
        Self { tcp }
    }

    /// The TCP dialer.
    pub fn tcp(&self) -> &TcpTransport<R> {
        &self.tcp
    }
}

impl<R: Clone> Clone for HttpConnector<R> {
    fn clone(&self) -> Self {
        Self {
            tcp: self.tcp.clone(),
        }
    }
}

impl<R> fmt::Debug for HttpConnector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnector")
            .field("config", self.tcp.config())
            .finish()
    }
}

impl<R> tower::Service<Uri> for HttpConnector<R>
where
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    type Response = TokioIo<TcpStream>;
    type Error = TcpConnectionError;
    type Future = BoxFuture<'static, Result<TokioIo<TcpStream>, TcpConnectionError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tcp.poll_ready(cx)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connecting = self.tcp.call(uri);
        Box::pin(async move { connecting.await.map(TokioIo::new) })
    }
}

/// Reject URIs the pooled client cannot dial.
///
/// Both HTTP/1.1 (before origin-form rewriting) and HTTP/2 need the scheme and
/// authority to pick a connection.
fn check_absolute(uri: &Uri) -> Result<(), Error> {
    if uri.scheme().is_none() || uri.host().is_none() {
        return Err(Error::InvalidUri(format!("absolute URI required, got {uri}")));
    }
    Ok(())
}

/// Prepare a request for an HTTP/1.1 connection.
///
/// Versions other than HTTP/1.0 and HTTP/1.1 are sent as HTTP/1.1. The pooled client
/// adds `Host` and reduces the URI to origin-form when it writes the request.
fn http1_request<B>(mut request: Request<B>) -> Result<Request<B>, Error> {
    check_absolute(request.uri())?;

    if !matches!(request.version(), Version::HTTP_10 | Version::HTTP_11) {
        trace!(version = ?request.version(), "sending as HTTP/1.1");
        *request.version_mut() = Version::HTTP_11;
    }

    Ok(request)
}

/// Prepare a request for an h2c connection.
fn h2c_request<B>(mut request: Request<B>) -> Result<Request<B>, Error> {
    check_absolute(request.uri())?;
    *request.version_mut() = Version::HTTP_2;
    Ok(request)
}

/// HTTP/1.1 transport.
///
/// Connections are dialed on demand and kept for reuse once the response body has
/// been read to the end. Before sending, versions other than HTTP/1.0 and HTTP/1.1
/// are sent as HTTP/1.1; `Host` is derived from the URI when absent, and the URI is
/// written in origin-form (`/path?query`).
pub struct HttpTransport<B, R = GaiResolver> {
    connector: HttpConnector<R>,
    client: Client<HttpConnector<R>, B>,
}

impl<B, R> HttpTransport<B, R>
where
    B: Body + Send,
    B::Data: Send,
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    /// Create a transport which dials with `tcp`, using [`pool_builder`].
    pub fn new(tcp: TcpTransport<R>) -> Self {
        Self::with_builder(tcp, &pool_builder())
    }

    /// Create a transport which dials with `tcp` and pools with `builder`.
    pub fn with_builder(tcp: TcpTransport<R>, builder: &PoolBuilder) -> Self {
        let connector = HttpConnector::new(tcp);
        let client = builder.build(connector.clone());
        Self { connector, client }
    }
}

impl<B, R> HttpTransport<B, R> {
    /// The TCP dialer.
    pub fn tcp(&self) -> &TcpTransport<R> {
        self.connector.tcp()
    }
}

impl<B, R: Clone> Clone for HttpTransport<B, R> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            client: self.client.clone(),
        }
    }
}

impl<B, R> fmt::Debug for HttpTransport<B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", self.tcp().config())
            .finish()
    }
}

impl<B, R> tower::Service<Request<B>> for HttpTransport<B, R>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    type Response = Response<Incoming>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Response<Incoming>, Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let span = tracing::trace_span!("http1", uri = %request.uri());

        let request = match http1_request(request) {
            Ok(request) => request,
            Err(error) => return Box::pin(std::future::ready(Err(error))),
        };

        let response = self.client.request(request);
        Box::pin(async move { response.await.map_err(Error::from) }.instrument(span))
    }
}

/// HTTP/2 cleartext (h2c) transport.
///
/// Connections are opened with prior knowledge: the client sends the HTTP/2
/// preface immediately. One connection is kept per authority and shared by every
/// request to it; a closed or expired connection is replaced on the next request.
///
/// Request URIs must be absolute, since HTTP/2 carries scheme and authority as
/// pseudo-headers.
pub struct H2cTransport<B, R = GaiResolver> {
    connector: HttpConnector<R>,
    client: Client<HttpConnector<R>, B>,
}

impl<B, R> H2cTransport<B, R>
where
    B: Body + Send,
    B::Data: Send,
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    /// Create a transport which dials with `tcp`, using [`pool_builder`].
    pub fn new(tcp: TcpTransport<R>) -> Self {
        Self::with_builder(tcp, &pool_builder())
    }

    /// Create a transport which dials with `tcp` and pools with `builder`.
    ///
    /// The builder is switched to HTTP/2 only.
    pub fn with_builder(tcp: TcpTransport<R>, builder: &PoolBuilder) -> Self {
        let connector = HttpConnector::new(tcp);
        let client = builder.clone().http2_only(true).build(connector.clone());
        Self { connector, client }
    }
}

impl<B, R> H2cTransport<B, R> {
    /// The TCP dialer.
    pub fn tcp(&self) -> &TcpTransport<R> {
        self.connector.tcp()
    }
}

impl<B, R: Clone> Clone for H2cTransport<B, R> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            client: self.client.clone(),
        }
    }
}

impl<B, R> fmt::Debug for H2cTransport<B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H2cTransport")
            .field("config", self.tcp().config())
            .finish()
    }
}

impl<B, R> tower::Service<Request<B>> for H2cTransport<B, R>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    type Response = Response<Incoming>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Response<Incoming>, Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let span = tracing::trace_span!("h2c", uri = %request.uri());

        let request = match h2c_request(request) {
            Ok(request) => request,
            Err(error) => return Box::pin(std::future::ready(Err(error))),
        };

        let response = self.client.request(request);
        Box::pin(async move { response.await.map_err(Error::from) }.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::Empty;
    use static_assertions::assert_impl_all;
    use tower::{Service, ServiceExt as _};

    use super::*;

    assert_impl_all!(HttpConnector: Service<Uri>, Clone, Send, Sync, fmt::Debug);
    assert_impl_all!(HttpTransport<Empty<Bytes>>: Service<Request<Empty<Bytes>>>, Clone, Send, Sync, fmt::Debug);
    assert_impl_all!(H2cTransport<Empty<Bytes>>: Service<Request<Empty<Bytes>>>, Clone, Send, Sync, fmt::Debug);

    fn request(uri: &str) -> Request<()> {
        Request::get(uri).body(()).unwrap()
    }

    #[test]
    fn http1_request_keeps_absolute_uri() {
        let request = http1_request(request("http://example.com:8080/a/b?c=d")).unwrap();
        assert_eq!(request.uri(), "http://example.com:8080/a/b?c=d");
        assert_eq!(request.version(), Version::HTTP_11);
    }

    #[test]
    fn http1_request_coerces_version() {
        for version in [Version::HTTP_09, Version::HTTP_2, Version::HTTP_3] {
            let mut req = request("http://example.com/");
            *req.version_mut() = version;
            assert_eq!(http1_request(req).unwrap().version(), Version::HTTP_11);
        }

        let mut req = request("http://example.com/");
        *req.version_mut() = Version::HTTP_10;
        assert_eq!(http1_request(req).unwrap().version(), Version::HTTP_10);
    }

    #[test]
    fn relative_uris_are_invalid() {
        let error = http1_request(request("/relative")).unwrap_err();
        assert!(matches!(error, Error::InvalidUri(_)));

        let error = h2c_request(request("/relative")).unwrap_err();
        assert!(matches!(error, Error::InvalidUri(_)));
    }

    #[test]
    fn h2c_request_is_http2() {
        let request = h2c_request(request("http://example.com/")).unwrap();
        assert_eq!(request.version(), Version::HTTP_2);
    }

    #[tokio::test]
    async fn relative_uri_is_not_a_connect_error() {
        let request = || {
            Request::get("/relative")
                .version(Version::HTTP_2)
                .body(Empty::<Bytes>::new())
                .unwrap()
        };

        let h2c: H2cTransport<Empty<Bytes>> = H2cTransport::new(TcpTransport::default());
        let error = h2c.oneshot(request()).await.unwrap_err();
        assert!(matches!(error, Error::InvalidUri(_)));
        assert!(!error.is_connect());

        let http1: HttpTransport<Empty<Bytes>> = HttpTransport::new(TcpTransport::default());
        let error = http1.oneshot(request()).await.unwrap_err();
        assert!(matches!(error, Error::InvalidUri(_)));
        assert!(!error.is_connect());
    }

    #[tokio::test]
    async fn connector_wraps_stream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = HttpConnector::new(TcpTransport::default());
        let uri: Uri = format!("http://{addr}/").parse().unwrap();
        let (stream, accepted) = tokio::join!(connector.oneshot(uri), listener.accept());

        let (_, peer) = accepted.unwrap();
        assert_eq!(stream.unwrap().inner().local_addr().unwrap(), peer);
    }
}
