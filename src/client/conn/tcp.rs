//! TCP dialing for client transports.
//!
//! [`TcpTransport`] is a [`tower::Service`] which resolves the host of a [`Uri`] and
//! connects to it, racing IPv4 and IPv6 candidates when the host has both. The whole
//! dial is bounded by [`TcpTransportConfig::connect_timeout`], and connected sockets
//! have TCP keep-alive probes enabled.
//!
//! Both transports in [`crate::client`] dial through this type.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http::Uri;
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tower::ServiceExt as _;
use tracing::{trace, warn, Instrument};

use super::dns::{GaiResolver, IpVersion, SocketAddrs};
use crate::happy_eyeballs::{EyeballSet, HappyEyeballsError};
use crate::BoxFuture;

/// Connect timeout used by the default transports.
///
/// Kept short so an unreachable backend fails fast instead of waiting on the
/// operating system's own (much longer) TCP timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Idle time before the first TCP keep-alive probe on a connected socket.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Delay before a fallback address family is tried.
pub const DEFAULT_HAPPY_EYEBALLS_DELAY: Duration = Duration::from_millis(300);

/// Configuration for TCP connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTransportConfig {
    /// Upper bound on establishing a connection, across every candidate address.
    pub connect_timeout: Option<Duration>,

    /// Idle time before TCP keep-alive probes start, and the period between probes
    /// where the platform allows setting it. `None` leaves keep-alive off.
    pub keep_alive: Option<Duration>,

    /// Delay before racing the next candidate address.
    ///
    /// `None` disables dual-stack racing: candidates are tried one at a time.
    pub happy_eyeballs_delay: Option<Duration>,

    /// The local IPv4 address to bind to.
    pub local_address_ipv4: Option<Ipv4Addr>,

    /// The local IPv6 address to bind to.
    pub local_address_ipv6: Option<Ipv6Addr>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,
}

impl TcpTransportConfig {
    /// Default configuration with a different connect timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(connect_timeout),
            ..Default::default()
        }
    }
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            keep_alive: Some(DEFAULT_KEEP_ALIVE),
            happy_eyeballs_delay: Some(DEFAULT_HAPPY_EYEBALLS_DELAY),
            local_address_ipv4: None,
            local_address_ipv6: None,
            nodelay: true,
        }
    }
}

/// A TCP connector for client connections.
///
/// The resolver `R` turns a hostname into candidate addresses; by default this is
/// [`GaiResolver`].
///
/// # Example
/// ```no_run
/// # use autotransport::client::conn::tcp::TcpTransport;
/// # use tower::ServiceExt as _;
/// # async fn run() {
/// let transport = TcpTransport::default();
///
/// let uri = "http://example.com".parse().unwrap();
/// let stream = transport.oneshot(uri).await.unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct TcpTransport<R = GaiResolver> {
    config: Arc<TcpTransportConfig>,
    resolver: R,
}

impl<R: Clone> Clone for TcpTransport<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        TcpTransport::builder().with_gai_resolver().build()
    }
}

impl TcpTransport {
    /// Create a new TCP connector builder with the default configuration.
    pub fn builder() -> TcpTransportBuilder<()> {
        TcpTransportBuilder {
            config: Default::default(),
            resolver: (),
        }
    }
}

impl<R> TcpTransport<R> {
    /// Get the configuration for the TCP connector.
    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }
}

/// Builder for a TCP connector.
#[derive(Debug)]
pub struct TcpTransportBuilder<R> {
    config: TcpTransportConfig,
    resolver: R,
}

impl<R> TcpTransportBuilder<R> {
    /// Access the TCP connection configuration
    pub fn config(&mut self) -> &mut TcpTransportConfig {
        &mut self.config
    }

    /// Set the TCP connection configuration
    pub fn with_config(mut self, config: TcpTransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the resolver for the TCP connector
    pub fn with_resolver<R2>(self, resolver: R2) -> TcpTransportBuilder<R2> {
        TcpTransportBuilder {
            config: self.config,
            resolver,
        }
    }

    /// Use the system resolver.
    pub fn with_gai_resolver(self) -> TcpTransportBuilder<GaiResolver> {
        self.with_resolver(GaiResolver::new())
    }
}

impl<R> TcpTransportBuilder<R>
where
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error> + Clone,
{
    /// Build a TCP connector
    pub fn build(self) -> TcpTransport<R> {
        TcpTransport {
            config: Arc::new(self.config),
            resolver: self.resolver,
        }
    }
}

impl<R> tower::Service<Uri> for TcpTransport<R>
where
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
        + Clone
        + Send
        + Sync
        + 'static,
    R::Future: Send,
{
    type Response = TcpStream;
    type Error = TcpConnectionError;
    type Future = BoxFuture<'static, Result<TcpStream, TcpConnectionError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.resolver
            .poll_ready(cx)
            .map_err(TcpConnectionError::msg("dns poll_ready"))
    }

    fn call(&mut self, req: Uri) -> Self::Future {
        let (host, port) = match get_host_and_port(&req) {
            Ok(parts) => parts,
            Err(e) => return Box::pin(std::future::ready(Err(e))),
        };

        let transport = std::mem::replace(self, self.clone());
        let span = tracing::trace_span!("tcp", %host, %port);

        Box::pin(
            async move {
                let stream = transport.connect(host, port).await?;

                match stream.peer_addr() {
                    Ok(peer_addr) => trace!(peer.addr = %peer_addr, "tcp connected"),
                    Err(_) => trace!("tcp connected"),
                }

                Ok(stream)
            }
            .instrument(span),
        )
    }
}

impl<R> TcpTransport<R>
where
    R: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error> + Clone,
{
    /// Resolve `host` and dial it, all within the connect timeout.
    async fn connect(&self, host: Box<str>, port: u16) -> Result<TcpStream, TcpConnectionError> {
        let dial = async {
            let mut addrs = self
                .resolver
                .clone()
                .oneshot(host)
                .await
                .map_err(TcpConnectionError::msg("dns resolution"))?;
            addrs.set_port(port);
            self.connecting(addrs).connect().await
        };

        match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, dial).await.unwrap_or_else(|_| {
                trace!(?timeout, "connection timed out");
                Err(TcpConnectionError::timeout(timeout))
            }),
            None => dial.await,
        }
    }

    fn connecting(&self, mut addrs: SocketAddrs) -> TcpConnecting<'_> {
        if self.config.happy_eyeballs_delay.is_some() {
            let preference = if self.config.local_address_ipv4.is_some()
                || self.config.local_address_ipv6.is_some()
            {
                IpVersion::from_binding(
                    self.config.local_address_ipv4,
                    self.config.local_address_ipv6,
                )
            } else {
                addrs.iter().next().map(IpVersion::of).unwrap_or(IpVersion::V6)
            };
            addrs.sort_preferred(preference);
        }

        TcpConnecting {
            addresses: addrs,
            config: &self.config,
        }
    }
}

/// Dials a list of candidate addresses, racing them per RFC 8305 when dual-stack
/// dialing is enabled.
struct TcpConnecting<'c> {
    addresses: SocketAddrs,
    config: &'c TcpTransportConfig,
}

impl TcpConnecting<'_> {
    async fn connect(mut self) -> Result<TcpStream, TcpConnectionError> {
        let mut attempts = EyeballSet::new(self.config.happy_eyeballs_delay, None);

        while let Some(address) = self.addresses.pop() {
            let span = tracing::trace_span!("connect", %address);
            attempts.push(connect(address, self.config).instrument(span));
        }

        attempts.finish().await.map_err(|err| match err {
            HappyEyeballsError::Error(err) => err,
            HappyEyeballsError::Timeout(elapsed) => TcpConnectionError::timeout(elapsed),
            HappyEyeballsError::NoProgress => {
                TcpConnectionError::new("no addresses to connect to")
            }
        })
    }
}

/// Error type for TCP connections.
#[derive(Debug, Error)]
pub struct TcpConnectionError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TcpConnectionError {
    pub(crate) fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn msg<S, E>(message: S) -> impl FnOnce(E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        move |error| Self {
            message: message.into(),
            source: Some(error.into()),
        }
    }

    fn timeout(elapsed: Duration) -> Self {
        Self {
            message: format!("connection attempts timed out after {}ms", elapsed.as_millis()),
            source: Some(io::Error::from(io::ErrorKind::TimedOut).into()),
        }
    }

    /// True when the connection was abandoned because the connect timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        self.source
            .as_ref()
            .and_then(|source| source.downcast_ref::<io::Error>())
            .is_some_and(|error| error.kind() == io::ErrorKind::TimedOut)
    }
}

impl fmt::Display for TcpConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref source) = self.source {
            write!(f, "{}: {}", self.message, source)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Host and port to dial for `uri`, defaulting the port from the scheme.
pub(crate) fn get_host_and_port(uri: &Uri) -> Result<(Box<str>, u16), TcpConnectionError> {
    let host = uri
        .host()
        .ok_or_else(|| TcpConnectionError::new("invalid URI: missing host"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = match uri.port_u16() {
        Some(port) => port,
        None => match uri.scheme_str() {
            Some("http") => 80,
            Some("https") => 443,
            _ => return Err(TcpConnectionError::new("invalid URI: missing port")),
        },
    };

    Ok((host.into(), port))
}

fn socket_for(
    addr: &SocketAddr,
    config: &TcpTransportConfig,
) -> Result<TcpSocket, TcpConnectionError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(TcpConnectionError::msg("tcp open error"))?;

    let local = match (addr, config.local_address_ipv4, config.local_address_ipv6) {
        (SocketAddr::V4(_), Some(ip), _) => Some(SocketAddr::new(ip.into(), 0)),
        (SocketAddr::V6(_), _, Some(ip)) => Some(SocketAddr::new(ip.into(), 0)),
        _ => None,
    };

    if let Some(local) = local {
        socket
            .bind(local)
            .map_err(TcpConnectionError::msg("tcp bind local address"))?;
    }

    Ok(socket)
}

fn configure(stream: &TcpStream, config: &TcpTransportConfig) {
    let _guard = tracing::trace_span!("socket_options").entered();

    if let Err(e) = stream.set_nodelay(config.nodelay) {
        warn!("tcp set_nodelay error: {}", e);
    }

    if let Some(idle) = config.keep_alive {
        let keepalive = TcpKeepalive::new().with_time(idle);

        // Probes repeat at the same period once the connection goes idle.
        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "tvos",
            target_os = "watchos",
            target_os = "windows",
        ))]
        let keepalive = keepalive.with_interval(idle);

        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }
}

fn connect(
    addr: SocketAddr,
    config: &TcpTransportConfig,
) -> impl Future<Output = Result<TcpStream, TcpConnectionError>> + Send + '_ {
    async move {
        let socket = socket_for(&addr, config)?;
        trace!("tcp socket opened");

        let stream = socket
            .connect(addr)
            .await
            .map_err(TcpConnectionError::msg("tcp connect error"))?;

        configure(&stream, config);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use std::future::Ready;

    use static_assertions::assert_impl_all;
    use tokio::net::TcpListener;
    use tower::Service;

    use super::*;

    assert_impl_all!(TcpTransport: Clone, Send, Sync, tower::Service<Uri>);
    assert_impl_all!(TcpConnectionError: std::error::Error, Send, Sync);

    #[derive(Debug, Clone)]
    struct Resolver(Vec<SocketAddr>);

    impl Service<Box<str>> for Resolver {
        type Response = SocketAddrs;
        type Error = io::Error;
        type Future = Ready<Result<SocketAddrs, io::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Box<str>) -> Self::Future {
            std::future::ready(Ok(SocketAddrs::from_iter(self.0.clone())))
        }
    }

    fn localhost() -> Resolver {
        Resolver(vec![SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)])
    }

    #[test]
    fn test_get_host_and_port() {
        let uri: Uri = "http://example.com".parse().unwrap();
        assert_eq!(get_host_and_port(&uri).unwrap(), ("example.com".into(), 80));

        let uri: Uri = "http://example.com:8080".parse().unwrap();
        assert_eq!(
            get_host_and_port(&uri).unwrap(),
            ("example.com".into(), 8080)
        );

        let uri: Uri = "https://example.com".parse().unwrap();
        assert_eq!(
            get_host_and_port(&uri).unwrap(),
            ("example.com".into(), 443)
        );

        let uri: Uri = "http://[::1]:8080".parse().unwrap();
        assert_eq!(get_host_and_port(&uri).unwrap(), ("::1".into(), 8080));

        let uri: Uri = "grpc://example.com".parse().unwrap();
        assert!(get_host_and_port(&uri).is_err());
    }

    #[test]
    fn default_config() {
        let config = TcpTransportConfig::default();
        assert_eq!(config.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(config.keep_alive, Some(Duration::from_secs(30)));
        assert!(config.happy_eyeballs_delay.is_some());
        assert!(config.nodelay);
    }

    #[test]
    fn connect_timeout_override_keeps_keep_alive() {
        let config = TcpTransportConfig::with_connect_timeout(Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.keep_alive, Some(DEFAULT_KEEP_ALIVE));
    }

    #[tokio::test]
    async fn test_tcp_invalid_uri() {
        let _ = tracing_subscriber::fmt::try_init();

        let transport = TcpTransport::builder()
            .with_resolver(localhost())
            .build();

        let result = transport.oneshot("/path/".parse().unwrap()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tcp_transport() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = TcpTransport::builder()
            .with_resolver(localhost())
            .build();

        let uri: Uri = format!("http://example.com:{port}").parse().unwrap();
        let (stream, accepted) = tokio::join!(transport.oneshot(uri), listener.accept());

        let stream = stream.unwrap();
        let (_, peer) = accepted.unwrap();
        assert_eq!(
            stream.peer_addr().unwrap(),
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
        );
        assert_eq!(stream.local_addr().unwrap(), peer);
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());

        #[cfg(target_os = "linux")]
        {
            let socket = SockRef::from(&stream);
            assert_eq!(socket.keepalive_time().unwrap(), DEFAULT_KEEP_ALIVE);
            assert_eq!(socket.keepalive_interval().unwrap(), DEFAULT_KEEP_ALIVE);
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn falls_back_to_second_address() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = TcpTransportConfig::with_connect_timeout(Duration::from_secs(5));
        config.happy_eyeballs_delay = None;

        // Nothing listens on 127.0.0.2, so the first candidate is refused.
        let transport = TcpTransport::builder()
            .with_config(config)
            .with_resolver(Resolver(vec![
                SocketAddr::new(Ipv4Addr::new(127, 0, 0, 2).into(), 0),
                SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0),
            ]))
            .build();

        let uri: Uri = format!("http://example.com:{port}").parse().unwrap();
        let (stream, _) = tokio::join!(transport.oneshot(uri), listener.accept());
        assert_eq!(
            stream.unwrap().peer_addr().unwrap(),
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
        );
    }

    #[tokio::test]
    async fn connection_refused_is_not_a_timeout() {
        let _ = tracing_subscriber::fmt::try_init();

        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let transport = TcpTransport::builder()
            .with_config(TcpTransportConfig::with_connect_timeout(
                Duration::from_secs(5),
            ))
            .with_resolver(localhost())
            .build();

        let uri: Uri = format!("http://example.com:{port}").parse().unwrap();
        let error = transport.oneshot(uri).await.unwrap_err();
        assert!(!error.is_timeout());
    }

    #[derive(Debug, Clone)]
    struct StalledResolver;

    impl Service<Box<str>> for StalledResolver {
        type Response = SocketAddrs;
        type Error = io::Error;
        type Future = std::future::Pending<Result<SocketAddrs, io::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Box<str>) -> Self::Future {
            std::future::pending()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_bounds_the_dial() {
        let transport = TcpTransport::builder()
            .with_config(TcpTransportConfig::with_connect_timeout(
                Duration::from_secs(5),
            ))
            .with_resolver(StalledResolver)
            .build();

        let started = tokio::time::Instant::now();
        let error = transport
            .oneshot("http://example.com".parse().unwrap())
            .await
            .unwrap_err();

        assert!(error.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
