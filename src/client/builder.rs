use std::time::Duration;

use http_body::Body;
use hyper_util::client::legacy::Builder as PoolBuilder;

use super::conn::{pool_builder, H2cTransport, HttpTransport, TcpTransport, TcpTransportConfig};
use crate::service::AutoTransport;

/// A builder for the default pair of transports and the router which joins them.
///
/// The TCP configuration is shared by both transports. Each transport has its own
/// pool configuration, starting from [`pool_builder`].
///
/// # Example
/// ```no_run
/// # use std::time::Duration;
/// # use bytes::Bytes;
/// # use http_body_util::Full;
/// # use autotransport::client::Builder;
/// let mut builder = Builder::new().connect_timeout(Duration::from_secs(5));
/// builder.http2().http2_keep_alive_interval(Duration::from_secs(20));
///
/// let transport = builder.build::<Full<Bytes>>();
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    tcp: TcpTransportConfig,
    http1: PoolBuilder,
    http2: PoolBuilder,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            tcp: TcpTransportConfig::default(),
            http1: pool_builder(),
            http2: pool_builder(),
        }
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.tcp.connect_timeout = Some(timeout);
        self
    }

    /// Use the provided TCP configuration.
    pub fn with_tcp(mut self, config: TcpTransportConfig) -> Self {
        self.tcp = config;
        self
    }

    /// Access the TCP configuration.
    pub fn tcp(&mut self) -> &mut TcpTransportConfig {
        &mut self.tcp
    }

    /// Close connections which have been idle in either pool for `timeout`.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.http1.pool_idle_timeout(timeout);
        self.http2.pool_idle_timeout(timeout);
        self
    }

    /// Access the HTTP/1.1 client configuration.
    pub fn http1(&mut self) -> &mut PoolBuilder {
        &mut self.http1
    }

    /// Access the h2c client configuration.
    ///
    /// The modern transport always switches this to HTTP/2 only.
    pub fn http2(&mut self) -> &mut PoolBuilder {
        &mut self.http2
    }

    fn dialer(&self) -> TcpTransport {
        TcpTransport::builder()
            .with_config(self.tcp.clone())
            .with_gai_resolver()
            .build()
    }

    /// Build the HTTP/1.1 transport.
    pub fn build_legacy<B>(&self) -> HttpTransport<B>
    where
        B: Body + Send,
        B::Data: Send,
    {
        HttpTransport::with_builder(self.dialer(), &self.http1)
    }

    /// Build the h2c transport.
    pub fn build_modern<B>(&self) -> H2cTransport<B>
    where
        B: Body + Send,
        B::Data: Send,
    {
        H2cTransport::with_builder(self.dialer(), &self.http2)
    }

    /// Build both transports and join them with an [`AutoTransport`].
    ///
    /// Clones of the router share both pools.
    pub fn build<B>(&self) -> AutoTransport<HttpTransport<B>, H2cTransport<B>>
    where
        B: Body + Send,
        B::Data: Send,
    {
        AutoTransport::new(self.build_legacy(), self.build_modern())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::Empty;

    use super::*;
    use crate::client::conn::tcp::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE};

    #[test]
    fn defaults() {
        let transport = Builder::new().build::<Empty<Bytes>>();
        assert_eq!(
            transport.legacy().tcp().config().connect_timeout,
            Some(DEFAULT_CONNECT_TIMEOUT)
        );
        assert_eq!(
            transport.modern().tcp().config().keep_alive,
            Some(DEFAULT_KEEP_ALIVE)
        );
    }

    #[test]
    fn connect_timeout_applies_to_both_transports() {
        let transport = Builder::new()
            .connect_timeout(Duration::from_secs(5))
            .build::<Empty<Bytes>>();

        for config in [
            transport.legacy().tcp().config(),
            transport.modern().tcp().config(),
        ] {
            assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
            assert_eq!(config.keep_alive, Some(Duration::from_secs(30)));
        }
    }

    #[test]
    fn tcp_config_accessor() {
        let mut builder = Builder::new();
        builder.tcp().happy_eyeballs_delay = None;
        builder.tcp().nodelay = false;

        let legacy = builder.build_legacy::<Empty<Bytes>>();
        assert_eq!(legacy.tcp().config().happy_eyeballs_delay, None);
        assert!(!legacy.tcp().config().nodelay);
    }
}
