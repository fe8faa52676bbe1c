//! Hostname resolution for the TCP dialer.

use std::collections::VecDeque;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::{fmt, io};

use pin_project::{pin_project, pinned_drop};
use tokio::task::JoinHandle;

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpVersion {
    /// The family of a socket address.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => IpVersion::V4,
            SocketAddr::V6(_) => IpVersion::V6,
        }
    }

    /// Pick a preferred family from the configured local bindings.
    ///
    /// A lone IPv4 binding prefers IPv4, anything else prefers IPv6.
    pub fn from_binding(ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> Self {
        match (ipv4, ipv6) {
            (Some(_), None) => IpVersion::V4,
            _ => IpVersion::V6,
        }
    }
}

/// The candidate addresses for a single host, in dialing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketAddrs(VecDeque<SocketAddr>);

impl SocketAddrs {
    /// Override the port on every address.
    pub fn set_port(&mut self, port: u16) {
        for addr in self.0.iter_mut() {
            addr.set_port(port);
        }
    }

    /// Reorder so the address families alternate, starting with `preference`
    /// when present. Order within each family is kept, as RFC 8305 asks.
    pub fn sort_preferred(&mut self, preference: IpVersion) {
        let (mut preferred, mut fallback): (VecDeque<_>, VecDeque<_>) = self
            .0
            .drain(..)
            .partition(|addr| IpVersion::of(addr) == preference);

        while !preferred.is_empty() || !fallback.is_empty() {
            self.0.extend(preferred.pop_front());
            self.0.extend(fallback.pop_front());
        }
    }

    /// Take the next address to dial.
    pub fn pop(&mut self) -> Option<SocketAddr> {
        self.0.pop_front()
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there is nothing to dial.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the addresses in dialing order.
    pub fn iter(&self) -> impl Iterator<Item = &SocketAddr> {
        self.0.iter()
    }
}

impl FromIterator<SocketAddr> for SocketAddrs {
    fn from_iter<T: IntoIterator<Item = SocketAddr>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for SocketAddrs {
    type Item = SocketAddr;
    type IntoIter = std::collections::vec_deque::IntoIter<SocketAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// GetAddrInfo based resolver.
///
/// Hostnames go through the operating system's `getaddrinfo` on tokio's blocking
/// pool. Ports in the result are zero; the dialer fills them in.
#[derive(Debug, Default, Clone)]
pub struct GaiResolver {
    _priv: (),
}

impl GaiResolver {
    /// Create a new `GaiResolver`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl tower::Service<Box<str>> for GaiResolver {
    type Response = SocketAddrs;
    type Error = io::Error;
    type Future = GaiFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, host: Box<str>) -> Self::Future {
        let span = tracing::Span::current();
        GaiFuture {
            handle: tokio::task::spawn_blocking(move || {
                tracing::trace_span!(parent: &span, "getaddrinfo", %host).in_scope(|| {
                    tracing::trace!("dns resolution starting");
                    (host.as_ref(), 0)
                        .to_socket_addrs()
                        .map(SocketAddrs::from_iter)
                })
            }),
        }
    }
}

/// Future returned by [`GaiResolver`].
///
/// Dropping it aborts the lookup.
#[pin_project(PinnedDrop)]
pub struct GaiFuture {
    #[pin]
    handle: JoinHandle<Result<SocketAddrs, io::Error>>,
}

impl fmt::Debug for GaiFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaiFuture").finish()
    }
}

impl Future for GaiFuture {
    type Output = Result<SocketAddrs, io::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().handle.poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(join_err) if join_err.is_cancelled() => {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::Interrupted, join_err)))
            }
            Err(join_err) => Poll::Ready(Err(io::Error::other(join_err))),
        }
    }
}

#[pinned_drop]
impl PinnedDrop for GaiFuture {
    fn drop(self: Pin<&mut Self>) {
        self.handle.abort()
    }
}
