use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

/// Source of accepted TCP connections.
pub trait Accept: Send + Sync {
    fn accept(
        &self,
    ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Accept for TcpListener {
    fn accept(
        &self,
    ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Keep-alive probe time and interval set on accepted connections.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(3 * 60);

/// Listener that turns on TCP keep-alive for every accepted connection, so
/// dead peers of idle connections are eventually detected.
pub struct KeepAliveListener<L = TcpListener> {
    inner: L,
    period: Duration,
}

impl<L: Accept> KeepAliveListener<L> {
    pub fn new(inner: L, period: Duration) -> Self {
        Self { inner, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Accept the next connection. Errors from the underlying listener are
    /// returned as is; retry policy belongs to the caller.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        if let Err(e) = enable_keepalive(&stream, self.period) {
            warn!(%peer, error = %e, "failed to enable TCP keep-alive");
        }
        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

fn enable_keepalive(stream: &TcpStream, period: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(period)
        .with_interval(period);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
