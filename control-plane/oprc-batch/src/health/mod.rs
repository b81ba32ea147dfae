//! Liveness endpoint served over plain HTTP/1.1.
//!
//! [`HealthServer::start`] binds synchronously and then runs two tasks: a
//! watcher waiting for SIGINT/SIGTERM (or [`HealthServer::shutdown`]) and
//! the serve loop. The watcher fires a single cancellation; the serve loop
//! then stops accepting, gives in-flight connections the configured grace
//! period (zero by default) and aborts whatever is left.
//! [`HealthServer::wait`] joins both tasks and reports why serving ended.

mod error;
pub mod listener;
mod router;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::HealthConfig;

pub use error::HealthServerError;
pub use listener::{Accept, KEEPALIVE_PERIOD, KeepAliveListener};
pub use router::{HEALTHZ_PATH, PING_PATH, health_router};

/// Upper bound for request head buffering.
pub const MAX_HEADER_BYTES: usize = 1 << 20;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Lifecycle of a started server. A failed bind never produces a server,
/// so the pre-bind states are represented by the `Result` of `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    ShuttingDown,
    Stopped,
    Fatal,
}

/// How the serve loop ended, fixed at the moment it returns.
#[derive(Debug)]
enum ServeOutcome {
    Stopped,
    Fatal(io::Error),
}

pub struct HealthServer {
    local_addr: SocketAddr,
    token: CancellationToken,
    state: Arc<watch::Sender<ServerState>>,
    watcher: JoinHandle<()>,
    serve: JoinHandle<ServeOutcome>,
}

impl HealthServer {
    /// Bind and start serving; stops on SIGINT or SIGTERM.
    pub async fn start(config: HealthConfig) -> Result<Self, HealthServerError> {
        Self::start_with_shutdown(config, shutdown_signal()).await
    }

    /// Bind and start serving; stops once `shutdown` completes.
    pub async fn start_with_shutdown<F>(
        config: HealthConfig,
        shutdown: F,
    ) -> Result<Self, HealthServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = bind(&config).await?;
        let local_addr = listener.local_addr().map_err(|source| {
            HealthServerError::Bind {
                address: config.bind_address.clone(),
                source,
            }
        })?;
        Ok(Self::launch(
            listener,
            local_addr,
            &config,
            health_router(),
            shutdown,
        ))
    }

    fn launch<L, F>(
        listener: KeepAliveListener<L>,
        local_addr: SocketAddr,
        config: &HealthConfig,
        router: Router,
        shutdown: F,
    ) -> Self
    where
        L: Accept + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!(
            "health_server",
            service = %config.service_name,
            addr = %local_addr
        );
        let token = CancellationToken::new();
        let (state, _) = watch::channel(ServerState::Listening);
        let state = Arc::new(state);

        let watcher = tokio::spawn(
            watch_shutdown(shutdown, token.clone(), state.clone())
                .instrument(span.clone()),
        );
        let serve = tokio::spawn(
            run_serve(
                listener,
                router,
                token.clone(),
                config.grace_period(),
                state.clone(),
            )
            .instrument(span.clone()),
        );
        span.in_scope(|| info!("health server listening"));

        Self {
            local_addr,
            token,
            state,
            watcher,
            serve,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Request shutdown as if a termination signal had arrived.
    pub fn shutdown(&self) {
        begin_shutdown(&self.state);
        self.token.cancel();
    }

    /// Join both background tasks. `Ok` means serving ended because shutdown
    /// was requested; anything else is a failure the process should not
    /// survive.
    pub async fn wait(self) -> Result<(), HealthServerError> {
        let Self {
            local_addr,
            state,
            watcher,
            serve,
            ..
        } = self;

        let result = match serve.await {
            Ok(ServeOutcome::Stopped) => Ok(()),
            Ok(ServeOutcome::Fatal(source)) => {
                Err(HealthServerError::UnexpectedTermination {
                    address: local_addr,
                    source: Some(source),
                })
            }
            Err(e) => {
                state.send_replace(ServerState::Fatal);
                if e.is_panic() {
                    error!(addr = %local_addr, error = %e, "health serve loop panicked");
                    Err(HealthServerError::ServeLoopPanicked {
                        address: local_addr,
                    })
                } else {
                    Err(HealthServerError::UnexpectedTermination {
                        address: local_addr,
                        source: None,
                    })
                }
            }
        };

        if result.is_err() {
            watcher.abort();
        }
        let _ = watcher.await;
        result
    }
}

async fn bind(
    config: &HealthConfig,
) -> Result<KeepAliveListener, HealthServerError> {
    let listener =
        TcpListener::bind(&config.bind_address)
            .await
            .map_err(|source| HealthServerError::Bind {
                address: config.bind_address.clone(),
                source,
            })?;
    Ok(KeepAliveListener::new(listener, KEEPALIVE_PERIOD))
}

fn begin_shutdown(state: &watch::Sender<ServerState>) {
    state.send_if_modified(|s| {
        if *s == ServerState::Listening {
            *s = ServerState::ShuttingDown;
            true
        } else {
            false
        }
    });
}

async fn watch_shutdown<F>(
    shutdown: F,
    token: CancellationToken,
    state: Arc<watch::Sender<ServerState>>,
) where
    F: Future<Output = ()> + Send,
{
    tokio::select! {
        _ = shutdown => info!("termination signal received"),
        _ = token.cancelled() => {}
    }
    begin_shutdown(&state);
    token.cancel();
}

async fn run_serve<L: Accept>(
    listener: KeepAliveListener<L>,
    router: Router,
    token: CancellationToken,
    grace: Duration,
    state: Arc<watch::Sender<ServerState>>,
) -> ServeOutcome {
    match serve(listener, router, &token, grace).await {
        Ok(()) => {
            state.send_replace(ServerState::Stopped);
            info!("stopped listening");
            ServeOutcome::Stopped
        }
        Err(e) => {
            state.send_replace(ServerState::Fatal);
            error!(error = %e, "stopped listening due to error");
            ServeOutcome::Fatal(e)
        }
    }
}

/// Returns `Ok` only once shutdown was requested.
async fn serve<L: Accept>(
    listener: KeepAliveListener<L>,
    router: Router,
    token: &CancellationToken,
    grace: Duration,
) -> io::Result<()> {
    let mut connections = JoinSet::new();
    let mut backoff: Option<Duration> = None;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                reap(joined);
                continue;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                backoff = None;
                connections.spawn(
                    serve_connection(stream, router.clone())
                        .instrument(info_span!("conn", %peer)),
                );
            }
            Err(e) if is_transient(&e) => {
                let delay = backoff
                    .map_or(ACCEPT_BACKOFF_MIN, |d| (d * 2).min(ACCEPT_BACKOFF_MAX));
                backoff = Some(delay);
                warn!(error = %e, retry_in = ?delay, "accept error");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }

    drop(listener);
    drain(connections, grace).await;
    Ok(())
}

async fn serve_connection(stream: TcpStream, router: Router) {
    let service = TowerToHyperService::new(router);
    let mut builder = http1::Builder::new();
    builder.max_buf_size(MAX_HEADER_BYTES);
    if let Err(e) = builder
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %e, "connection closed with error");
    }
}

/// Log a finished connection task. A panic only takes its own connection down.
fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "panic while serving connection");
        }
    }
}

async fn drain(mut connections: JoinSet<()>, grace: Duration) {
    if connections.is_empty() {
        return;
    }
    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = connections.join_next().await {
            reap(joined);
        }
    })
    .await;
    if drained.is_err() {
        debug!(
            remaining = connections.len(),
            ?grace,
            "closing in-flight connections"
        );
        connections.shutdown().await;
    }
}

/// Accept errors worth retrying: the peer went away before we got to it, or
/// the process is temporarily out of descriptors or memory.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || is_resource_exhausted(e)
}

#[cfg(unix)]
fn is_resource_exhausted(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhausted(_e: &io::Error) -> bool {
    false
}

/// Completes on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct FlakyListener {
        transient_failures: usize,
        calls: Arc<AtomicUsize>,
    }

    impl Accept for FlakyListener {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.transient_failures {
                Err(io::Error::from(io::ErrorKind::ConnectionAborted))
            } else {
                Err(io::Error::new(io::ErrorKind::InvalidInput, "listener closed"))
            }
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 9)))
        }
    }

    async fn boom() -> &'static str {
        panic!("handler blew up")
    }

    fn test_config() -> HealthConfig {
        HealthConfig::new("127.0.0.1:0", "test")
    }

    async fn http_get(addr: SocketAddr, path: &str) -> io::Result<String> {
        let mut stream = TcpStream::connect(addr).await?;
        let req = format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(req.as_bytes()).await?;
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await?;
        Ok(buf)
    }

    #[test]
    fn transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
        #[cfg(unix)]
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
    }

    #[tokio::test]
    async fn handler_panic_only_drops_its_connection() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener =
            KeepAliveListener::new(inner, KEEPALIVE_PERIOD);
        let addr = listener.local_addr().unwrap();
        let router = health_router().route("/boom", get(boom));
        let server = HealthServer::launch(
            listener,
            addr,
            &test_config(),
            router,
            std::future::pending(),
        );
        let addr = server.local_addr();

        let crashed = http_get(addr, "/boom").await.unwrap_or_default();
        assert!(!crashed.contains("200 OK"));

        let healthy = http_get(addr, "/healthz").await.unwrap();
        assert!(healthy.starts_with("HTTP/1.1 200 OK"), "{healthy}");
        assert_eq!(server.state(), ServerState::Listening);

        server.shutdown();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn fatal_accept_error_is_reported_by_wait() {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = KeepAliveListener::new(
            FlakyListener {
                transient_failures: 3,
                calls: calls.clone(),
            },
            KEEPALIVE_PERIOD,
        );
        let server = HealthServer::launch(
            listener,
            SocketAddr::from(([127, 0, 0, 1], 9)),
            &test_config(),
            health_router(),
            std::future::pending(),
        );
        let mut states = server.subscribe();

        let err = server.wait().await.unwrap_err();
        match err {
            HealthServerError::UnexpectedTermination { source, .. } => {
                let source = source.expect("accept error kept as source");
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(*states.borrow_and_update(), ServerState::Fatal);
    }

    #[tokio::test]
    async fn fatal_stop_stays_fatal_after_late_shutdown() {
        let listener = KeepAliveListener::new(
            FlakyListener {
                transient_failures: 0,
                calls: Arc::new(AtomicUsize::new(0)),
            },
            KEEPALIVE_PERIOD,
        );
        let server = HealthServer::launch(
            listener,
            SocketAddr::from(([127, 0, 0, 1], 9)),
            &test_config(),
            health_router(),
            std::future::pending(),
        );
        let mut states = server.subscribe();
        states
            .wait_for(|s| *s == ServerState::Fatal)
            .await
            .unwrap();

        server.shutdown();
        assert_eq!(server.state(), ServerState::Fatal);
        let err = server.wait().await.unwrap_err();
        assert!(
            matches!(
                err,
                HealthServerError::UnexpectedTermination { source: Some(_), .. }
            ),
            "{err:?}"
        );
        assert_eq!(*states.borrow_and_update(), ServerState::Fatal);
    }

    #[tokio::test]
    async fn explicit_shutdown_stops_server() {
        let listener = bind(&test_config()).await.unwrap();
        assert_eq!(listener.period(), KEEPALIVE_PERIOD);
        let addr = listener.local_addr().unwrap();
        let server = HealthServer::launch(
            listener,
            addr,
            &test_config(),
            health_router(),
            std::future::pending(),
        );
        let mut states = server.subscribe();
        server.shutdown();
        assert_eq!(server.state(), ServerState::ShuttingDown);
        server.wait().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ServerState::Stopped);
    }
}
