use std::io;
use std::net::SocketAddr;

#[derive(thiserror::Error, Debug)]
pub enum HealthServerError {
    #[error("failed to create listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// The serve loop returned before any shutdown was requested.
    #[error("stopped listening on {address} without a shutdown signal")]
    UnexpectedTermination {
        address: SocketAddr,
        #[source]
        source: Option<io::Error>,
    },
    #[error("serve loop on {address} panicked")]
    ServeLoopPanicked { address: SocketAddr },
}
