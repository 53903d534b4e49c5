use membrane_router::RouteError;
use std::time::Duration;

/// Failure while handing an envelope to a peer.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("communication mode not supported on this platform: {0}")]
    Unsupported(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("transport timed out")]
    Timeout,
    #[error("encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("peer rejected message: {0}")]
    Rejected(String),
}

/// Failure of [`crate::MembraneClient::send`].
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("target unavailable: {0}")]
    TargetUnavailable(String),
    #[error("route failed: {0}")]
    Route(#[from] RouteError),
    #[error("delivery failed: {0}")]
    Transport(#[from] TransportError),
    #[error("delivery not acknowledged within {0:?}")]
    Timeout(Duration),
}
