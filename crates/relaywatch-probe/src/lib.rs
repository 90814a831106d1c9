//! Health probing for relaywatch
//!
//! Provides:
//! - Probe endpoints (Unix domain socket path or Windows named pipe)
//! - HTTP/1.1 framed directly over the local stream
//! - A fixed-interval poller that never runs two probes at once

mod client;
mod endpoint;
mod poller;
mod transport;

pub use client::*;
pub use endpoint::*;
pub use poller::*;
pub use transport::*;

use std::time::Duration;
use thiserror::Error;

/// Probe errors
///
/// Every variant is recoverable: the poller reports it and tries again on
/// the next tick.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport not available on this platform: {0}")]
    UnsupportedTransport(String),

    #[error("Invalid base URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unhealthy status: {0}")]
    UnhealthyStatus(u16),
}
