//! Error types of the load generator.

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// A single exchange failed.
///
/// Every variant carries the requested URL so failures can be correlated with server logs.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Sending the request or receiving the response head failed.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// The requested URL.
        url: String,
        /// The underlying transport error.
        source: reqwest::Error,
    },

    /// The server answered with a status above 300.
    #[error("request to {url} returned {status}")]
    Status {
        /// The requested URL.
        url: String,
        /// The response status.
        status: StatusCode,
    },

    /// Reading the response body failed mid-stream.
    #[error("reading body of {url} failed after {read} bytes: {source}")]
    Body {
        /// The requested URL.
        url: String,
        /// Bytes read before the failure.
        read: u64,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The body did not match the checksum advertised by the server.
    #[error("checksum mismatch for {url}: computed {computed}, expected {expected}")]
    ChecksumMismatch {
        /// The requested URL.
        url: String,
        /// Checksum advertised in the response headers.
        expected: String,
        /// Checksum computed over the received bytes.
        computed: String,
    },
}

/// A load generator run could not be started or was aborted.
#[derive(Debug, Error)]
pub enum RunError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be created.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// A request failed and errors are not ignored.
    #[error("run aborted: {0}")]
    Aborted(#[from] DriverError),
}
