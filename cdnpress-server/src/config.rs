//! Configuration of the response server.
//!
//! All fields have defaults that produce a plain echo server: uncached, uncompressed bodies of the
//! requested size without delays, over connections that are kept alive.

use std::net::SocketAddr;
use std::time::Duration;

use cdnpress_types::{DEFAULT_RESPONSE_SIZE, headers};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration value is out of its valid range.
#[derive(Debug, Error)]
#[error("invalid server configuration: {0}")]
pub struct ConfigError(String);

/// A fixed delay extended by a uniformly distributed random jitter.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelayProfile {
    /// Base delay applied on every request.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Upper bound (exclusive) of the random extra delay.
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,
}

impl DelayProfile {
    /// Draws the delay for one request.
    ///
    /// Jitter is only applied on top of a non-zero base delay.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }

        let jitter_ms = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        if jitter_ms == 0 {
            return self.delay;
        }

        self.delay + Duration::from_millis(rng.random_range(0..jitter_ms))
    }
}

/// Default upper bound for requested body sizes, 256 MiB.
const DEFAULT_MAX_SIZE: usize = 256 * 1024 * 1024;

/// Configuration of the response server.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub http_addr: SocketAddr,
    /// Body size used when a request does not carry a valid size header.
    pub default_size: usize,
    /// Upper bound for requested body sizes. Larger requests are clamped to it.
    pub max_size: usize,
    /// Keep generated bodies in memory and reuse them for requests of the same size.
    pub cache_responses: bool,
    /// Compress bodies when the client accepts brotli or gzip.
    pub compression: bool,
    /// Send a hex MD5 digest of the sent bytes in a response header.
    pub checksum: bool,
    /// Delay before the response head is produced.
    pub header_delay: DelayProfile,
    /// Delay between the response head and the first body bytes.
    pub body_delay: DelayProfile,
    /// Probability that a response allows the connection to be reused.
    pub keep_alive_probability: f64,
    /// Probability that the server closes the connection right after a complete body.
    pub close_after_body_probability: f64,
    /// Name of the request id header echoed into the exchange log.
    pub request_id_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".parse().unwrap(),
            default_size: DEFAULT_RESPONSE_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            cache_responses: false,
            compression: true,
            checksum: false,
            header_delay: DelayProfile::default(),
            body_delay: DelayProfile::default(),
            keep_alive_probability: 1.0,
            close_after_body_probability: 0.0,
            request_id_header: headers::DEFAULT_REQUEST_ID.to_owned(),
        }
    }
}

impl ServerConfig {
    /// Checks that all values are within their valid ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probabilities = [
            ("keep_alive_probability", self.keep_alive_probability),
            (
                "close_after_body_probability",
                self.close_after_body_probability,
            ),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }

        if self.default_size > self.max_size {
            return Err(ConfigError(format!(
                "default_size {} exceeds max_size {}",
                self.default_size, self.max_size
            )));
        }

        if self.request_id_header.is_empty() {
            return Err(ConfigError("request_id_header must not be empty".into()));
        }

        Ok(())
    }
}
