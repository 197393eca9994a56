//! Configuration of a load generator run.
//!
//! A [`ClientConfig`] is created once before the workers start and shared read-only between them.
//! All fields have defaults, so partial configuration from YAML, environment or command line flags
//! can be layered on top.

use std::time::Duration;

use cdnpress_types::{SizeSpec, headers};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration value is out of its valid range.
#[derive(Debug, Error)]
#[error("invalid client configuration: {0}")]
pub struct ConfigError(String);

/// Probabilities of the client side fault injection points.
///
/// Each probability is evaluated independently for every request.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FaultProbabilities {
    /// Drop the response right after its headers arrived, before reading any body.
    pub send_close: f64,
    /// Abort reading the body half way through.
    pub recv_half_close: f64,
    /// Discard the connection after reading the full body instead of reusing it.
    pub recv_full_close: f64,
}

/// Configuration of the load generator.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Full target address (`host:port` or a URL). Takes precedence over `host` and `port`.
    pub addr: Option<String>,
    /// Target host name, used with `port` if `addr` is not set.
    pub host: String,
    /// Target port, used with `host` if `addr` is not set.
    pub port: u16,
    /// Explicit `Host` header to send, for example to address a virtual host on a CDN edge.
    pub host_header: Option<String>,

    /// Number of concurrent workers and in-flight requests.
    pub conns: usize,
    /// Maximum number of request starts per second. `0` disables pacing.
    pub qps: u32,
    /// Number of request starts that may happen back to back.
    pub burst: u32,
    /// Wall-clock duration of the run.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Interval between windowed statistics reports.
    #[serde(with = "humantime_serde")]
    pub ticker_dump: Duration,
    /// Delay before the first request is sent.
    #[serde(with = "humantime_serde")]
    pub defer_start: Duration,
    /// Transport timeout of a single exchange.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Requested response sizes.
    pub resp_size: SizeSpec,
    /// Share of requests asking for the small size of a `[min,max]` split.
    pub disk_ratio: f64,

    /// Probability that a request re-targets a previously issued URL.
    pub hit_ratio: f64,
    /// Size of the simulated working set of URLs.
    pub url_count: u64,

    /// Fault injection probabilities.
    pub faults: FaultProbabilities,

    /// Verify the content checksum header when the server sends one.
    pub verify_checksum: bool,
    /// Deliberately corrupt the computed checksum. Only useful to test mismatch detection.
    pub corrupt_checksum: bool,
    /// Ask for compressed responses.
    pub compression: bool,
    /// Keep running after failed requests instead of aborting the run.
    pub ignore_errors: bool,

    /// Name of the request id header.
    pub request_id_header: String,
    /// Name of the response header that indicates a cache hit.
    pub cache_indicator_header: String,

    /// Capacity of the measurement channel feeding the statistics collector.
    pub stats_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: None,
            host: "localhost".to_owned(),
            port: 8080,
            host_header: None,

            conns: 10,
            qps: 100,
            burst: 1,
            duration: Duration::from_secs(30),
            ticker_dump: Duration::from_secs(5),
            defer_start: Duration::ZERO,
            request_timeout: Duration::from_secs(30),

            resp_size: SizeSpec::default(),
            disk_ratio: 0.5,

            hit_ratio: 0.5,
            url_count: 1000,

            faults: FaultProbabilities::default(),

            verify_checksum: true,
            corrupt_checksum: false,
            compression: false,
            ignore_errors: false,

            request_id_header: headers::DEFAULT_REQUEST_ID.to_owned(),
            cache_indicator_header: headers::DEFAULT_CACHE_INDICATOR.to_owned(),

            stats_capacity: 50_000,
        }
    }
}

impl ClientConfig {
    /// Returns the base URL all request targets are built from.
    pub fn base_url(&self) -> String {
        match self.addr {
            Some(ref addr) if addr.starts_with("http") => addr.trim_end_matches('/').to_owned(),
            Some(ref addr) => format!("http://{}", addr.trim_end_matches('/')),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// Checks that all values are within their valid ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conns == 0 {
            return Err(ConfigError("conns must be at least 1".into()));
        }
        if self.url_count == 0 {
            return Err(ConfigError("url_count must be at least 1".into()));
        }
        if self.stats_capacity == 0 {
            return Err(ConfigError("stats_capacity must be at least 1".into()));
        }
        if self.ticker_dump.is_zero() {
            return Err(ConfigError("ticker_dump must not be zero".into()));
        }

        let probabilities = [
            ("hit_ratio", self.hit_ratio),
            ("disk_ratio", self.disk_ratio),
            ("faults.send_close", self.faults.send_close),
            ("faults.recv_half_close", self.faults.recv_half_close),
            ("faults.recv_full_close", self.faults.recv_full_close),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_variants() {
        let mut config = ClientConfig::default();
        assert_eq!(config.base_url(), "http://localhost:8080");

        config.addr = Some("10.0.0.1:9000".into());
        assert_eq!(config.base_url(), "http://10.0.0.1:9000");

        config.addr = Some("https://edge.example.com/".into());
        assert_eq!(config.base_url(), "https://edge.example.com");
    }

    #[test]
    fn defaults_are_valid() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = ClientConfig {
            hit_ratio: 1.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hit_ratio"));

        let config = ClientConfig {
            faults: FaultProbabilities {
                recv_half_close: -0.1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            conns: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
