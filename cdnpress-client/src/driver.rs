//! A single HTTP exchange with fault injection and integrity verification.
//!
//! [`execute`] sends one request, streams the response body in fixed-size chunks and applies the
//! [`FaultPlan`] drawn for this request:
//!
//! 1. *send-close* drops the response right after its head arrived,
//! 2. *recv-half-close* stops reading the body half way through,
//! 3. *recv-full-close* asks the caller to discard its connection pool after a complete read.

use std::time::Duration;

use cdnpress_types::headers;
use futures_util::TryStreamExt;
use rand::Rng;
use rand::distr::{Alphanumeric, SampleString};
use reqwest::header::{self, HeaderMap};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::io::StreamReader;

use crate::config::{ClientConfig, FaultProbabilities};
use crate::error::DriverError;
use crate::stats::Measurement;

/// Size of the chunks the response body is read in.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Per-chunk abort probability of a half-close when the body length is unknown.
const UNKNOWN_LENGTH_ABORT_PROBABILITY: f64 = 0.05;

/// Fault injection decisions for one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Abandon the response before reading its body.
    pub send_close: bool,
    /// Abandon the response half way through its body.
    pub recv_half_close: bool,
    /// Discard the connection after a complete read.
    pub recv_full_close: bool,
}

impl FaultPlan {
    /// Draws independent decisions for each fault injection point.
    pub fn sample<R: Rng + ?Sized>(probabilities: &FaultProbabilities, rng: &mut R) -> Self {
        Self {
            send_close: rng.random::<f64>() < probabilities.send_close,
            recv_half_close: rng.random::<f64>() < probabilities.recv_half_close,
            recv_full_close: rng.random::<f64>() < probabilities.recv_full_close,
        }
    }
}

/// Where an exchange was deliberately abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    /// Right after the response head arrived.
    SendClose,
    /// While reading the body, after `read` bytes.
    RecvHalfClose {
        /// Body bytes read before abandoning the response.
        read: u64,
    },
}

/// A successfully completed exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completed {
    /// Number of body bytes received.
    pub bytes: u64,
    /// Timings and cache status.
    pub measurement: Measurement,
    /// The caller should not reuse the connection.
    pub close_connection: bool,
}

/// The result of an exchange that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The full body was received and verified.
    Completed(Completed),
    /// The exchange was abandoned by fault injection.
    Aborted(FaultPoint),
}

/// One request to send.
#[derive(Clone, Debug)]
pub struct Exchange {
    /// Target URL.
    pub url: String,
    /// Requested response size.
    pub size: usize,
    /// Request id used for log correlation.
    pub trace_id: String,
    /// Id of the worker sending the request.
    pub worker: usize,
}

impl Exchange {
    /// Creates an exchange with a fresh request id.
    pub fn new<R: Rng + ?Sized>(worker: usize, url: String, size: usize, rng: &mut R) -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let suffix = Alphanumeric.sample_string(rng, 6);
        let trace_id = format!("{}-{worker}-{nanos}-{suffix}", headers::USER_AGENT_PREFIX);

        Self {
            url,
            size,
            trace_id,
            worker,
        }
    }
}

/// Builds the HTTP client used by one worker.
pub fn build_client(config: &ClientConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(config.conns)
        .build()
}

/// Incremental MD5 over the received body chunks.
struct ChecksumVerifier {
    expected: String,
    context: md5::Context,
}

impl ChecksumVerifier {
    fn from_headers(map: &HeaderMap) -> Option<Self> {
        let expected = map.get(headers::CONTENT_MD5)?.to_str().ok()?;
        Some(Self {
            expected: expected.trim().to_ascii_lowercase(),
            context: md5::Context::new(),
        })
    }

    fn update(&mut self, chunk: &[u8]) {
        self.context.consume(chunk);
    }

    /// Compares the digest with the advertised one, returning `(expected, computed)` on mismatch.
    fn finish(self, corrupt: bool) -> Result<(), (String, String)> {
        let mut computed = format!("{:x}", self.context.compute());
        if corrupt {
            let last = if computed.ends_with('0') { '1' } else { '0' };
            computed.pop();
            computed.push(last);
        }

        if computed == self.expected {
            Ok(())
        } else {
            Err((self.expected, computed))
        }
    }
}

/// Decides after every chunk whether a half-close aborts the read.
#[derive(Debug)]
enum HalfClose {
    Off,
    /// Abort once this many bytes have been read.
    AtLength(u64),
    /// Abort after each chunk with a fixed probability.
    Random,
}

impl HalfClose {
    fn new(enabled: bool, content_length: Option<u64>) -> Self {
        match (enabled, content_length) {
            (false, _) => HalfClose::Off,
            (true, Some(length)) => HalfClose::AtLength(length.div_ceil(2)),
            (true, None) => HalfClose::Random,
        }
    }

    /// Limits the next read so that a length-based abort point is hit exactly.
    fn read_limit(&self, read: u64) -> usize {
        match *self {
            HalfClose::AtLength(target) if read < target => {
                CHUNK_SIZE.min((target - read).try_into().unwrap_or(CHUNK_SIZE))
            }
            _ => CHUNK_SIZE,
        }
    }

    fn should_abort<R: Rng + ?Sized>(&self, read: u64, rng: &mut R) -> bool {
        match *self {
            HalfClose::Off => false,
            HalfClose::AtLength(target) => read >= target,
            HalfClose::Random => rng.random::<f64>() < UNKNOWN_LENGTH_ABORT_PROBABILITY,
        }
    }
}

/// Performs one exchange.
///
/// Returns an error for transport failures, statuses above 300, body read errors and checksum
/// mismatches. Deliberately abandoned exchanges are reported as [`Outcome::Aborted`].
pub async fn execute<R: Rng + ?Sized>(
    client: &reqwest::Client,
    config: &ClientConfig,
    exchange: &Exchange,
    plan: FaultPlan,
    rng: &mut R,
) -> Result<Outcome, DriverError> {
    let url = &exchange.url;

    let mut request = client
        .get(url)
        .header(headers::PRESS_SIZE, exchange.size)
        .header(config.request_id_header.as_str(), &exchange.trace_id)
        .header(
            header::USER_AGENT,
            format!("{}-{}", headers::USER_AGENT_PREFIX, exchange.worker),
        );
    if config.compression {
        request = request.header(header::ACCEPT_ENCODING, "br, gzip");
    }
    if let Some(ref host) = config.host_header {
        request = request.header(header::HOST, host);
    }

    let start = Instant::now();
    let response = request
        .send()
        .await
        .map_err(|source| DriverError::Transport {
            url: url.clone(),
            source,
        })?;
    let first_byte = start.elapsed();

    let status = response.status();
    if status.as_u16() > 300 {
        return Err(DriverError::Status {
            url: url.clone(),
            status,
        });
    }

    if plan.send_close {
        // Dropping the response without reading it tears down the connection.
        drop(response);
        return Ok(Outcome::Aborted(FaultPoint::SendClose));
    }

    let cache_hit = response
        .headers()
        .get(config.cache_indicator_header.as_str())
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains(headers::CACHE_HIT_MARKER));
    let mut verifier = config
        .verify_checksum
        .then(|| ChecksumVerifier::from_headers(response.headers()))
        .flatten();
    let half_close = HalfClose::new(plan.recv_half_close, response.content_length());

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    let mut reader = std::pin::pin!(StreamReader::new(stream));
    let mut buf = vec![0; CHUNK_SIZE];
    let mut read = 0u64;

    loop {
        let limit = half_close.read_limit(read);
        let n = reader
            .read(&mut buf[..limit])
            .await
            .map_err(|source| DriverError::Body {
                url: url.clone(),
                read,
                source,
            })?;
        if n == 0 {
            break;
        }

        read += n as u64;
        if let Some(ref mut verifier) = verifier {
            verifier.update(&buf[..n]);
        }

        if half_close.should_abort(read, rng) {
            return Ok(Outcome::Aborted(FaultPoint::RecvHalfClose { read }));
        }
    }
    let full_response = start.elapsed();

    if let Some(verifier) = verifier
        && let Err((expected, computed)) = verifier.finish(config.corrupt_checksum)
    {
        return Err(DriverError::ChecksumMismatch {
            url: url.clone(),
            expected,
            computed,
        });
    }

    Ok(Outcome::Completed(Completed {
        bytes: read,
        measurement: Measurement {
            first_byte,
            full_response,
            cache_hit,
        },
        close_connection: plan.recv_full_close,
    }))
}
