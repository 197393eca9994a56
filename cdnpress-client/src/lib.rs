//! Synthetic HTTP load generator for CDN and cache testing.
//!
//! The generator runs a fixed number of workers that request synthetic URLs from a target at a
//! shared, rate limited pace. The URL mix is tuned to produce a configurable cache hit ratio, the
//! requested response sizes are drawn from a [`SizeSpec`](cdnpress_types::SizeSpec), and faults
//! can be injected on the client side of every exchange. Latencies are aggregated per reporting
//! window and summarized at the end of the run.
//!
//! Use [`run`] to drive a complete run from a [`ClientConfig`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod allocator;
pub mod config;
pub mod driver;
pub mod error;
pub mod gate;
pub mod limiter;
mod run;
pub mod stats;
mod worker;

pub use config::{ClientConfig, ConfigError, FaultProbabilities};
pub use error::{DriverError, RunError};
pub use run::run;
pub use stats::Summary;
