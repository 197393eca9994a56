//! Echo-style response server for cache and CDN load tests.
//!
//! The server answers every request with a synthetic body whose size is chosen by the client, see
//! [`handler`]. Bodies can be cached, compressed, checksummed, delayed, sliced by range requests,
//! and followed by a server-initiated connection close. Every exchange is logged with its timings.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod body;
pub mod cache;
pub mod config;
pub mod encoding;
pub mod endpoints;
pub mod error;
pub mod handler;
pub mod range;
pub mod state;
pub mod web;

pub use config::{DelayProfile, ServerConfig};
