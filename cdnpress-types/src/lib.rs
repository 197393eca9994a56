//! Types shared between the `cdnpress` load generator and its response server.
//!
//! Both sides speak a small header-driven wire contract, see [`headers`]. The response size
//! distribution requested by the client is described by a [`SizeSpec`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod headers;
pub mod size;

pub use size::{SizeSpec, SizeSpecError};

/// Response size used by the server when the request does not specify a valid one.
pub const DEFAULT_RESPONSE_SIZE: usize = 1024;

/// The byte synthetic response bodies are filled with.
pub const FILLER_BYTE: u8 = b'x';
