//! Test utilities for the load generator and the response server.
//!
//! This crate provides utilities to facilitate testing of `cdnpress` components. See the modules
//! for all available utilities.

pub mod server;
pub mod tracing;
