//! Command line entry point of `cdnpress`.
//!
//! The binary runs either the response server from [`cdnpress_server`] or the load generator
//! from [`cdnpress_client`], configured through [`config::Config`].

pub mod cli;
pub mod config;
pub mod observability;
