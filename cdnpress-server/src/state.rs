//! State shared by request handlers.

use std::sync::Arc;

use crate::cache::BodyCache;
use crate::config::{ConfigError, ServerConfig};

/// Shared reference to the server [state](State).
pub type ServerState = Arc<State>;

/// State shared by all request handlers.
///
/// In request handlers, use `axum::extract::State<ServerState>` to retrieve it.
#[derive(Debug)]
pub struct State {
    /// The server configuration.
    pub config: ServerConfig,
    /// Generated response bodies.
    pub bodies: BodyCache,
}

impl State {
    /// Validates the configuration and creates the shared state.
    pub fn new(config: ServerConfig) -> Result<ServerState, ConfigError> {
        config.validate()?;
        let bodies = BodyCache::new(config.cache_responses);
        Ok(Arc::new(Self { config, bodies }))
    }
}
