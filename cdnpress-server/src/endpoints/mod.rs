//! Contains all HTTP endpoint handlers.
//!
//! Use [`routes`] to create a router with all endpoints.

use axum::Router;

use crate::handler;
use crate::state::ServerState;

pub mod health;

/// Creates the router. Every path without a dedicated endpoint is answered by the echo handler.
pub fn routes() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .fallback(handler::respond)
}
