//! Liveness endpoint.

use axum::response::IntoResponse;
use axum::{Router, routing};

use crate::state::ServerState;

/// Routes for liveness checks.
pub fn router() -> Router<ServerState> {
    Router::new().route("/health", routing::get(health))
}

async fn health() -> impl IntoResponse {
    "OK"
}
