//! Error types of the response handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// A response could not be produced.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Compressing the body failed.
    #[error("failed to encode response body: {0}")]
    Encode(#[from] std::io::Error),
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        tracing::error!(
            error = &self as &dyn std::error::Error,
            "error handling request"
        );
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}
