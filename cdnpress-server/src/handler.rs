//! The echo handler answering every request with a synthetic body.
//!
//! The response is shaped by request headers and server configuration:
//!
//! - the body size comes from the size header, falling back to the configured default,
//! - a single byte range selects a slice of the body and disables compression,
//! - brotli or gzip is negotiated from `Accept-Encoding`,
//! - delays are applied before the head and before the first body chunk,
//! - the connection is randomly kept alive, and randomly closed once the body is complete.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use cdnpress_types::headers;
use chrono::Utc;
use rand::Rng;

use crate::body::{ExchangeLog, TrackedBody};
use crate::encoding::ContentCoding;
use crate::error::HandlerError;
use crate::range::ByteRange;
use crate::state::ServerState;
use crate::web::ConnectionControl;

/// Answers any request with a generated body.
pub async fn respond(
    State(state): State<ServerState>,
    request: Request,
) -> Result<Response, HandlerError> {
    let start = Utc::now();
    let config = &state.config;

    let header_delay = config.header_delay.sample(&mut rand::rng());
    if !header_delay.is_zero() {
        tokio::time::sleep(header_delay).await;
    }

    let request_headers = request.headers();
    let size = match requested_size(request_headers) {
        Some(size) if size > config.max_size => {
            tracing::debug!(requested = size, max = config.max_size, "clamping body size");
            config.max_size
        }
        Some(size) => size,
        None => config.default_size,
    };
    let log = ExchangeLog {
        trace_id: header_str(request_headers, &config.request_id_header)
            .unwrap_or("unknown")
            .to_owned(),
        host: header_str(request_headers, header::HOST.as_str())
            .or_else(|| request.uri().host())
            .unwrap_or_default()
            .to_owned(),
        path: request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path().to_owned(), |p| p.to_string()),
        method: request.method().to_string(),
        content_length: header_str(request_headers, header::CONTENT_LENGTH.as_str())
            .and_then(|value| value.parse().ok()),
        start,
    };

    let range = header_str(request_headers, header::RANGE.as_str())
        .and_then(|value| ByteRange::parse(value, size));
    let coding = match range {
        Some(_) => ContentCoding::Identity,
        None if config.compression => {
            ContentCoding::negotiate(header_str(request_headers, header::ACCEPT_ENCODING.as_str()))
        }
        None => ContentCoding::Identity,
    };
    let control = request.extensions().get::<ConnectionControl>().cloned();

    let body = state.bodies.get(size);
    let payload = match range {
        Some(range) => body.slice(range.as_range()),
        None => coding.encode(body).await?,
    };

    let (keep_alive, close_after_body, body_delay) = {
        let mut rng = rand::rng();
        (
            rng.random::<f64>() < config.keep_alive_probability,
            rng.random::<f64>() < config.close_after_body_probability,
            config.body_delay.sample(&mut rng),
        )
    };

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, payload.len())
        .header(
            header::CONNECTION,
            if keep_alive { "keep-alive" } else { "close" },
        );

    if let Some(range) = range {
        response = response
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, range.content_range(size));
    }
    if coding != ContentCoding::Identity {
        response = response
            .header(header::VARY, HeaderValue::from_static("Accept-Encoding"))
            .header(header::CONTENT_ENCODING, coding.as_str());
    }
    if config.checksum {
        let digest = format!("{:x}", md5::compute(&payload));
        response = response.header(headers::CONTENT_MD5, digest);
    }

    let close = close_after_body.then_some(control).flatten();
    let body = TrackedBody::new(payload, body_delay, close, log);

    Ok(response
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

/// Reads the requested body size, ignoring missing and malformed values.
fn requested_size(map: &HeaderMap) -> Option<usize> {
    header_str(map, headers::PRESS_SIZE)?.trim().parse().ok()
}

fn header_str<'a>(map: &'a HeaderMap, name: &str) -> Option<&'a str> {
    map.get(name)?.to_str().ok()
}
