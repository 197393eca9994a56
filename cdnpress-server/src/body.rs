//! Streaming response bodies that log the exchange once they are done.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::Stream;
use tokio::time::Sleep;

use crate::web::ConnectionControl;

/// Size of the chunks a body is handed to the connection in.
const CHUNK_SIZE: usize = 64 * 1024;

/// Request details logged once the response body is done.
#[derive(Debug)]
pub struct ExchangeLog {
    /// Value of the request id header, or `unknown`.
    pub trace_id: String,
    /// Requested host.
    pub host: String,
    /// Requested path and query.
    pub path: String,
    /// Request method.
    pub method: String,
    /// Declared length of the request body.
    pub content_length: Option<u64>,
    /// When the request arrived at the handler.
    pub start: DateTime<Utc>,
}

/// A response body stream that records its progress.
///
/// The first chunk is held back by the body delay. When the last chunk has been handed out, the
/// body optionally asks the connection to close. The exchange is logged when the body is dropped,
/// which also covers clients that disconnect mid-body.
pub struct TrackedBody {
    delay: Option<Pin<Box<Sleep>>>,
    remaining: Bytes,
    sent: u64,
    header_sent: Option<DateTime<Utc>>,
    body_complete: Option<DateTime<Utc>>,
    close: Option<ConnectionControl>,
    log: ExchangeLog,
}

impl TrackedBody {
    /// Creates a body stream for `payload`.
    ///
    /// If `close` is given, the connection is closed after the complete body was handed out.
    pub fn new(
        payload: Bytes,
        delay: Duration,
        close: Option<ConnectionControl>,
        log: ExchangeLog,
    ) -> Self {
        let delay = (!delay.is_zero()).then(|| Box::pin(tokio::time::sleep(delay)));
        Self {
            delay,
            remaining: payload,
            sent: 0,
            header_sent: None,
            body_complete: None,
            close,
            log,
        }
    }

    fn complete(&mut self) {
        if self.body_complete.is_some() {
            return;
        }

        self.body_complete = Some(Utc::now());
        if let Some(control) = self.close.take() {
            control.close_after_response();
        }
    }
}

impl fmt::Debug for TrackedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedBody")
            .field("remaining", &self.remaining.len())
            .field("sent", &self.sent)
            .field("log", &self.log)
            .finish()
    }
}

impl Stream for TrackedBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.header_sent.get_or_insert_with(Utc::now);

        if let Some(delay) = this.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            this.delay = None;
        }

        if this.remaining.is_empty() {
            this.complete();
            return Poll::Ready(None);
        }

        let chunk = this
            .remaining
            .split_to(this.remaining.len().min(CHUNK_SIZE));
        this.sent += chunk.len() as u64;
        // The connection may stop polling once it has written the declared length.
        if this.remaining.is_empty() {
            this.complete();
        }

        Poll::Ready(Some(Ok(chunk)))
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        // Empty bodies are never polled.
        if self.remaining.is_empty() {
            self.complete();
        }

        let header_sent = self.header_sent.unwrap_or(self.log.start);
        let body_complete = self
            .body_complete
            .map_or_else(|| "-".to_owned(), timestamp);
        tracing::info!(
            trace_id = %self.log.trace_id,
            host = %self.log.host,
            path = %self.log.path,
            method = %self.log.method,
            content_length = ?self.log.content_length,
            start = %timestamp(self.log.start),
            header_sent = %timestamp(header_sent),
            body_complete = %body_complete,
            bytes = self.sent,
            complete = self.body_complete.is_some(),
            "response finished"
        );
    }
}

fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
