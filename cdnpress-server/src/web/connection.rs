//! Serving a single HTTP/1.1 connection with server-initiated close.

use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Lets a request handler close the connection it arrived on.
///
/// Every request served by [`App`](super::App) carries this as a request extension. After
/// [`close_after_response`](Self::close_after_response), the connection finishes writing the
/// current response and is then closed instead of waiting for the next request.
#[derive(Clone, Debug, Default)]
pub struct ConnectionControl {
    close: Arc<Notify>,
}

impl ConnectionControl {
    /// Requests the connection to be closed once the in-flight response is written.
    pub fn close_after_response(&self) {
        self.close.notify_one();
    }

    pub(crate) async fn closed(&self) {
        self.close.notified().await;
    }
}

/// Serves requests on `stream` until the peer goes away, a handler closes the connection or the
/// server stops.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    router: Router,
    stop: CancellationToken,
) {
    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!(
            error = &error as &dyn std::error::Error,
            "failed to set TCP_NODELAY"
        );
    }

    let control = ConnectionControl::default();
    let service = {
        let control = control.clone();
        router.map_request(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(control.clone());
            request.extensions_mut().insert(ConnectInfo(remote));
            request
        })
    };

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service));
    let mut conn = pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            log_result(remote, result);
            return;
        }
        _ = control.closed() => tracing::trace!(%remote, "closing connection after response"),
        _ = stop.cancelled() => {}
    }

    conn.as_mut().graceful_shutdown();
    log_result(remote, conn.await);
}

fn log_result(remote: SocketAddr, result: hyper::Result<()>) {
    if let Err(error) = result {
        tracing::debug!(
            error = &error as &dyn std::error::Error,
            %remote,
            "connection closed with error"
        );
    }
}
