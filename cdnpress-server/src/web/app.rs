use std::time::Duration;

use anyhow::Result;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::endpoints;
use crate::state::ServerState;
use crate::web::connection::serve_connection;
use crate::web::middleware as m;

/// Pause before accepting again after the listener failed, for example when out of file
/// descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The response server application.
#[derive(Debug)]
pub struct App {
    router: axum::Router,
    graceful_shutdown: bool,
}

impl App {
    /// Creates the application router for the given server state.
    ///
    /// Use [`serve`](Self::serve) to run the server future.
    pub fn new(state: ServerState) -> Self {
        Self::with_router(endpoints::routes().with_state(state))
    }

    /// Wraps a custom router with the server middleware.
    ///
    /// Used to serve handlers that misbehave on purpose, for example in tests.
    pub fn with_router(router: axum::Router) -> Self {
        // Build the router middleware into a single service which runs _after_ routing. Service
        // builder order defines layers added first will be called first. This means:
        //  - Requests go from top to bottom
        //  - Responses go from bottom to top
        let middleware = ServiceBuilder::new()
            .layer(CatchPanicLayer::custom(m::handle_panic))
            .layer(m::set_server_header())
            .layer(NewSentryLayer::new_from_top())
            .layer(SentryHttpLayer::new().enable_transaction())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(m::make_http_span)
                    .on_failure(DefaultOnFailure::new().level(Level::DEBUG)),
            );

        App {
            router: router.layer(middleware),
            graceful_shutdown: false,
        }
    }

    /// Enables or disables graceful shutdown for the server.
    ///
    /// By default, graceful shutdown is disabled.
    pub fn graceful_shutdown(mut self, enable: bool) -> Self {
        self.graceful_shutdown = enable;
        self
    }

    /// Runs the web server until graceful shutdown is triggered.
    ///
    /// Every accepted connection is served on its own task, so that request handlers can close
    /// their connection through [`ConnectionControl`](super::ConnectionControl). On shutdown, the
    /// listener is closed and in-flight responses are completed before this returns.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let Self {
            router,
            graceful_shutdown,
        } = self;

        let guard = if graceful_shutdown {
            Some(elegant_departure::get_shutdown_guard())
        } else {
            None
        };
        let shutdown = async {
            match guard {
                Some(ref guard) => guard.wait().await,
                None => std::future::pending().await,
            }
        };
        let mut shutdown = std::pin::pin!(shutdown);

        let stop = CancellationToken::new();
        let connections = TaskTracker::new();

        loop {
            let (stream, remote) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        tracing::warn!(
                            error = &error as &dyn std::error::Error,
                            "failed to accept connection"
                        );
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            connections.spawn(serve_connection(
                stream,
                remote,
                router.clone(),
                stop.child_token(),
            ));
        }

        drop(listener);
        stop.cancel();
        connections.close();
        connections.wait().await;

        Ok(())
    }
}
