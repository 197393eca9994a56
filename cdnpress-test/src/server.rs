//! Exposes an in-process response server for use in integration tests.
//!
//! ```
//! use cdnpress_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/path0.js");
//!    // use the URL in tests...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};

use cdnpress_server::config::ServerConfig;
use cdnpress_server::state::State;
use cdnpress_server::web::App;

/// An in-process response server for use in integration tests.
///
/// The server listens on a random available port on localhost and is stopped when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl TestServer {
    /// Starts a server with checksums enabled and otherwise default configuration.
    pub async fn new() -> Self {
        Self::with_config(ServerConfig {
            checksum: true,
            ..Default::default()
        })
        .await
    }

    /// Starts a server with the given configuration. The listen address is ignored.
    pub async fn with_config(config: ServerConfig) -> Self {
        let state = State::new(config).unwrap();
        Self::start(App::new(state))
    }

    /// Serves a custom router behind the server middleware and connection handling.
    pub async fn with_router(router: axum::Router) -> Self {
        Self::start(App::with_router(router))
    }

    fn start(app: App) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            app.serve(listener).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the `host:port` address the server listens on.
    pub fn addr(&self) -> String {
        format!("localhost:{}", self.socket.port())
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
