//! Module implementing the response server.
//!
//! The server application is implemented in the [`App`] struct, which sets up routing and
//! middleware and runs its own accept loop. Connections are served individually so that a
//! response can close the connection it was sent on, see [`ConnectionControl`].
//!
//! To listen to incoming connections, use the [`server()`] function, which opens a TCP listener and
//! serves the application until a termination signal arrives.
//!
//! # Testing
//!
//! For end-to-end tests of the server, see the `cdnpress-test` crate, which provides utilities to
//! start a test server in-process.

mod app;
mod connection;
mod middleware;
mod server;

pub use app::App;
pub use connection::ConnectionControl;
pub use server::server;
