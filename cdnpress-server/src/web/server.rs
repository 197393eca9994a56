use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal::unix::SignalKind;

use crate::config::ServerConfig;
use crate::state::State;
use crate::web::app::App;

/// The maximum backlog for TCP listen sockets before refusing connections.
const TCP_LISTEN_BACKLOG: u32 = 1024;

/// Runs the response server until a termination signal arrives.
///
/// The configuration is validated before binding, and the effective response settings are logged
/// once at startup.
pub async fn server(config: ServerConfig) -> Result<()> {
    let state = State::new(config)?;
    log_settings(&state.config);

    let listener = listen(state.config.http_addr).context("failed to start TCP listener")?;
    let app = App::new(state).graceful_shutdown(true);
    let accept_loop = tokio::spawn(app.serve(listener));

    tokio::spawn(async {
        elegant_departure::get_shutdown_guard().wait().await;
        tracing::info!("draining open connections");
    });

    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit())
        .await;

    let result = match accept_loop.await {
        Ok(result) => result,
        Err(error) => Err(error.into()),
    };
    tracing::info!("response server stopped");
    result
}

fn log_settings(config: &ServerConfig) {
    tracing::info!(
        default_size = config.default_size,
        max_size = config.max_size,
        cache_responses = config.cache_responses,
        compression = config.compression,
        checksum = config.checksum,
        keep_alive_probability = config.keep_alive_probability,
        close_after_body_probability = config.close_after_body_probability,
        header_delay = ?config.header_delay,
        body_delay = ?config.body_delay,
        "starting response server"
    );
}

fn listen(addr: SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;

    let listener = socket.listen(TCP_LISTEN_BACKLOG)?;
    tracing::info!("HTTP server listening on {addr}");

    Ok(listener)
}
