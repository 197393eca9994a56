use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use cdnpress_types::SizeSpec;
use tokio_util::sync::CancellationToken;

use crate::config::{
    ClientOverrides, Config, DelayOverrides, FaultOverrides, Overrides, ServerOverrides,
};
use crate::observability;

/// Synthetic HTTP load generator and response server for CDN testing.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Server(ServerCommand),
    Client(ClientCommand),
    Version(VersionCommand),
}

/// run the response server
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "server")]
struct ServerCommand {
    /// port to listen on, on all interfaces
    #[argh(option)]
    port: Option<u16>,

    /// largest body size served, larger requests are clamped
    #[argh(option)]
    max_resp_size: Option<usize>,

    /// reuse generated bodies across requests of the same size
    #[argh(switch)]
    cache_resp: bool,

    /// compress responses the client accepts encodings for
    #[argh(option)]
    compress: Option<bool>,

    /// send the md5 of every body in a response header
    #[argh(switch)]
    enable_md5: bool,

    /// base delay before sending response headers, in milliseconds
    #[argh(option)]
    delay_resp_hdr: Option<u64>,

    /// maximum random delay added to the header delay, in milliseconds
    #[argh(option)]
    delay_resp_hdr_random: Option<u64>,

    /// base delay before sending the response body, in milliseconds
    #[argh(option)]
    delay_resp_body: Option<u64>,

    /// maximum random delay added to the body delay, in milliseconds
    #[argh(option)]
    delay_resp_body_random: Option<u64>,

    /// probability of answering with `Connection: keep-alive`
    #[argh(option)]
    keep_alive_prob: Option<f64>,

    /// probability of closing the connection after the body was sent
    #[argh(option)]
    close_conn_after_body_prob: Option<f64>,
}

/// run the load generator
#[derive(Debug, Default, FromArgs)]
#[argh(subcommand, name = "client")]
struct ClientCommand {
    /// target `host:port`, takes precedence over host and port
    #[argh(option)]
    addr: Option<String>,

    /// target host; with `--addr`, sent as the `Host` header instead
    #[argh(option)]
    host: Option<String>,

    /// explicit `Host` header, e.g. a virtual host served by a CDN edge
    #[argh(option)]
    host_header: Option<String>,

    /// target port
    #[argh(option)]
    port: Option<u16>,

    /// number of concurrent connections
    #[argh(option)]
    conns: Option<usize>,

    /// total requests per second across all connections
    #[argh(option)]
    qps: Option<u32>,

    /// length of the run, e.g. `30s` or `5m`
    #[argh(option)]
    duration: Option<String>,

    /// interval between periodic reports, e.g. `5s`
    #[argh(option)]
    ticker_dump: Option<String>,

    /// delay before the first request, e.g. `10s`
    #[argh(option)]
    defer_start: Option<String>,

    /// response size, either `N` or `[min,max]`
    #[argh(option)]
    resp_size: Option<SizeSpec>,

    /// probability of picking the lower bound of a size range
    #[argh(option)]
    disk_ratio: Option<f64>,

    /// targeted share of requests to previously requested URLs
    #[argh(option)]
    hit_ratio: Option<f64>,

    /// number of distinct URLs in the hot set
    #[argh(option)]
    url_count: Option<u64>,

    /// keep running after failed exchanges
    #[argh(switch)]
    ignore_err: bool,

    /// probability of closing the connection right after sending a request
    #[argh(option)]
    send_close: Option<f64>,

    /// probability of closing the connection after reading half of a body
    #[argh(option)]
    recv_half_close: Option<f64>,

    /// probability of reconnecting after a complete response
    #[argh(option)]
    recv_full_close: Option<f64>,

    /// verify bodies against the server's md5 header
    #[argh(option)]
    verify_md5: Option<bool>,

    /// ask for compressed responses
    #[argh(switch)]
    compress: bool,
}

/// print the cdnpress version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

fn millis(ms: Option<u64>) -> Option<String> {
    ms.map(|ms| format!("{ms}ms"))
}

impl ServerCommand {
    fn overrides(&self) -> Overrides {
        let server = ServerOverrides {
            http_addr: self.port.map(|port| format!("0.0.0.0:{port}")),
            max_size: self.max_resp_size,
            cache_responses: self.cache_resp.then_some(true),
            compression: self.compress,
            checksum: self.enable_md5.then_some(true),
            header_delay: DelayOverrides {
                delay: millis(self.delay_resp_hdr),
                jitter: millis(self.delay_resp_hdr_random),
            },
            body_delay: DelayOverrides {
                delay: millis(self.delay_resp_body),
                jitter: millis(self.delay_resp_body_random),
            },
            keep_alive_probability: self.keep_alive_prob,
            close_after_body_probability: self.close_conn_after_body_prob,
        };

        Overrides {
            server: Some(server),
            client: None,
        }
    }
}

impl ClientCommand {
    fn overrides(&self) -> Overrides {
        let client = ClientOverrides {
            addr: self.addr.clone(),
            host: self.host.clone(),
            host_header: self
                .host_header
                .clone()
                .or_else(|| self.addr.as_ref().and(self.host.clone())),
            port: self.port,
            conns: self.conns,
            qps: self.qps,
            duration: self.duration.clone(),
            ticker_dump: self.ticker_dump.clone(),
            defer_start: self.defer_start.clone(),
            resp_size: self.resp_size.map(|size| size.to_string()),
            disk_ratio: self.disk_ratio,
            hit_ratio: self.hit_ratio,
            url_count: self.url_count,
            ignore_errors: self.ignore_err.then_some(true),
            verify_checksum: self.verify_md5,
            compression: self.compress.then_some(true),
            faults: FaultOverrides {
                send_close: self.send_close,
                recv_half_close: self.recv_half_close,
                recv_full_close: self.recv_full_close,
            },
        };

        Overrides {
            server: None,
            client: Some(client),
        }
    }
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let overrides = match &args.command {
        Command::Version(_) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Server(command) => command.overrides(),
        Command::Client(command) => command.overrides(),
    };

    let config = Config::load_with_overrides(args.config.as_deref(), &overrides)?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Server(_) => cdnpress_server::web::server(config.server).await,
            Command::Client(_) => run_client(config).await,
            Command::Version(_) => unreachable!(),
        }
    })
}

async fn run_client(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping workers");
                cancel.cancel();
            }
        }
    });

    cdnpress_client::run(config.client, cancel).await?;
    Ok(())
}
