//! Configuration for both the load generator and the response server.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags of the `server` and `client` subcommands
//! 2. Environment variables (prefixed with `CP__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! See [`Config`] for a description of all configuration sections.
//!
//! # Environment Variables
//!
//! Environment variables use `CP__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `CP__SERVER__HTTP_ADDR=0.0.0.0:8080` sets the response server address
//! - `CP__CLIENT__HIT_RATIO=0.8` sets the targeted cache hit ratio
//! - `CP__CLIENT__FAULTS__SEND_CLOSE=0.01` enables a fault injection point
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! server:
//!   http_addr: 0.0.0.0:8080
//!
//! client:
//!   hit_ratio: 0.8
//!   faults:
//!     send_close: 0.01
//! ```

use std::fmt;
use std::path::Path;

use anyhow::Result;
use cdnpress_client::ClientConfig;
use cdnpress_server::ServerConfig;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "CP__";

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads of the runtime driving workers or connections.
    ///
    /// Defaults to the available parallelism of the host.
    ///
    /// # Environment Variable
    ///
    /// `CP__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// [Sentry](https://sentry.io/) error reporting configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN. When `None`, the integration is disabled.
    ///
    /// # Environment Variable
    ///
    /// `CP__SENTRY__DSN`
    pub dsn: Option<String>,

    /// Environment name reported with every event.
    ///
    /// # Environment Variable
    ///
    /// `CP__SENTRY__ENVIRONMENT`
    pub environment: Option<String>,

    /// Error event sampling rate. Defaults to `1.0`.
    ///
    /// # Environment Variable
    ///
    /// `CP__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,

    /// Performance trace sampling rate of the response server. Defaults to `0.01`.
    ///
    /// # Environment Variable
    ///
    /// `CP__SENTRY__TRACES_SAMPLE_RATE`
    pub traces_sample_rate: f32,

    /// Enable Sentry SDK debug output on stderr.
    ///
    /// # Environment Variable
    ///
    /// `CP__SENTRY__DEBUG`
    pub debug: bool,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO cdnpress_server::web: HTTP server listening on 0.0.0.0:8080
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z INFO cdnpress_server::web: HTTP server listening on 0.0.0.0:8080
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2020-12-04T12:11:08.729716Z","level":"INFO","fields":{"message":"HTTP server listening on 0.0.0.0:8080"},"target":"cdnpress_server::web"}
    /// ```
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr. Reports and summaries of the load generator go to stdout.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output. Defaults to `INFO`.
    ///
    /// The `RUST_LOG` environment variable takes precedence if set.
    ///
    /// # Environment Variable
    ///
    /// `CP__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. Defaults to [`LogFormat::Auto`].
    ///
    /// # Environment Variable
    ///
    /// `CP__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Configuration of the `cdnpress` binary.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: Logging,
    /// Sentry error reporting.
    pub sentry: Sentry,
    /// Async runtime configuration.
    pub runtime: Runtime,
    /// Response server configuration, used by the `server` command.
    pub server: ServerConfig,
    /// Load generator configuration, used by the `client` command.
    pub client: ClientConfig,
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if environment variables
    /// contain invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_overrides(path, &Overrides::default())
    }

    /// Loads configuration like [`load`](Self::load) and applies command line overrides last.
    pub fn load_with_overrides(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        Ok(config)
    }
}

/// Partial configuration set from command line flags.
///
/// Only fields that are `Some` override the other configuration sources.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientOverrides>,
}

/// Command line overrides of [`ServerConfig`].
#[derive(Debug, Default, Serialize)]
pub struct ServerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_responses: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<bool>,
    pub header_delay: DelayOverrides,
    pub body_delay: DelayOverrides,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_after_body_probability: Option<f64>,
}

/// Command line overrides of a [`DelayProfile`](cdnpress_server::DelayProfile).
///
/// Values are humantime strings such as `150ms`.
#[derive(Debug, Default, Serialize)]
pub struct DelayOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<String>,
}

/// Command line overrides of [`ClientConfig`].
///
/// Durations are humantime strings such as `30s`.
#[derive(Debug, Default, Serialize)]
pub struct ClientOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conns: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker_dump: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defer_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_errors: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_checksum: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,
    pub faults: FaultOverrides,
}

/// Command line overrides of the client fault injection probabilities.
#[derive(Debug, Default, Serialize)]
pub struct FaultOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_half_close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_full_close: Option<f64>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cdnpress_types::SizeSpec;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.server, ServerConfig::default());
            assert_eq!(config.client, ClientConfig::default());
            assert!(!config.sentry.is_enabled());
            assert_eq!(config.logging.level, LevelFilter::INFO);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CP__SERVER__HTTP_ADDR", "127.0.0.1:9090");
            jail.set_env("CP__SERVER__BODY_DELAY__DELAY", "150ms");
            jail.set_env("CP__CLIENT__HIT_RATIO", "0.8");
            jail.set_env("CP__CLIENT__RESP_SIZE", "[100,2000]");
            jail.set_env("CP__CLIENT__DURATION", "2m");
            jail.set_env("CP__CLIENT__FAULTS__SEND_CLOSE", "0.01");
            jail.set_env("CP__LOGGING__FORMAT", "json");
            jail.set_env("CP__SENTRY__DSN", "abcde");

            let config = Config::load(None).unwrap();

            assert_eq!(config.server.http_addr, "127.0.0.1:9090".parse().unwrap());
            assert_eq!(config.server.body_delay.delay, Duration::from_millis(150));
            assert_eq!(config.client.hit_ratio, 0.8);
            assert_eq!(
                config.client.resp_size,
                SizeSpec::Split {
                    min: 100,
                    max: 2000
                }
            );
            assert_eq!(config.client.duration, Duration::from_secs(120));
            assert_eq!(config.client.faults.send_close, 0.01);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.sentry.dsn.as_deref(), Some("abcde"));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yml",
                r#"
                server:
                    cache_responses: true
                    keep_alive_probability: 0.5
                    header_delay:
                        delay: 10ms
                        jitter: 5ms
                client:
                    addr: edge.example.com:80
                    conns: 32
                    resp_size: 4096
                "#,
            )?;

            let config = Config::load(Some(Path::new("config.yml"))).unwrap();

            assert!(config.server.cache_responses);
            assert_eq!(config.server.keep_alive_probability, 0.5);
            assert_eq!(config.server.header_delay.jitter, Duration::from_millis(5));
            assert_eq!(config.client.addr.as_deref(), Some("edge.example.com:80"));
            assert_eq!(config.client.conns, 32);
            assert_eq!(config.client.resp_size, SizeSpec::Fixed(4096));

            Ok(())
        });
    }

    #[test]
    fn overrides_take_precedence() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yml", "client:\n  qps: 10\n  conns: 2\n")?;
            jail.set_env("CP__CLIENT__QPS", "20");
            jail.set_env("CP__CLIENT__URL_COUNT", "50");

            let overrides = Overrides {
                client: Some(ClientOverrides {
                    qps: Some(30),
                    faults: FaultOverrides {
                        recv_half_close: Some(0.2),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                server: Some(ServerOverrides {
                    body_delay: DelayOverrides {
                        jitter: Some("20ms".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
            };
            let config =
                Config::load_with_overrides(Some(Path::new("config.yml")), &overrides).unwrap();

            assert_eq!(config.client.qps, 30);
            assert_eq!(config.client.conns, 2);
            assert_eq!(config.client.url_count, 50);
            assert_eq!(config.client.faults.recv_half_close, 0.2);
            assert_eq!(config.client.faults.send_close, 0.0);
            assert_eq!(config.server.body_delay.jitter, Duration::from_millis(20));
            assert_eq!(config.server.body_delay.delay, Duration::ZERO);

            Ok(())
        });
    }

    #[test]
    fn invalid_size_is_an_error() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CP__CLIENT__RESP_SIZE", "[2000,100]");
            assert!(Config::load(None).is_err());
            Ok(())
        });
    }
}
