//! # Configuration
//!
//! Operator configuration, resolved once at startup and immutable afterwards.
//!
//! Every setting comes from a command line flag, its `MUSA_*` environment
//! variable, or a compiled default, in that order of precedence. Only type
//! coercion is validated here (a port must be a `u16`, a bootstrap peer a
//! multiaddr); absent telemetry settings are a valid configuration.
//!
//! ## Security Requirements
//!
//! - The private key is never part of any diagnostic output: both `Debug`
//!   and [`Config::redacted`] blank it.

use std::fmt;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use libp2p::Multiaddr;
use musa_telemetry::{Endpoint, LogFormat, TelemetryConfig};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::Level;

/// Protocol id of the public IPFS DHT.
pub const IPFS_PROTOCOL: &str = "/ipfs/kad/1.0.0";

/// Default per-query DHT timeout, in seconds.
pub const DEFAULT_BOOTSTRAP_TIMEOUT_SECS: u64 = 60;

/// Command line of the `musa` binary.
#[derive(Debug, Parser)]
#[command(
    name = "musa",
    version,
    about = "a lean bootstrapper process for any network"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

/// Subcommands. Without one, `musa` runs the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Generate a private key for --private-key and exit
    Keygen,
}

/// Malformed flag or environment value.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] clap::Error);

impl ConfigError {
    /// Print clap's usage message and exit with its status code.
    pub fn exit(&self) -> ! {
        self.0.exit()
    }
}

impl Cli {
    /// Resolve the process command line and environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(std::env::args_os())
    }

    /// Resolve an explicit argument list; the environment still applies.
    pub fn resolve_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::try_parse_from(args)?)
    }
}

/// The daemon configuration.
#[derive(Clone, Args, Serialize)]
pub struct Config {
    /// the network musa should bind on
    #[arg(long, env = "MUSA_HOST", default_value_t = Ipv4Addr::LOCALHOST)]
    pub host: Ipv4Addr,

    /// the port on which musa should listen on [default: random]
    #[arg(long, env = "MUSA_PORT", default_value_t = 0, hide_default_value = true)]
    pub port: u16,

    /// base64 private key identity for the libp2p host
    #[arg(long = "private-key", env = "MUSA_PRIVATE_KEY", hide_env_values = true)]
    #[serde(serialize_with = "redact")]
    pub private_key: Option<String>,

    /// the libp2p protocol for the DHT
    #[arg(long, env = "MUSA_PROTOCOL", default_value = IPFS_PROTOCOL)]
    pub protocol: String,

    /// the network musa metrics should bind on
    #[arg(long, env = "MUSA_METRICS_HOST")]
    pub metrics_host: Option<String>,

    /// the port on which musa metrics should listen on
    #[arg(long, env = "MUSA_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// the network musa trace should be pushed to
    #[arg(long, env = "MUSA_TRACE_HOST")]
    pub trace_host: Option<String>,

    /// the grpc otlp port to which musa should push traces to
    #[arg(long, env = "MUSA_TRACE_PORT")]
    pub trace_port: Option<u16>,

    /// the structured log level (trace, debug, info, warn, error)
    #[arg(long, env = "MUSA_LOG_LEVEL", default_value_t = Level::INFO)]
    #[serde(serialize_with = "display")]
    pub log_level: Level,

    /// the structured log format (text, json)
    #[arg(long, env = "MUSA_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// DHT entry peer, ending in /p2p/<peer-id> [default: public IPFS bootstrappers]
    #[arg(
        long = "bootstrap-peer",
        env = "MUSA_BOOTSTRAP_PEERS",
        value_delimiter = ','
    )]
    #[serde(serialize_with = "display_seq")]
    pub bootstrap_peers: Vec<Multiaddr>,

    /// timeout of a single DHT query, bootstrap included
    #[arg(
        long = "bootstrap-timeout",
        env = "MUSA_BOOTSTRAP_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = DEFAULT_BOOTSTRAP_TIMEOUT_SECS
    )]
    pub bootstrap_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            port: 0,
            private_key: None,
            protocol: IPFS_PROTOCOL.to_string(),
            metrics_host: None,
            metrics_port: None,
            trace_host: None,
            trace_port: None,
            log_level: Level::INFO,
            log_format: LogFormat::Text,
            bootstrap_peers: Vec::new(),
            bootstrap_timeout_secs: DEFAULT_BOOTSTRAP_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Configured key material, if any. An empty value counts as unset.
    pub fn private_key(&self) -> Option<&str> {
        self.private_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Scrape endpoint, present iff both metrics host and port are set.
    pub fn metrics_endpoint(&self) -> Option<Endpoint> {
        Endpoint::from_parts(self.metrics_host.as_deref(), self.metrics_port)
    }

    /// Collector endpoint, present iff both trace host and port are set.
    pub fn trace_endpoint(&self) -> Option<Endpoint> {
        Endpoint::from_parts(self.trace_host.as_deref(), self.trace_port)
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_endpoint().is_some()
    }

    pub fn traces_enabled(&self) -> bool {
        self.trace_endpoint().is_some()
    }

    /// Whether the DHT speaks the public IPFS protocol.
    pub fn uses_public_protocol(&self) -> bool {
        self.protocol == IPFS_PROTOCOL
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    /// The slice of configuration the telemetry crate needs.
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            metrics: self.metrics_endpoint(),
            traces: self.trace_endpoint(),
            log_level: self.log_level,
            log_format: self.log_format,
            ..TelemetryConfig::default()
        }
    }

    /// JSON form for diagnostics, with the private key blanked.
    pub fn redacted(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"error\":\"unserializable configuration: {e}\"}}"))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

fn redact<S: Serializer>(key: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match key {
        Some(_) => serializer.serialize_str(""),
        None => serializer.serialize_none(),
    }
}

fn display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn display_seq<T: fmt::Display, S: Serializer>(
    values: &[T],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(ToString::to_string))
}
