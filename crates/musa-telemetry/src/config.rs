//! Telemetry configuration.
//!
//! The daemon resolves its own configuration and hands the telemetry-relevant
//! slice over as a [`TelemetryConfig`]. Nothing in this crate reads the
//! process environment.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::Level;

/// Output format of the structured log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable `key=value` lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Returned when a log format name is neither `text` nor `json`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown log format {0:?} (expected \"text\" or \"json\")")]
pub struct ParseLogFormatError(String);

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ParseLogFormatError(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// A `host:port` pair of a telemetry endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port, never zero.
    pub port: u16,
}

impl Endpoint {
    /// Builds an endpoint only when both halves are usable.
    ///
    /// A missing or empty host, or a missing or zero port, disables the
    /// pipeline the endpoint belongs to.
    pub fn from_parts(host: Option<&str>, port: Option<u16>) -> Option<Self> {
        let host = host.map(str::trim).filter(|h| !h.is_empty())?;
        let port = port.filter(|p| *p != 0)?;
        Some(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configuration for the telemetry pipelines and the log subscriber.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to exported spans.
    pub service_name: String,

    /// Deployment environment attached to exported spans.
    pub environment: String,

    /// Where the Prometheus scrape endpoint listens. `None` disables metrics.
    pub metrics: Option<Endpoint>,

    /// OTLP/gRPC collector that receives spans. `None` disables tracing.
    pub traces: Option<Endpoint>,

    /// Most verbose level that is emitted.
    pub log_level: Level,

    /// Log line format.
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "musa".to_string(),
            environment: "production".to_string(),
            metrics: None,
            traces: None,
            log_level: Level::INFO,
            log_format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// Whether the Prometheus pipeline and scrape endpoint are wanted.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }

    /// Whether spans are exported to a collector.
    pub fn traces_enabled(&self) -> bool {
        self.traces.is_some()
    }

    /// Collector URL for the OTLP exporter. The scheme is plain `http`, the
    /// exporter talks to the collector without TLS.
    pub fn otlp_endpoint(&self) -> Option<String> {
        self.traces
            .as_ref()
            .map(|endpoint| format!("http://{endpoint}"))
    }
}
