//! Daemon error taxonomy.
//!
//! Every variant is fatal: the daemon logs it, cancels its lifetime and exits
//! non-zero. Metrics server and trace export failures never get here; they
//! stay warnings inside their background tasks.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::config::ConfigError;
use crate::host::HostError;
use crate::identity::IdentityError;
use crate::shutdown::ShutdownError;
use musa_telemetry::TelemetryError;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("telemetry: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("host construction: {0}")]
    Host(#[from] HostError),

    #[error("bootstrap: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("signal handling: {0}")]
    Shutdown(#[from] ShutdownError),
}

impl DaemonError {
    /// Short class name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Identity(_) => "identity",
            Self::Telemetry(_) => "telemetry",
            Self::Host(_) => "host",
            Self::Bootstrap(_) => "bootstrap",
            Self::Shutdown(_) => "shutdown",
        }
    }
}
