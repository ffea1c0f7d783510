//! # Musa Telemetry
//!
//! Observability for the musa bootstrapper.
//!
//! ## Components
//!
//! - **Metrics**: OpenTelemetry meters exported into a Prometheus registry,
//!   scraped over HTTP at `/metrics`
//! - **Traces**: `tracing` spans bridged into an OpenTelemetry batch pipeline
//!   that pushes to an OTLP/gRPC collector
//! - **Logs**: one structured `tracing` subscriber writing to stdout
//!
//! Each pipeline is either real or a no-op, decided by configuration alone.
//! Consumers hold an `Arc<dyn MeterProvider>` / `Arc<dyn TraceProvider>` and
//! never need to know which.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use musa_telemetry::{init_logging, TelemetryConfig, TelemetryProviders};
//!
//! let config = TelemetryConfig::default();
//! let providers = TelemetryProviders::build(&config)?;
//! init_logging(&config, providers.trace.as_ref())?;
//!
//! let meter = providers.meter.meter("musa.dht");
//! ```

mod config;
mod logging;
mod metrics;
mod server;
mod tracing_setup;

pub use config::{Endpoint, LogFormat, ParseLogFormatError, TelemetryConfig};
pub use logging::init_logging;
pub use metrics::{
    build_meter_provider, encode_metrics, MeterProvider, NoopMeterProvider,
    PrometheusMeterProvider,
};
pub use server::{router, MetricsServer, METRICS_PATH};
pub use tracing_setup::{
    build_trace_provider, BoxedLayer, NoopTraceProvider, OtlpTraceProvider, TraceProvider,
};

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::warn;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Failed to initialize structured logging: {0}")]
    LoggingInit(String),

    #[error("Failed to shut down telemetry provider: {0}")]
    Shutdown(String),

    #[error("Metrics endpoint {endpoint} failed: {source}")]
    MetricsServer {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

/// The process-wide metrics and trace providers.
#[derive(Debug, Clone)]
pub struct TelemetryProviders {
    pub meter: Arc<dyn MeterProvider>,
    pub trace: Arc<dyn TraceProvider>,
}

impl TelemetryProviders {
    /// Build both providers. Metrics first, then traces.
    pub fn build(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let meter = build_meter_provider(config)?;
        let trace = build_trace_provider(config)?;
        Ok(Self { meter, trace })
    }

    /// Both providers as no-ops.
    pub fn noop() -> Self {
        Self {
            meter: Arc::new(NoopMeterProvider),
            trace: Arc::new(NoopTraceProvider),
        }
    }

    /// Flush and stop both providers, giving up after `grace`.
    ///
    /// Flushing blocks inside the SDK, so it runs on a detached thread that is
    /// simply abandoned if the collector does not answer in time.
    pub async fn shutdown(&self, grace: Duration) {
        let meter = Arc::clone(&self.meter);
        let trace = Arc::clone(&self.trace);
        let (tx, rx) = oneshot::channel();

        std::thread::spawn(move || {
            let _ = tx.send((trace.shutdown(), meter.shutdown()));
        });

        match tokio::time::timeout(grace, rx).await {
            Ok(Ok((trace_result, meter_result))) => {
                if let Err(e) = trace_result {
                    warn!(error = %e, "trace provider shutdown failed");
                }
                if let Err(e) = meter_result {
                    warn!(error = %e, "meter provider shutdown failed");
                }
            }
            Ok(Err(_)) => warn!("telemetry flush thread exited without reporting"),
            Err(_) => warn!(grace_secs = grace.as_secs(), "telemetry flush timed out"),
        }
    }
}

pub(crate) fn service_resource(config: &TelemetryConfig) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}
