//! Meter providers.
//!
//! The daemon only ever sees a [`MeterProvider`]. When metrics are enabled the
//! provider is an OpenTelemetry SDK provider whose reader is a Prometheus
//! exporter writing into a private [`Registry`]; the scrape endpoint reads the
//! same registry. When metrics are disabled every meter handed out is the
//! OpenTelemetry no-op meter, so instrumented code records into the void
//! without checking anything.
//!
//! Instrument names follow OpenTelemetry conventions (`musa.dht.*`); the
//! Prometheus exporter rewrites them to `musa_dht_*` on exposition.

use std::fmt;
use std::sync::Arc;

use opentelemetry::metrics::noop::NoopMeterProvider as OtelNoopMeterProvider;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::{service_resource, TelemetryConfig, TelemetryError};

/// Anything that can mint meters for instrumented code.
pub trait MeterProvider: Send + Sync + fmt::Debug {
    /// Returns a meter for the given instrumentation scope.
    fn meter(&self, scope: &'static str) -> Meter;

    /// The registry the scrape endpoint exposes, if this provider exports.
    fn registry(&self) -> Option<&Registry> {
        None
    }

    /// Flushes and stops the provider.
    fn shutdown(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Meter provider used when metrics are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMeterProvider;

impl MeterProvider for NoopMeterProvider {
    fn meter(&self, scope: &'static str) -> Meter {
        OtelNoopMeterProvider::new().meter(scope)
    }
}

/// Meter provider that exports into a Prometheus registry.
#[derive(Debug, Clone)]
pub struct PrometheusMeterProvider {
    provider: SdkMeterProvider,
    registry: Registry,
}

impl PrometheusMeterProvider {
    /// Builds the SDK provider with a Prometheus reader on a fresh registry.
    pub fn new(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .with_resource(service_resource(config))
            .build();

        Ok(Self { provider, registry })
    }
}

impl MeterProvider for PrometheusMeterProvider {
    fn meter(&self, scope: &'static str) -> Meter {
        self.provider.meter(scope)
    }

    fn registry(&self) -> Option<&Registry> {
        Some(&self.registry)
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider
            .shutdown()
            .map_err(|e| TelemetryError::Shutdown(e.to_string()))
    }
}

/// Builds the meter provider the configuration asks for.
///
/// Returns the no-op provider unless both metrics host and port are set.
pub fn build_meter_provider(
    config: &TelemetryConfig,
) -> Result<Arc<dyn MeterProvider>, TelemetryError> {
    if !config.metrics_enabled() {
        return Ok(Arc::new(NoopMeterProvider));
    }

    Ok(Arc::new(PrometheusMeterProvider::new(config)?))
}

/// Encode everything in `registry` as Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
