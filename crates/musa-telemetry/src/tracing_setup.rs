//! OpenTelemetry trace providers.
//!
//! Spans are produced with `tracing` everywhere in the daemon. A
//! [`TraceProvider`] contributes the subscriber layer that decides where
//! those spans go: the OTLP provider bridges them into an OpenTelemetry batch
//! pipeline that pushes to a collector, the no-op provider contributes a layer
//! that does nothing.

use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{self, RandomIdGenerator, Sampler},
};
use tracing_subscriber::{layer::Identity, Layer, Registry};

use crate::{service_resource, TelemetryConfig, TelemetryError};

/// A type-erased subscriber layer over the base registry.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Anything that can contribute span export to the log subscriber.
pub trait TraceProvider: Send + Sync + fmt::Debug {
    /// Layer that forwards completed spans to this provider's pipeline.
    fn layer(&self) -> BoxedLayer;

    /// Flushes pending spans and stops the pipeline. Blocking.
    fn shutdown(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Trace provider used when tracing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceProvider;

impl TraceProvider for NoopTraceProvider {
    fn layer(&self) -> BoxedLayer {
        Identity::new().boxed()
    }
}

/// Trace provider exporting batches over OTLP/gRPC.
pub struct OtlpTraceProvider {
    provider: trace::TracerProvider,
    service_name: String,
    endpoint: String,
}

impl OtlpTraceProvider {
    /// Installs a batch span processor on the tokio runtime.
    ///
    /// The gRPC channel connects lazily, so an unreachable collector does not
    /// fail construction; it only shows up later as export warnings.
    pub fn new(config: &TelemetryConfig, endpoint: String) -> Result<Self, TelemetryError> {
        let otlp_exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint.clone());

        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(otlp_exporter)
            .with_trace_config(
                trace::Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(service_resource(config)),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

        Ok(Self {
            provider,
            service_name: config.service_name.clone(),
            endpoint,
        })
    }
}

impl fmt::Debug for OtlpTraceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpTraceProvider")
            .field("service_name", &self.service_name)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl TraceProvider for OtlpTraceProvider {
    fn layer(&self) -> BoxedLayer {
        let tracer = self.provider.tracer(self.service_name.clone());
        tracing_opentelemetry::layer().with_tracer(tracer).boxed()
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider
            .shutdown()
            .map_err(|e| TelemetryError::Shutdown(e.to_string()))
    }
}

/// Builds the trace provider the configuration asks for.
///
/// Returns the no-op provider unless both trace host and port are set. Must be
/// called from within a tokio runtime when tracing is enabled.
pub fn build_trace_provider(
    config: &TelemetryConfig,
) -> Result<Arc<dyn TraceProvider>, TelemetryError> {
    let Some(endpoint) = config.otlp_endpoint() else {
        return Ok(Arc::new(NoopTraceProvider));
    };

    // Export errors surface through the SDK's global handler; keep them as
    // warnings instead of raw stderr output.
    if let Err(e) = opentelemetry::global::set_error_handler(|err| {
        tracing::warn!(error = %err, "telemetry export failed");
    }) {
        return Err(TelemetryError::TracerInit(e.to_string()));
    }

    Ok(Arc::new(OtlpTraceProvider::new(config, endpoint)?))
}
