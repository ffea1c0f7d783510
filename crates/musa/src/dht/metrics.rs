//! Routing instrumentation.
//!
//! Instruments are minted from whatever meter provider the daemon was built
//! with; on the no-op provider every recording is discarded.

use std::fmt;
use std::time::Duration;

use musa_telemetry::MeterProvider;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::KeyValue;

/// Instrumentation scope of every DHT instrument.
pub const METER_SCOPE: &str = "musa.dht";

/// How a bootstrap run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Success,
    Failure,
    Cancelled,
}

impl BootstrapOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// DHT instruments.
#[derive(Clone)]
pub struct RoutingMetrics {
    bootstrap_runs: Counter<u64>,
    bootstrap_duration: Histogram<f64>,
    routing_updates: Counter<u64>,
    inbound_requests: Counter<u64>,
    connections: UpDownCounter<i64>,
}

impl RoutingMetrics {
    pub fn new(provider: &dyn MeterProvider) -> Self {
        let meter = provider.meter(METER_SCOPE);

        Self {
            bootstrap_runs: meter
                .u64_counter("musa.dht.bootstrap.runs")
                .with_description("Bootstrap runs by outcome")
                .init(),
            bootstrap_duration: meter
                .f64_histogram("musa.dht.bootstrap.duration")
                .with_description("Wall time of a bootstrap run")
                .with_unit("s")
                .init(),
            routing_updates: meter
                .u64_counter("musa.dht.routing.updates")
                .with_description("Routing table insertions and updates")
                .init(),
            inbound_requests: meter
                .u64_counter("musa.dht.inbound.requests")
                .with_description("DHT requests served, by request type")
                .init(),
            connections: meter
                .i64_up_down_counter("musa.dht.connections")
                .with_description("Open connections")
                .init(),
        }
    }

    pub fn bootstrap_finished(&self, outcome: BootstrapOutcome, elapsed: Duration) {
        let attributes = [KeyValue::new("outcome", outcome.as_str())];
        self.bootstrap_runs.add(1, &attributes);
        self.bootstrap_duration
            .record(elapsed.as_secs_f64(), &attributes);
    }

    pub fn routing_updated(&self) {
        self.routing_updates.add(1, &[]);
    }

    pub fn inbound_request(&self, request: &'static str) {
        self.inbound_requests
            .add(1, &[KeyValue::new("request", request)]);
    }

    pub fn connection_opened(&self) {
        self.connections.add(1, &[]);
    }

    pub fn connection_closed(&self) {
        self.connections.add(-1, &[]);
    }
}

impl fmt::Debug for RoutingMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingMetrics")
            .field("scope", &METER_SCOPE)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use musa_telemetry::{
        build_meter_provider, encode_metrics, Endpoint, NoopMeterProvider, TelemetryConfig,
    };

    #[test]
    fn test_noop_provider_accepts_recordings() {
        let metrics = RoutingMetrics::new(&NoopMeterProvider);
        metrics.bootstrap_finished(BootstrapOutcome::Success, Duration::from_millis(5));
        metrics.routing_updated();
        metrics.inbound_request("find_node");
        metrics.connection_opened();
        metrics.connection_closed();
    }

    #[test]
    fn test_recordings_reach_the_registry() {
        let config = TelemetryConfig {
            metrics: Endpoint::from_parts(Some("127.0.0.1"), Some(9090)),
            ..TelemetryConfig::default()
        };
        let provider = build_meter_provider(&config).unwrap();
        let metrics = RoutingMetrics::new(provider.as_ref());

        metrics.bootstrap_finished(BootstrapOutcome::Failure, Duration::from_millis(250));
        metrics.routing_updated();
        metrics.inbound_request("find_node");
        metrics.connection_opened();

        let body = encode_metrics(provider.registry().unwrap()).unwrap();
        assert!(body.contains("musa_dht_bootstrap_runs"), "body was: {body}");
        assert!(body.contains("outcome=\"failure\""), "body was: {body}");
        assert!(body.contains("musa_dht_bootstrap_duration"), "body was: {body}");
        assert!(body.contains("musa_dht_routing_updates"), "body was: {body}");
        assert!(body.contains("request=\"find_node\""), "body was: {body}");
        assert!(body.contains("musa_dht_connections"), "body was: {body}");
    }
}
