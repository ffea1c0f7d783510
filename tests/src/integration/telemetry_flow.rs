//! # Telemetry Flow
//!
//! Providers → routing metrics → scrape endpoint. The DHT records into
//! whatever provider configuration produced; only an enabled provider has a
//! registry for the endpoint to expose.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use musa::bootstrap::{bootstrap, serve};
    use musa::dht::RoutingMetrics;
    use musa::{Config, Identity};
    use musa_telemetry::{
        Endpoint, MetricsServer, TelemetryConfig, TelemetryProviders, METRICS_PATH,
    };
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use crate::integration::{entry_of, test_node};

    fn metrics_config() -> TelemetryConfig {
        Config {
            metrics_host: Some("127.0.0.1".to_string()),
            metrics_port: Some(9090),
            ..Config::default()
        }
        .telemetry()
    }

    #[test]
    fn test_disabled_metrics_expose_nothing() {
        let providers = TelemetryProviders::build(&Config::default().telemetry()).unwrap();
        assert!(providers.meter.registry().is_none());

        // Recording into the no-op provider is still valid.
        RoutingMetrics::new(providers.meter.as_ref()).routing_updated();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bootstrap_metrics_are_scrapable() {
        let providers = TelemetryProviders::build(&metrics_config()).unwrap();
        let registry = providers.meter.registry().cloned().unwrap();
        let metrics = RoutingMetrics::new(providers.meter.as_ref());
        let lifetime = CancellationToken::new();

        let mut entry = test_node(&Identity::generate().unwrap(), Vec::new()).await;
        let entry_addr = entry_of(&entry);
        let entry_metrics = metrics.clone();
        let entry_lifetime = lifetime.clone();
        tokio::spawn(async move {
            serve(&mut entry, &entry_metrics, &entry_lifetime).await;
        });

        let mut node = test_node(&Identity::generate().unwrap(), vec![entry_addr]).await;
        timeout(
            Duration::from_secs(30),
            bootstrap(&mut node, &metrics, &lifetime),
        )
        .await
        .unwrap()
        .unwrap();

        let ephemeral = Endpoint {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let server = MetricsServer::bind(&ephemeral, registry).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let response = reqwest::get(format!("http://{addr}{METRICS_PATH}"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let body = response.text().await.unwrap();
        assert!(body.contains("musa_dht_bootstrap_runs"), "body was: {body}");
        assert!(body.contains("outcome=\"success\""), "body was: {body}");
        assert!(body.contains("musa_dht_connections"), "body was: {body}");

        lifetime.cancel();
        providers.shutdown(Duration::from_secs(1)).await;
    }
}
