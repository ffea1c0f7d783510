//! Prometheus scrape endpoint.
//!
//! A single background HTTP listener serving `GET /metrics`. It is not tied to
//! the daemon's lifetime: a bind or serve failure is logged as a warning and
//! the task ends, the daemon keeps running.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics::encode_metrics;
use crate::{Endpoint, TelemetryError};

/// Path of the scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

/// A bound, not yet serving, metrics listener.
pub struct MetricsServer {
    listener: TcpListener,
    registry: Registry,
}

impl MetricsServer {
    /// Bind the listener.
    pub async fn bind(endpoint: &Endpoint, registry: Registry) -> Result<Self, TelemetryError> {
        let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|source| TelemetryError::MetricsServer {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(Self { listener, registry })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve scrapes until the listener fails.
    pub async fn serve(self) -> Result<(), TelemetryError> {
        let endpoint = self
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        axum::serve(self.listener, router(self.registry))
            .await
            .map_err(|source| TelemetryError::MetricsServer { endpoint, source })
    }

    /// Run the endpoint as a detached background task.
    pub fn spawn(endpoint: Endpoint, registry: Registry) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(endpoint = %format!("{endpoint}{METRICS_PATH}"), "serving metrics");

            let server = match Self::bind(&endpoint, registry).await {
                Ok(server) => server,
                Err(e) => {
                    warn!(error = %e, "error serving metrics");
                    return;
                }
            };

            if let Err(e) = server.serve().await {
                warn!(error = %e, "error serving metrics");
            }
        })
    }
}

/// Router exposing `registry` at [`METRICS_PATH`].
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(scrape))
        .with_state(registry)
}

async fn scrape(State(registry): State<Registry>) -> Response {
    match encode_metrics(&registry) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
