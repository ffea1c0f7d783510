//! # Daemon Orchestration
//!
//! ## Startup Sequence
//!
//! 1. Create the lifetime (shutdown coordinator)
//! 2. Build meter and trace providers, then install logging
//! 3. Arm the signal listener
//! 4. Spawn the metrics endpoint, if metrics are enabled
//! 5. Resolve the network identity
//! 6. Build the host around the DHT routing delegate
//! 7. Bootstrap the DHT
//! 8. Serve until the lifetime is cancelled
//!
//! A failure in any step cancels the lifetime and is returned. A signal that
//! interrupts step 7 or 8 is a clean stop.

use std::time::Duration;

use musa_telemetry::{init_logging, MetricsServer, TelemetryProviders};
use tracing::{debug, error, info};

use crate::bootstrap::{bootstrap, serve, BootstrapError};
use crate::config::Config;
use crate::dht::{DhtBehaviour, DhtConfig, RoutingMetrics};
use crate::error::DaemonError;
use crate::host::{build_host, ListenAddrs};
use crate::identity::Identity;
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};

/// Upper bound on flushing telemetry at exit.
pub const TELEMETRY_FLUSH_GRACE: Duration = Duration::from_secs(5);

/// Run the daemon until a termination signal or a fatal error.
///
/// Installs the global tracing subscriber, so it can run once per process.
pub async fn run(config: Config) -> Result<(), DaemonError> {
    let shutdown = ShutdownCoordinator::new();

    let telemetry = config.telemetry();
    let providers = TelemetryProviders::build(&telemetry)?;
    init_logging(&telemetry, providers.trace.as_ref())?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting musa");
    debug!(config = %config.redacted(), "resolved configuration");

    let outcome = match start(&config, &providers, &shutdown).await {
        Err(DaemonError::Bootstrap(BootstrapError::Cancelled))
            if shutdown.reason().is_some_and(|reason| reason.is_signal()) =>
        {
            info!("bootstrap interrupted");
            Ok(())
        }
        Err(e) => {
            shutdown.trigger(ShutdownReason::StartupFailure);
            error!(kind = e.kind(), error = %e, "musa failed");
            Err(e)
        }
        Ok(()) => Ok(()),
    };

    shutdown.mark_stopped();
    providers.shutdown(TELEMETRY_FLUSH_GRACE).await;
    info!("stopped");

    outcome
}

async fn start(
    config: &Config,
    providers: &TelemetryProviders,
    shutdown: &ShutdownCoordinator,
) -> Result<(), DaemonError> {
    let lifetime = shutdown.lifetime();
    let _signals = shutdown.arm()?;

    if let (Some(endpoint), Some(registry)) =
        (config.metrics_endpoint(), providers.meter.registry())
    {
        MetricsServer::spawn(endpoint, registry.clone());
    }

    let identity = Identity::resolve(config)?;
    info!(peer_id = %identity.peer_id(), source = %identity.source(), "resolved identity");

    let metrics = RoutingMetrics::new(providers.meter.as_ref());
    let addrs = ListenAddrs::from_config(config)?;
    let mut host = build_host(&identity, &addrs, |key| {
        let dht = DhtConfig::from_config(config)?;
        debug!(
            protocol = %dht.protocol,
            storage = ?dht.storage,
            entry_peers = dht.bootstrap_peers.len(),
            "building DHT"
        );
        Ok(DhtBehaviour::new(key, &dht))
    })
    .await?;

    info!(peerID = %host.peer_id(), "Created libp2p host");
    for (i, addr) in host.listen_addrs().iter().enumerate() {
        info!("[{i}] {addr}");
    }

    let report = bootstrap(&mut host, &metrics, &lifetime).await?;
    info!(
        responses = report.responses,
        routing_table = report.routing_table_size,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "initialized"
    );

    serve(&mut host, &metrics, &lifetime).await;
    Ok(())
}
