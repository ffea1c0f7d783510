//! # Bootstrap Controller
//!
//! Seeds the routing table from the entry peers, then keeps the host serving
//! until the lifetime is cancelled. Both waits observe the lifetime token and
//! return as soon as it fires.
//!
//! A bootstrap succeeds when at least one peer answered one of its queries.
//! A node that nobody can reach is useless as an entry point, so anything
//! else is an error.

use std::time::{Duration, Instant};

use libp2p::kad;
use libp2p::swarm::SwarmEvent;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::dht::{BootstrapOutcome, DhtBehaviourEvent, RoutingMetrics};
use crate::host::DhtHost;

/// Why a bootstrap run did not complete.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap cancelled")]
    Cancelled,

    #[error("no entry peers to bootstrap from")]
    NoKnownPeers,

    #[error("no entry peer reachable")]
    Unreachable,

    #[error("bootstrap timed out before any entry peer answered")]
    Timeout,
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Successful responses, summed over the bootstrap's queries.
    pub responses: u32,
    pub routing_table_size: usize,
    pub elapsed: Duration,
}

/// Run the DHT bootstrap against the configured entry peers.
#[instrument(name = "dht.bootstrap", skip_all, fields(peer_id = %host.peer_id()))]
pub async fn bootstrap(
    host: &mut DhtHost,
    metrics: &RoutingMetrics,
    lifetime: &CancellationToken,
) -> Result<BootstrapReport, BootstrapError> {
    let started = Instant::now();
    let outcome = run_bootstrap(host, metrics, lifetime, started).await;

    let recorded = match &outcome {
        Ok(_) => BootstrapOutcome::Success,
        Err(BootstrapError::Cancelled) => BootstrapOutcome::Cancelled,
        Err(_) => BootstrapOutcome::Failure,
    };
    metrics.bootstrap_finished(recorded, started.elapsed());

    outcome
}

async fn run_bootstrap(
    host: &mut DhtHost,
    metrics: &RoutingMetrics,
    lifetime: &CancellationToken,
    started: Instant,
) -> Result<BootstrapReport, BootstrapError> {
    if lifetime.is_cancelled() {
        return Err(BootstrapError::Cancelled);
    }

    let query = host
        .routing_mut()
        .kademlia
        .bootstrap()
        .map_err(|_| BootstrapError::NoKnownPeers)?;
    debug!(?query, "bootstrap started");

    let mut responses = 0u32;
    let mut timed_out = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = lifetime.cancelled() => return Err(BootstrapError::Cancelled),
            event = host.next_event() => event,
        };

        let Some(kad::Event::OutboundQueryProgressed {
            id,
            result: kad::QueryResult::Bootstrap(result),
            stats,
            step,
        }) = dispatch(host, event, metrics)
        else {
            continue;
        };
        if id != query {
            continue;
        }

        responses = responses.saturating_add(stats.num_successes());
        match result {
            Ok(ok) => debug!(
                remaining = ok.num_remaining,
                successes = stats.num_successes(),
                "bootstrap step finished"
            ),
            Err(kad::BootstrapError::Timeout { num_remaining, .. }) => {
                debug!(?num_remaining, "bootstrap step timed out");
                timed_out = true;
            }
        }

        if !step.last {
            continue;
        }

        if responses == 0 {
            return Err(if timed_out {
                BootstrapError::Timeout
            } else {
                BootstrapError::Unreachable
            });
        }

        return Ok(BootstrapReport {
            responses,
            routing_table_size: host.routing_mut().routing_table_size(),
            elapsed: started.elapsed(),
        });
    }
}

/// Keep the host serving DHT requests until the lifetime is cancelled.
pub async fn serve(host: &mut DhtHost, metrics: &RoutingMetrics, lifetime: &CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = lifetime.cancelled() => break,
            event = host.next_event() => {
                dispatch(host, event, metrics);
            }
        }
    }
    debug!("stopped serving");
}

/// Route one swarm event through metrics and the routing delegate.
///
/// Returns the Kademlia event, if that is what it was.
pub fn dispatch(
    host: &mut DhtHost,
    event: SwarmEvent<DhtBehaviourEvent>,
    metrics: &RoutingMetrics,
) -> Option<kad::Event> {
    match event {
        SwarmEvent::Behaviour(event) => host.routing_mut().absorb(event, metrics),
        SwarmEvent::ConnectionEstablished {
            peer_id, endpoint, ..
        } => {
            metrics.connection_opened();
            debug!(%peer_id, remote = %endpoint.get_remote_address(), "connection established");
            None
        }
        SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
            metrics.connection_closed();
            match cause {
                Some(e) => debug!(%peer_id, error = %e, "connection closed"),
                None => debug!(%peer_id, "connection closed"),
            }
            None
        }
        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
            debug!(?peer_id, error = %error, "outgoing connection failed");
            None
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            info!(%address, "listening");
            None
        }
        SwarmEvent::ExpiredListenAddr { address, .. } => {
            info!(%address, "no longer listening");
            None
        }
        SwarmEvent::ListenerError { error, .. } => {
            warn!(error = %error, "listener error");
            None
        }
        _ => None,
    }
}
