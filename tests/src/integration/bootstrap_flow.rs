//! # Bootstrap Flow
//!
//! Identity → host → DHT bootstrap → shutdown, with real loopback sockets.
//!
//! ## Scenarios
//!
//! 1. A node bootstraps from a live entry node
//! 2. A node whose only entry peer is down fails fast
//! 3. Cancellation, before or during bootstrap, returns promptly
//! 4. Shutdown triggered twice cancels once

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use libp2p::PeerId;
    use musa::bootstrap::{bootstrap, serve, BootstrapError};
    use musa::dht::RoutingMetrics;
    use musa::{Identity, ShutdownCoordinator, ShutdownReason, ShutdownState};
    use musa_telemetry::NoopMeterProvider;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use crate::integration::{entry_of, test_node};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Start a serving entry node; it stops with `lifetime`.
    async fn serving_entry_node(lifetime: &CancellationToken) -> (PeerId, libp2p::Multiaddr) {
        let mut node = test_node(&Identity::generate().unwrap(), Vec::new()).await;
        let entry = entry_of(&node);

        let lifetime = lifetime.clone();
        tokio::spawn(async move {
            let metrics = RoutingMetrics::new(&NoopMeterProvider);
            serve(&mut node, &metrics, &lifetime).await;
        });

        entry
    }

    // =============================================================================
    // BOOTSTRAP OUTCOMES
    // =============================================================================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_two_node_bootstrap_succeeds() {
        let lifetime = CancellationToken::new();
        let entry = serving_entry_node(&lifetime).await;
        let entry_peer = entry.0;

        let mut node = test_node(&Identity::generate().unwrap(), vec![entry]).await;
        let metrics = RoutingMetrics::new(&NoopMeterProvider);

        let report = timeout(
            Duration::from_secs(30),
            bootstrap(&mut node, &metrics, &lifetime),
        )
        .await
        .expect("bootstrap should finish")
        .expect("bootstrap should succeed");

        assert!(report.responses >= 1, "report: {report:?}");
        assert!(report.routing_table_size >= 1, "report: {report:?}");

        let known = node
            .routing_mut()
            .kademlia
            .kbuckets()
            .flat_map(|bucket| {
                bucket
                    .iter()
                    .map(|entry| *entry.node.key.preimage())
                    .collect::<Vec<_>>()
            })
            .any(|peer| peer == entry_peer);
        assert!(known, "entry peer should be in the routing table");

        lifetime.cancel();
    }

    #[tokio::test]
    async fn test_unreachable_entry_peer_fails_fast() {
        let down = (PeerId::random(), "/ip4/127.0.0.1/tcp/1".parse().unwrap());
        let mut node = test_node(&Identity::generate().unwrap(), vec![down]).await;
        let metrics = RoutingMetrics::new(&NoopMeterProvider);

        let result = timeout(
            Duration::from_secs(20),
            bootstrap(&mut node, &metrics, &CancellationToken::new()),
        )
        .await
        .expect("bootstrap should give up on its own");

        assert!(
            matches!(
                result,
                Err(BootstrapError::Unreachable | BootstrapError::Timeout)
            ),
            "got {result:?}"
        );
    }

    // =============================================================================
    // CANCELLATION
    // =============================================================================

    #[tokio::test]
    async fn test_bootstrap_on_cancelled_lifetime_is_prompt() {
        let lifetime = CancellationToken::new();
        let entry = serving_entry_node(&lifetime).await;
        let mut node = test_node(&Identity::generate().unwrap(), vec![entry]).await;
        lifetime.cancel();

        let result = timeout(
            Duration::from_secs(1),
            bootstrap(
                &mut node,
                &RoutingMetrics::new(&NoopMeterProvider),
                &lifetime,
            ),
        )
        .await
        .expect("no waiting on a cancelled lifetime");

        assert!(matches!(result, Err(BootstrapError::Cancelled)));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_bootstrap_in_progress() {
        // Accepts TCP connections but never completes a handshake, so the
        // bootstrap can only end by timeout or cancellation.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let stalled = (
            PeerId::random(),
            format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap(),
        );

        let mut node = test_node(&Identity::generate().unwrap(), vec![stalled]).await;
        let shutdown = ShutdownCoordinator::new();
        let lifetime = shutdown.lifetime();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger(ShutdownReason::Terminate);
        });

        let result = timeout(
            Duration::from_secs(5),
            bootstrap(
                &mut node,
                &RoutingMetrics::new(&NoopMeterProvider),
                &lifetime,
            ),
        )
        .await
        .expect("cancellation should end the bootstrap");

        assert!(matches!(result, Err(BootstrapError::Cancelled)), "got {result:?}");
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Terminate));
        drop(silent);
    }

    #[tokio::test]
    async fn test_second_trigger_is_a_no_op() {
        let shutdown = ShutdownCoordinator::new();
        let lifetime = shutdown.lifetime();

        assert!(shutdown.trigger(ShutdownReason::Interrupt));
        assert!(!shutdown.trigger(ShutdownReason::Terminate));

        assert!(lifetime.is_cancelled());
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Interrupt));
        assert_eq!(shutdown.state(), ShutdownState::Stopping);

        shutdown.mark_stopped();
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }

    // =============================================================================
    // IDENTITY
    // =============================================================================

    #[tokio::test]
    async fn test_configured_key_pins_host_peer_id() {
        let encoded = Identity::generate().unwrap().encode().unwrap();

        let first = Identity::decode(&encoded).unwrap();
        let second = Identity::decode(&encoded).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());

        let node = test_node(&first, Vec::new()).await;
        assert_eq!(node.peer_id(), first.peer_id());
    }

    #[tokio::test]
    async fn test_generated_identities_give_distinct_hosts() {
        let a = test_node(&Identity::generate().unwrap(), Vec::new()).await;
        let b = test_node(&Identity::generate().unwrap(), Vec::new()).await;
        assert_ne!(a.peer_id(), b.peer_id());
    }
}
