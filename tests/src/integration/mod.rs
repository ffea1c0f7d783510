//! Integration flows across the daemon and telemetry crates.

pub mod bootstrap_flow;
pub mod telemetry_flow;

use std::net::Ipv4Addr;
use std::time::Duration;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use musa::dht::{DhtBehaviour, DhtConfig, StoragePolicy};
use musa::host::{build_host, DhtHost, ListenAddrs};
use musa::Identity;

/// Private DHT protocol used by every flow.
pub const TEST_PROTOCOL: &str = "/musa-test/kad/1.0.0";

/// Build a loopback node on [`TEST_PROTOCOL`] seeded with `entry_peers`.
pub async fn test_node(identity: &Identity, entry_peers: Vec<(PeerId, Multiaddr)>) -> DhtHost {
    let dht = DhtConfig {
        protocol: StreamProtocol::new(TEST_PROTOCOL),
        storage: StoragePolicy::Memory,
        bootstrap_peers: entry_peers,
        query_timeout: Duration::from_secs(10),
    };

    build_host(
        identity,
        &ListenAddrs::new(Ipv4Addr::LOCALHOST, 0).expect("loopback listen addresses"),
        |key| Ok(DhtBehaviour::new(key, &dht)),
    )
    .await
    .expect("test node should build")
}

/// The node's TCP listen address, as an entry peer of another node.
pub fn entry_of(host: &DhtHost) -> (PeerId, Multiaddr) {
    let addr = host
        .listen_addrs()
        .iter()
        .find(|addr| addr.iter().any(|p| matches!(p, Protocol::Tcp(_))))
        .cloned()
        .expect("test node listens on tcp");
    (host.peer_id(), addr)
}
