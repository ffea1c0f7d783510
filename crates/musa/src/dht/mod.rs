//! # DHT Routing Delegate
//!
//! The behaviour the network host is built around: Kademlia in server mode,
//! with identify and ping next to it so routing state stays fresh.
//!
//! ## Storage
//!
//! | Protocol id        | Store                   |
//! |--------------------|-------------------------|
//! | `/ipfs/kad/1.0.0`  | null (records dropped)  |
//! | anything else      | in memory               |
//!
//! ## Entry Peers
//!
//! Without configured entry peers the DHT is seeded with the public IPFS
//! bootstrappers. Every entry peer address must end in `/p2p/<peer-id>`.

mod metrics;
mod store;

pub use metrics::{BootstrapOutcome, RoutingMetrics, METER_SCOPE};
pub use store::{RoutingStore, StoragePolicy};

use std::time::Duration;

use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identify, kad, ping, Multiaddr, PeerId, StreamProtocol};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

/// Protocol id spoken by identify.
pub const IDENTIFY_PROTOCOL: &str = "/musa/1.0.0";

/// Entry peers of the public IPFS network.
pub const DEFAULT_BOOTSTRAP_PEERS: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// Failure to construct the routing delegate.
#[derive(Debug, Error)]
pub enum DhtError {
    #[error("invalid DHT protocol id {0:?}: must start with '/'")]
    Protocol(String),

    #[error("bootstrap peer {0} must end in /p2p/<peer-id>")]
    EntryPeer(String),
}

/// Everything needed to build a [`DhtBehaviour`].
#[derive(Debug, Clone)]
pub struct DhtConfig {
    pub protocol: StreamProtocol,
    pub storage: StoragePolicy,
    pub bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    pub query_timeout: Duration,
}

impl DhtConfig {
    /// Derive the DHT settings from daemon configuration.
    pub fn from_config(config: &Config) -> Result<Self, DhtError> {
        let protocol = StreamProtocol::try_from_owned(config.protocol.clone())
            .map_err(|_| DhtError::Protocol(config.protocol.clone()))?;

        let storage = if config.uses_public_protocol() {
            StoragePolicy::Null
        } else {
            StoragePolicy::Memory
        };

        let bootstrap_peers = if config.bootstrap_peers.is_empty() {
            DEFAULT_BOOTSTRAP_PEERS
                .iter()
                .map(|addr| {
                    addr.parse::<Multiaddr>()
                        .map_err(|_| DhtError::EntryPeer(addr.to_string()))
                        .and_then(split_peer_addr)
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            config
                .bootstrap_peers
                .iter()
                .cloned()
                .map(split_peer_addr)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            protocol,
            storage,
            bootstrap_peers,
            query_timeout: config.bootstrap_timeout(),
        })
    }
}

/// Split `/.../p2p/<peer-id>` into the peer id and its dialable prefix.
fn split_peer_addr(mut addr: Multiaddr) -> Result<(PeerId, Multiaddr), DhtError> {
    let original = addr.to_string();
    match addr.pop() {
        Some(Protocol::P2p(peer_id)) => Ok((peer_id, addr)),
        _ => Err(DhtError::EntryPeer(original)),
    }
}

/// The routing delegate of the network host.
#[derive(NetworkBehaviour)]
pub struct DhtBehaviour {
    pub kademlia: kad::Behaviour<RoutingStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

impl DhtBehaviour {
    pub fn new(key: &Keypair, config: &DhtConfig) -> Self {
        let local_peer_id = key.public().to_peer_id();

        let mut kad_config = kad::Config::new(config.protocol.clone());
        kad_config.set_query_timeout(config.query_timeout);

        let store = RoutingStore::new(config.storage, local_peer_id);
        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        // Answer queries even before an external address is confirmed.
        kademlia.set_mode(Some(kad::Mode::Server));

        for (peer_id, addr) in &config.bootstrap_peers {
            if let kad::RoutingUpdate::Failed = kademlia.add_address(peer_id, addr.clone()) {
                warn!(%peer_id, %addr, "could not add bootstrap peer to routing table");
            }
        }

        let identify = identify::Behaviour::new(
            identify::Config::new(IDENTIFY_PROTOCOL.to_string(), key.public())
                .with_agent_version(format!("musa/{}", env!("CARGO_PKG_VERSION"))),
        );

        Self {
            kademlia,
            identify,
            ping: ping::Behaviour::new(ping::Config::new()),
        }
    }

    /// Number of peers in the routing table.
    pub fn routing_table_size(&mut self) -> usize {
        self.kademlia
            .kbuckets()
            .map(|bucket| bucket.num_entries())
            .sum()
    }

    /// Apply the side effects of a behaviour event.
    ///
    /// Kademlia events are handed back so callers can follow their queries.
    pub fn absorb(
        &mut self,
        event: DhtBehaviourEvent,
        metrics: &RoutingMetrics,
    ) -> Option<kad::Event> {
        match event {
            DhtBehaviourEvent::Kademlia(event) => {
                record_kademlia(&event, metrics);
                Some(event)
            }
            DhtBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                self.learn(peer_id, info);
                None
            }
            DhtBehaviourEvent::Identify(_) => None,
            DhtBehaviourEvent::Ping(ping::Event { peer, result, .. }) => {
                if let Err(e) = result {
                    debug!(%peer, error = %e, "ping failed");
                }
                None
            }
        }
    }

    /// Feed addresses reported by identify into the routing table, for peers
    /// that speak our DHT protocol.
    fn learn(&mut self, peer_id: PeerId, info: identify::Info) {
        let speaks_dht = info
            .protocols
            .iter()
            .any(|protocol| self.kademlia.protocol_names().contains(protocol));
        if !speaks_dht {
            return;
        }

        for addr in info.listen_addrs {
            self.kademlia.add_address(&peer_id, addr);
        }
    }
}

fn record_kademlia(event: &kad::Event, metrics: &RoutingMetrics) {
    match event {
        kad::Event::RoutingUpdated {
            peer, is_new_peer, ..
        } => {
            metrics.routing_updated();
            debug!(%peer, is_new_peer, "routing table updated");
        }
        kad::Event::InboundRequest { request } => {
            metrics.inbound_request(request_kind(request));
        }
        _ => {}
    }
}

fn request_kind(request: &kad::InboundRequest) -> &'static str {
    match request {
        kad::InboundRequest::FindNode { .. } => "find_node",
        kad::InboundRequest::GetProvider { .. } => "get_providers",
        kad::InboundRequest::AddProvider { .. } => "add_provider",
        kad::InboundRequest::GetRecord { .. } => "get_record",
        kad::InboundRequest::PutRecord { .. } => "put_record",
    }
}
