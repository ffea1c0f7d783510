//! # Network Host
//!
//! Builds the libp2p swarm around a routing delegate and binds it on every
//! listen address derived from the configured host and port:
//!
//! ```text
//! /ip4/<host>/tcp/<port>
//! /ip4/<host>/udp/<port>/quic-v1
//! /ip4/<host>/udp/<port>/quic-v1/webtransport
//! ```
//!
//! The routing delegate is produced by a factory that receives the host
//! keypair and is called exactly once, before any listener is opened. Its
//! result is owned by the returned [`NetworkHost`]; callers reach it through
//! [`NetworkHost::routing_mut`].
//!
//! The transport stack cannot terminate WebTransport sessions. A listener on
//! that form rejected as unsupported is skipped with a warning; every other
//! listener failure aborts construction.

use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use libp2p::core::transport::ListenerId;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{noise, tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder, TransportError};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::dht::{DhtBehaviour, DhtError};
use crate::identity::Identity;

/// How long a new listener may take to report its bound address.
pub const LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Once every listener is up, further addresses are collected until none has
/// arrived for this long.
const LISTEN_SETTLE: Duration = Duration::from_millis(100);

/// Connections without active streams are closed after this long.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Failure to construct the network host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid listen address {addr:?}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: libp2p::multiaddr::Error,
    },

    #[error("transport rejected host identity: {0}")]
    Transport(String),

    #[error("routing construction failed: {0}")]
    Routing(#[from] DhtError),

    #[error("listen on {addr}: {source}")]
    Listen {
        addr: Multiaddr,
        #[source]
        source: TransportError<std::io::Error>,
    },

    #[error("listener on {addr} closed before reporting an address: {reason}")]
    ListenerClosed { addr: Multiaddr, reason: String },

    #[error("listeners not ready after {0:?}")]
    ListenTimeout(Duration),
}

/// Transport form of a listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenKind {
    Tcp,
    Quic,
    WebTransport,
}

impl fmt::Display for ListenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Quic => f.write_str("quic-v1"),
            Self::WebTransport => f.write_str("webtransport"),
        }
    }
}

/// The listen addresses requested for one bind host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddrs {
    pub tcp: Multiaddr,
    pub quic: Multiaddr,
    pub webtransport: Multiaddr,
}

impl ListenAddrs {
    pub fn new(host: impl fmt::Display, port: u16) -> Result<Self, HostError> {
        Ok(Self {
            tcp: parse_addr(format!("/ip4/{host}/tcp/{port}"))?,
            quic: parse_addr(format!("/ip4/{host}/udp/{port}/quic-v1"))?,
            webtransport: parse_addr(format!("/ip4/{host}/udp/{port}/quic-v1/webtransport"))?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, HostError> {
        Self::new(config.host, config.port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ListenKind, &Multiaddr)> {
        [
            (ListenKind::Tcp, &self.tcp),
            (ListenKind::Quic, &self.quic),
            (ListenKind::WebTransport, &self.webtransport),
        ]
        .into_iter()
    }
}

fn parse_addr(addr: String) -> Result<Multiaddr, HostError> {
    addr.parse()
        .map_err(|source| HostError::InvalidAddress { addr, source })
}

/// A bound libp2p host and the routing delegate it owns.
pub struct NetworkHost<B: NetworkBehaviour> {
    swarm: Swarm<B>,
    listen_addrs: Vec<Multiaddr>,
}

/// The host the daemon runs.
pub type DhtHost = NetworkHost<DhtBehaviour>;

impl<B: NetworkBehaviour> NetworkHost<B> {
    pub fn peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Addresses the listeners reported while the host was being built.
    ///
    /// On an unspecified host this holds one address per interface for each
    /// listener. Interfaces that appear later are only logged.
    pub fn listen_addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }

    pub fn routing_mut(&mut self) -> &mut B {
        self.swarm.behaviour_mut()
    }

    /// Drive the swarm until it produces its next event.
    pub async fn next_event(&mut self) -> SwarmEvent<B::ToSwarm> {
        self.swarm.select_next_some().await
    }
}

impl<B: NetworkBehaviour> fmt::Debug for NetworkHost<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkHost")
            .field("peer_id", self.swarm.local_peer_id())
            .field("listen_addrs", &self.listen_addrs)
            .finish_non_exhaustive()
    }
}

/// Build the host and bind it on `addrs`.
///
/// `routing` receives the host keypair and returns the routing delegate.
/// Returns once every accepted listener has reported a bound address.
#[instrument(name = "host.build", skip_all, fields(peer_id = %identity.peer_id()))]
pub async fn build_host<B, F>(
    identity: &Identity,
    addrs: &ListenAddrs,
    routing: F,
) -> Result<NetworkHost<B>, HostError>
where
    B: NetworkBehaviour,
    F: FnOnce(&libp2p::identity::Keypair) -> Result<B, DhtError>,
{
    let behaviour = routing(identity.keypair())?;

    let mut swarm = SwarmBuilder::with_existing_identity(identity.keypair().clone())
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| HostError::Transport(e.to_string()))?
        .with_quic()
        .with_dns()
        .map_err(|e| HostError::Transport(e.to_string()))?
        .with_behaviour(|_| behaviour)
        .unwrap_or_else(|never: Infallible| match never {})
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    let mut pending = Vec::new();
    for (kind, addr) in addrs.iter() {
        match swarm.listen_on(addr.clone()) {
            Ok(id) => pending.push((id, addr.clone())),
            Err(TransportError::MultiaddrNotSupported(_)) if kind == ListenKind::WebTransport => {
                warn!(%addr, "transport cannot listen on {kind}, skipping");
            }
            Err(source) => {
                return Err(HostError::Listen {
                    addr: addr.clone(),
                    source,
                })
            }
        }
    }

    let listen_addrs = tokio::time::timeout(LISTEN_TIMEOUT, await_listeners(&mut swarm, pending))
        .await
        .map_err(|_| HostError::ListenTimeout(LISTEN_TIMEOUT))??;

    info!(listeners = listen_addrs.len(), "host ready");

    Ok(NetworkHost {
        swarm,
        listen_addrs,
    })
}

/// Wait until each listener in `pending` reports at least one address, then
/// collect the rest of the addresses they report while binding.
async fn await_listeners<B: NetworkBehaviour>(
    swarm: &mut Swarm<B>,
    pending: Vec<(ListenerId, Multiaddr)>,
) -> Result<Vec<Multiaddr>, HostError> {
    let requested: Vec<_> = pending.iter().map(|(id, _)| *id).collect();
    let mut waiting: HashSet<ListenerId> = requested.iter().copied().collect();
    let mut bound = Vec::new();

    while !waiting.is_empty() {
        match swarm.select_next_some().await {
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } if requested.contains(&listener_id) => {
                waiting.remove(&listener_id);
                bound.push(address);
            }
            SwarmEvent::ListenerClosed {
                listener_id,
                reason,
                ..
            } if waiting.contains(&listener_id) => {
                let addr = requested_addr(&pending, listener_id);
                let reason = match reason {
                    Ok(()) => "closed".to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(HostError::ListenerClosed { addr, reason });
            }
            SwarmEvent::ListenerError { listener_id, error } => {
                warn!(?listener_id, error = %error, "listener error");
            }
            _ => {}
        }
    }

    // An unspecified host yields one address per interface, one event each.
    let mut quiet = Instant::now() + LISTEN_SETTLE;
    while let Ok(event) = tokio::time::timeout_at(quiet, swarm.select_next_some()).await {
        if let SwarmEvent::NewListenAddr {
            listener_id,
            address,
        } = event
        {
            if requested.contains(&listener_id) {
                bound.push(address);
                quiet = Instant::now() + LISTEN_SETTLE;
            }
        }
    }

    Ok(bound)
}

fn requested_addr(pending: &[(ListenerId, Multiaddr)], id: ListenerId) -> Multiaddr {
    pending
        .iter()
        .find(|(listener, _)| *listener == id)
        .map(|(_, addr)| addr.clone())
        .unwrap_or_else(Multiaddr::empty)
}
