//! Record storage behind the DHT.
//!
//! The public IPFS network would push an unbounded stream of provider and
//! value records at a long-running server, so for that protocol every record
//! is accepted and dropped. Private networks keep records in memory.

use std::borrow::Cow;

use libp2p::kad::store::{MemoryStore, RecordStore, Result};
use libp2p::kad::{ProviderRecord, Record, RecordKey};
use libp2p::PeerId;

/// Which store a DHT instance is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePolicy {
    /// Accept every record and keep none.
    Null,
    /// Keep records in process memory.
    Memory,
}

/// The record store handed to Kademlia.
pub enum RoutingStore {
    Null,
    Memory(MemoryStore),
}

impl RoutingStore {
    pub fn new(policy: StoragePolicy, local_peer_id: PeerId) -> Self {
        match policy {
            StoragePolicy::Null => Self::Null,
            StoragePolicy::Memory => Self::Memory(MemoryStore::new(local_peer_id)),
        }
    }
}

impl RecordStore for RoutingStore {
    type RecordsIter<'a> = Box<dyn Iterator<Item = Cow<'a, Record>> + 'a>;
    type ProvidedIter<'a> = Box<dyn Iterator<Item = Cow<'a, ProviderRecord>> + 'a>;

    fn get(&self, key: &RecordKey) -> Option<Cow<'_, Record>> {
        match self {
            Self::Null => None,
            Self::Memory(store) => store.get(key),
        }
    }

    fn put(&mut self, record: Record) -> Result<()> {
        match self {
            Self::Null => Ok(()),
            Self::Memory(store) => store.put(record),
        }
    }

    fn remove(&mut self, key: &RecordKey) {
        if let Self::Memory(store) = self {
            store.remove(key);
        }
    }

    fn records(&self) -> Self::RecordsIter<'_> {
        match self {
            Self::Null => Box::new(std::iter::empty()),
            Self::Memory(store) => Box::new(store.records()),
        }
    }

    fn add_provider(&mut self, record: ProviderRecord) -> Result<()> {
        match self {
            Self::Null => Ok(()),
            Self::Memory(store) => store.add_provider(record),
        }
    }

    fn providers(&self, key: &RecordKey) -> Vec<ProviderRecord> {
        match self {
            Self::Null => Vec::new(),
            Self::Memory(store) => store.providers(key),
        }
    }

    fn provided(&self) -> Self::ProvidedIter<'_> {
        match self {
            Self::Null => Box::new(std::iter::empty()),
            Self::Memory(store) => Box::new(store.provided()),
        }
    }

    fn remove_provider(&mut self, key: &RecordKey, provider: &PeerId) {
        if let Self::Memory(store) = self {
            store.remove_provider(key, provider);
        }
    }
}
