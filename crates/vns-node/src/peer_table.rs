//! Ephemeral cache of peers learned from other nodes.
//!
//! Peer descriptors pulled from `/api/vns/peers` are unauthenticated. They are
//! kept here, apart from the signed registry, and dropped once they have not
//! been seen for the configured TTL.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vns_registry::PeerDescriptor;

/// A discovered peer and when it was last reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownPeer {
    pub descriptor: PeerDescriptor,
    /// Node that reported it
    pub source: String,
    /// Unix millis of the latest report
    pub last_seen: u64,
}

/// Discovered peers keyed by `(name, ip, port)`.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<(String, String, u16), KnownPeer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer. Returns true if it was not known before.
    pub fn upsert(&mut self, descriptor: PeerDescriptor, source: &str, now: u64) -> bool {
        let key = (descriptor.name.clone(), descriptor.ip.clone(), descriptor.port);
        let known = KnownPeer {
            descriptor,
            source: source.to_string(),
            last_seen: now,
        };
        self.peers.insert(key, known).is_none()
    }

    /// Drop peers not seen within `ttl_ms` of `now`. Returns how many were dropped.
    pub fn prune(&mut self, ttl_ms: u64, now: u64) -> usize {
        let before = self.peers.len();
        self.peers
            .retain(|_, peer| now.saturating_sub(peer.last_seen) <= ttl_ms);
        before - self.peers.len()
    }

    /// Known peers, most recently seen first.
    pub fn list(&self) -> Vec<KnownPeer> {
        let mut peers: Vec<KnownPeer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
