//! Replication deltas.

use crate::entry::Entry;
use serde::{Deserialize, Serialize};

/// Kind of mutation carried by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Register,
    Update,
    Expire,
}

impl DeltaKind {
    /// Whether applying this kind stores a tombstone.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, DeltaKind::Expire)
    }
}

/// The unit of replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    #[serde(rename = "type")]
    pub kind: DeltaKind,

    /// The signed entry
    pub entry: Entry,

    /// Node that produced the delta
    pub origin_peer_id: String,

    /// Emission time (unix millis); merge order uses `entry.timestamp`
    pub timestamp: u64,

    /// Node that relayed the delta, if it did not come from its origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_peer: Option<String>,
}

impl Delta {
    /// Create a delta emitted by its origin.
    pub fn new(
        kind: DeltaKind,
        entry: Entry,
        origin_peer_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            kind,
            entry,
            origin_peer_id: origin_peer_id.into(),
            timestamp,
            relay_peer: None,
        }
    }

    /// Copy of this delta marked as relayed by `peer`.
    pub fn relayed_by(&self, peer: impl Into<String>) -> Self {
        Self {
            relay_peer: Some(peer.into()),
            ..self.clone()
        }
    }
}
