//! Registry contract shared by all backends.

use crate::delta::{Delta, DeltaKind};
use crate::entry::{endpoint_host_port, Entry, RecordKind};
use crate::error::Result;
use crate::pow::DEFAULT_DIFFICULTY;
use serde::{Deserialize, Serialize};

/// Role values that mark an entry as a peer advertisement.
pub const PEER_ROLES: [&str; 2] = ["peer", "bootstrap"];

/// Registry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Required leading zero bits of the registration puzzle
    pub difficulty: u32,
    /// Feature flag reported by `status()`
    pub enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            enabled: true,
        }
    }
}

/// Stored form of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    pub entry: Entry,
    pub content_id: String,
    /// Local time of the last accepted write (unix millis)
    pub last_modified: u64,
    /// Per-name counter, bumped on every accepted write
    pub version: u64,
    /// Kind of the delta that installed this record
    pub kind: DeltaKind,
    /// Set when the record was installed by an expire delta
    pub tombstone: bool,
}

impl RegistryRecord {
    /// Merge order key. The larger key wins.
    pub fn winner_key(&self) -> (u64, &str, bool, &str) {
        (
            self.entry.timestamp,
            self.entry.signature.as_str(),
            self.tombstone,
            self.content_id.as_str(),
        )
    }

    /// Resolvable at `now`: not tombstoned and not past expiry.
    pub fn is_live_at(&self, now: u64) -> bool {
        !self.tombstone && !self.entry.is_expired_at(now)
    }

    /// The delta that reproduces this record on another replica.
    pub fn to_delta(&self, origin_peer_id: impl Into<String>) -> Delta {
        Delta::new(self.kind, self.entry.clone(), origin_peer_id, self.last_modified)
    }

    /// Project a peer advertisement, if the entry carries a peer role.
    pub fn peer_descriptor(&self) -> Option<PeerDescriptor> {
        let entry = &self.entry;
        let role = entry.record(RecordKind::Role)?;
        if !PEER_ROLES.contains(&role) {
            return None;
        }

        let from_records = entry.record(RecordKind::Ip).map(|ip| {
            let port = entry
                .record(RecordKind::Port)
                .and_then(|p| p.parse().ok())
                .unwrap_or(0);
            (ip.to_string(), port)
        });
        let (ip, port) =
            from_records.or_else(|| entry.endpoints().find_map(endpoint_host_port))?;

        Some(PeerDescriptor {
            name: entry.name.clone(),
            ip,
            port,
            public_key: Some(entry.public_key.clone()),
            role: Some(role.to_string()),
            timestamp: entry.timestamp,
        })
    }
}

/// Result of applying a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl ApplyOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ApplyOutcome::Accepted)
    }
}

/// Why a delta was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Already superseded (or an exact replay).
    Stale,
    /// Failed validation.
    Invalid(String),
}

/// Registry summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub enabled: bool,
    pub entry_count: usize,
    pub merkle_root: String,
}

/// Peer advertisement projected from a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub timestamp: u64,
}

/// A replica of the name registry.
///
/// Mutators take `&mut self`; callers share a backend behind a single lock so
/// that read-compare-write of a delta is one indivisible step.
pub trait NameRegistry: Send + Sync {
    /// Admit a locally submitted entry. Returns the delta kind to emit.
    fn register(&mut self, entry: Entry) -> Result<DeltaKind>;

    /// Tombstone a live record with an owner-signed entry.
    fn expire(&mut self, entry: Entry) -> Result<()>;

    /// Merge a replicated delta.
    fn apply_delta(&mut self, delta: &Delta) -> Result<ApplyOutcome>;

    /// Live entry for a name.
    fn resolve(&self, name: &str) -> Option<Entry>;

    /// Stored record for a name, live or not.
    fn record(&self, name: &str) -> Option<RegistryRecord>;

    fn status(&self) -> RegistryStatus;

    /// Peer advertisements among live records.
    fn peers(&self) -> Vec<PeerDescriptor>;

    /// Every stored record, sorted by name.
    fn snapshot(&self) -> Vec<RegistryRecord>;

    fn merkle_root(&self) -> String {
        self.status().merkle_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Record;

    fn record_with(records: Vec<Record>) -> RegistryRecord {
        let entry = Entry::new("seed.vns", "owner", records, 0, 10, 20);
        RegistryRecord {
            content_id: entry.content_id(false),
            entry,
            last_modified: 10,
            version: 1,
            kind: DeltaKind::Register,
            tombstone: false,
        }
    }

    #[test]
    fn descriptor_from_ip_port() {
        let rec = record_with(vec![
            Record::role("peer"),
            Record::new(RecordKind::Ip, "10.0.0.2"),
            Record::new(RecordKind::Port, "3001"),
        ]);
        let d = rec.peer_descriptor().unwrap();
        assert_eq!(d.ip, "10.0.0.2");
        assert_eq!(d.port, 3001);
        assert_eq!(d.role.as_deref(), Some("peer"));
    }

    #[test]
    fn descriptor_from_endpoint() {
        let rec = record_with(vec![Record::role("bootstrap"), Record::endpoint("http://b:4000")]);
        let d = rec.peer_descriptor().unwrap();
        assert_eq!((d.ip.as_str(), d.port), ("b", 4000));
    }

    #[test]
    fn no_descriptor_without_role() {
        let rec = record_with(vec![Record::endpoint("http://b:4000")]);
        assert!(rec.peer_descriptor().is_none());
        let rec = record_with(vec![Record::role("mail"), Record::endpoint("http://b:4000")]);
        assert!(rec.peer_descriptor().is_none());
    }

    #[test]
    fn winner_key_orders_by_timestamp_first() {
        let a = record_with(vec![]);
        let mut b = record_with(vec![]);
        b.entry.timestamp = 11;
        assert!(b.winner_key() > a.winner_key());
    }
}
