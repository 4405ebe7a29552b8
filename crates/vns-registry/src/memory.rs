//! In-memory registry backend.

use crate::clock::{Clock, SystemClock};
use crate::crypto::{Ed25519Verifier, SignatureVerifier};
use crate::delta::{Delta, DeltaKind};
use crate::entry::Entry;
use crate::error::{RegistryError, Result};
use crate::merkle::merkle_root;
use crate::pow;
use crate::registry::{
    ApplyOutcome, NameRegistry, PeerDescriptor, RegistryConfig, RegistryRecord, RegistryStatus,
    RejectReason,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registry state held in memory.
///
/// Records are keyed by name in a `BTreeMap`, which keeps snapshots and the
/// merkle leaf order sorted without extra work.
pub struct MemoryRegistry {
    records: BTreeMap<String, RegistryRecord>,
    merkle_root: String,
    config: RegistryConfig,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new(
        config: RegistryConfig,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records: BTreeMap::new(),
            merkle_root: merkle_root(std::iter::empty()),
            config,
            verifier,
            clock,
        }
    }

    /// Ed25519 verification and the system clock.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::new(config, Arc::new(Ed25519Verifier), Arc::new(SystemClock))
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Number of stored records (live and tombstoned).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load previously persisted records without re-validating them.
    pub(crate) fn restore(&mut self, records: impl IntoIterator<Item = RegistryRecord>) {
        for record in records {
            self.records.insert(record.entry.name.clone(), record);
        }
        self.recompute_root();
    }

    /// Put back the record a name held before a write that could not be stored.
    pub(crate) fn revert(&mut self, name: &str, previous: Option<RegistryRecord>) {
        match previous {
            Some(record) => {
                self.records.insert(name.to_string(), record);
            }
            None => {
                self.records.remove(name);
            }
        }
        self.recompute_root();
    }

    fn check_pow(&self, entry: &Entry) -> Result<()> {
        let actual = pow::work(&entry.name, &entry.owner, entry.nonce);
        if actual < self.config.difficulty {
            return Err(RegistryError::InsufficientProofOfWork {
                required: self.config.difficulty,
                actual,
            });
        }
        Ok(())
    }

    fn check_signature(&self, entry: &Entry) -> Result<()> {
        if !entry.verify_signature(self.verifier.as_ref()) {
            return Err(RegistryError::InvalidSignature);
        }
        Ok(())
    }

    /// Clock-free validation shared by local admission and replication.
    fn validate(&self, entry: &Entry) -> Result<()> {
        entry.validate_shape()?;
        self.check_pow(entry)?;
        self.check_signature(entry)
    }

    /// Ownership and ordering checks for a local write against the stored record.
    fn check_supersedes(&self, entry: &Entry, existing: &RegistryRecord) -> Result<()> {
        if existing.entry.owner != entry.owner || existing.entry.public_key != entry.public_key {
            return Err(RegistryError::AlreadySignedDifferently {
                name: entry.name.clone(),
            });
        }
        Self::check_newer(entry, existing)
    }

    fn check_newer(entry: &Entry, existing: &RegistryRecord) -> Result<()> {
        if entry.timestamp <= existing.entry.timestamp {
            return Err(RegistryError::Stale {
                name: entry.name.clone(),
                timestamp: entry.timestamp,
                current: existing.entry.timestamp,
            });
        }
        Ok(())
    }

    /// Last-write-wins install. Returns true if the stored record changed.
    fn install(&mut self, kind: DeltaKind, entry: Entry) -> bool {
        let tombstone = kind.is_tombstone();
        let content_id = entry.content_id(tombstone);

        let version = match self.records.get(&entry.name) {
            Some(existing) => {
                let candidate = (
                    entry.timestamp,
                    entry.signature.as_str(),
                    tombstone,
                    content_id.as_str(),
                );
                if candidate <= existing.winner_key() {
                    return false;
                }
                existing.version + 1
            }
            None => 1,
        };

        let record = RegistryRecord {
            content_id,
            last_modified: self.clock.now_millis(),
            version,
            kind,
            tombstone,
            entry,
        };
        self.records.insert(record.entry.name.clone(), record);
        self.recompute_root();
        true
    }

    fn recompute_root(&mut self) {
        self.merkle_root = merkle_root(
            self.records
                .iter()
                .map(|(name, rec)| (name.as_str(), rec.content_id.as_str())),
        );
    }
}

impl NameRegistry for MemoryRegistry {
    fn register(&mut self, entry: Entry) -> Result<DeltaKind> {
        entry.validate_shape()?;
        let now = self.clock.now_millis();
        if entry.is_expired_at(now) {
            return Err(RegistryError::AlreadyExpired {
                expires: entry.expires,
            });
        }
        self.check_pow(&entry)?;
        self.check_signature(&entry)?;

        let kind = match self.records.get(&entry.name) {
            Some(existing) if existing.is_live_at(now) => {
                self.check_supersedes(&entry, existing)?;
                DeltaKind::Update
            }
            Some(existing) => {
                // Expired or tombstoned names are free, but the merge order still applies.
                Self::check_newer(&entry, existing)?;
                DeltaKind::Register
            }
            None => DeltaKind::Register,
        };

        let name = entry.name.clone();
        let timestamp = entry.timestamp;
        if !self.install(kind, entry) {
            let current = self.records.get(&name).map_or(0, |r| r.entry.timestamp);
            return Err(RegistryError::Stale {
                name,
                timestamp,
                current,
            });
        }
        debug!("Registered {} ({:?})", name, kind);
        Ok(kind)
    }

    fn expire(&mut self, entry: Entry) -> Result<()> {
        self.validate(&entry)?;
        let now = self.clock.now_millis();
        match self.records.get(&entry.name) {
            Some(existing) if existing.is_live_at(now) => self.check_supersedes(&entry, existing)?,
            _ => return Err(RegistryError::NotFound(entry.name.clone())),
        }

        let name = entry.name.clone();
        if !self.install(DeltaKind::Expire, entry) {
            return Err(RegistryError::NotFound(name));
        }
        debug!("Expired {}", name);
        Ok(())
    }

    fn apply_delta(&mut self, delta: &Delta) -> Result<ApplyOutcome> {
        if let Err(e) = self.validate(&delta.entry) {
            debug!(
                "Rejected delta for {} from {}: {}",
                delta.entry.name, delta.origin_peer_id, e
            );
            return Ok(ApplyOutcome::Rejected(RejectReason::Invalid(e.to_string())));
        }

        if self.install(delta.kind, delta.entry.clone()) {
            Ok(ApplyOutcome::Accepted)
        } else {
            Ok(ApplyOutcome::Rejected(RejectReason::Stale))
        }
    }

    fn resolve(&self, name: &str) -> Option<Entry> {
        let now = self.clock.now_millis();
        self.records
            .get(name)
            .filter(|rec| rec.is_live_at(now))
            .map(|rec| rec.entry.clone())
    }

    fn record(&self, name: &str) -> Option<RegistryRecord> {
        self.records.get(name).cloned()
    }

    fn status(&self) -> RegistryStatus {
        RegistryStatus {
            enabled: self.config.enabled,
            entry_count: self.records.len(),
            merkle_root: self.merkle_root.clone(),
        }
    }

    fn peers(&self) -> Vec<PeerDescriptor> {
        let now = self.clock.now_millis();
        self.records
            .values()
            .filter(|rec| rec.is_live_at(now))
            .filter_map(RegistryRecord::peer_descriptor)
            .collect()
    }

    fn snapshot(&self) -> Vec<RegistryRecord> {
        self.records.values().cloned().collect()
    }

    fn merkle_root(&self) -> String {
        self.merkle_root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::Identity;
    use crate::entry::{Record, RecordKind};
    use proptest::prelude::*;

    const DIFFICULTY: u32 = 8;
    const NOW: u64 = 1_000_000;

    fn registry(clock: Arc<ManualClock>) -> MemoryRegistry {
        MemoryRegistry::new(
            RegistryConfig {
                difficulty: DIFFICULTY,
                enabled: true,
            },
            Arc::new(Ed25519Verifier),
            clock,
        )
    }

    fn fresh() -> MemoryRegistry {
        registry(Arc::new(ManualClock::new(NOW)))
    }

    fn entry(identity: &Identity, name: &str, value: &str, timestamp: u64) -> Entry {
        let owner = identity.owner_id();
        let nonce = pow::solve(name, &owner, DIFFICULTY).unwrap();
        Entry::new(
            name,
            owner,
            vec![Record::new(RecordKind::Txt, value)],
            nonce,
            timestamp,
            timestamp + 1_000_000,
        )
        .signed_by(identity)
    }

    fn delta(kind: DeltaKind, entry: Entry) -> Delta {
        Delta::new(kind, entry, "test-origin", NOW)
    }

    fn alice() -> Identity {
        Identity::from_seed([1u8; 32])
    }

    fn bob() -> Identity {
        Identity::from_seed([2u8; 32])
    }

    #[test]
    fn register_and_resolve() {
        let mut reg = fresh();
        let e = entry(&alice(), "alice.vfs", "v1", NOW);
        assert_eq!(reg.register(e.clone()).unwrap(), DeltaKind::Register);
        assert_eq!(reg.resolve("alice.vfs"), Some(e));
        assert_eq!(reg.status().entry_count, 1);
        assert_eq!(reg.record("alice.vfs").unwrap().version, 1);
    }

    #[test]
    fn revert_restores_previous_state() {
        let mut reg = fresh();
        reg.register(entry(&alice(), "alice.vfs", "v1", NOW)).unwrap();
        let before = reg.record("alice.vfs");
        let root = reg.merkle_root();

        reg.register(entry(&alice(), "alice.vfs", "v2", NOW + 1)).unwrap();
        reg.register(entry(&bob(), "bob.vfs", "b", NOW)).unwrap();
        reg.revert("alice.vfs", before.clone());
        reg.revert("bob.vfs", None);

        assert_eq!(reg.record("alice.vfs"), before);
        assert!(reg.record("bob.vfs").is_none());
        assert_eq!(reg.merkle_root(), root);
    }

    #[test]
    fn resolve_missing() {
        assert!(fresh().resolve("nobody.vfs").is_none());
    }

    #[test]
    fn pow_gate() {
        let mut reg = fresh();
        let id = alice();
        let owner = id.owner_id();
        let weak = (0..)
            .find(|&n| pow::work("alice.vfs", &owner, n) < DIFFICULTY)
            .unwrap();
        let e = Entry::new("alice.vfs", owner.clone(), vec![], weak, NOW, NOW + 10).signed_by(&id);
        assert!(matches!(
            reg.register(e),
            Err(RegistryError::InsufficientProofOfWork { required: DIFFICULTY, .. })
        ));

        let strong = pow::solve("alice.vfs", &owner, DIFFICULTY).unwrap();
        let e = Entry::new("alice.vfs", owner, vec![], strong, NOW, NOW + 10).signed_by(&id);
        assert!(reg.register(e).is_ok());
    }

    #[test]
    fn default_difficulty_gate() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut reg =
            MemoryRegistry::new(RegistryConfig::default(), Arc::new(Ed25519Verifier), clock);
        let id = alice();
        let owner = id.owner_id();
        let nonce = pow::solve("alice.vfs", &owner, pow::DEFAULT_DIFFICULTY).unwrap();
        let e = Entry::new("alice.vfs", owner, vec![], nonce, NOW, NOW + 10).signed_by(&id);
        assert!(reg.register(e).is_ok());
    }

    #[test]
    fn bad_signature_is_distinct_from_pow() {
        let mut reg = fresh();
        let mut e = entry(&alice(), "alice.vfs", "v1", NOW);
        e.records.push(Record::role("peer"));
        assert!(matches!(reg.register(e), Err(RegistryError::InvalidSignature)));
    }

    #[test]
    fn foreign_key_signature_rejected() {
        let mut reg = fresh();
        let mut e = entry(&alice(), "alice.vfs", "v1", NOW);
        e.public_key = bob().public_key_hex();
        assert!(matches!(reg.register(e), Err(RegistryError::InvalidSignature)));
    }

    #[test]
    fn already_expired() {
        let mut reg = fresh();
        let id = alice();
        let owner = id.owner_id();
        let nonce = pow::solve("alice.vfs", &owner, DIFFICULTY).unwrap();
        let e = Entry::new("alice.vfs", owner, vec![], nonce, NOW - 100, NOW).signed_by(&id);
        assert!(matches!(reg.register(e), Err(RegistryError::AlreadyExpired { .. })));
    }

    #[test]
    fn update_requires_same_owner() {
        let mut reg = fresh();
        reg.register(entry(&alice(), "alice.vfs", "v1", NOW)).unwrap();
        let err = reg.register(entry(&bob(), "alice.vfs", "v2", NOW + 1)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadySignedDifferently { .. }));
    }

    #[test]
    fn update_requires_newer_timestamp() {
        let mut reg = fresh();
        reg.register(entry(&alice(), "alice.vfs", "v1", NOW)).unwrap();
        assert!(matches!(
            reg.register(entry(&alice(), "alice.vfs", "v0", NOW)),
            Err(RegistryError::Stale { .. })
        ));

        let kind = reg.register(entry(&alice(), "alice.vfs", "v2", NOW + 1)).unwrap();
        assert_eq!(kind, DeltaKind::Update);
        assert_eq!(reg.record("alice.vfs").unwrap().version, 2);
        assert_eq!(reg.resolve("alice.vfs").unwrap().records[0].value, "v2");
    }

    #[test]
    fn expired_name_can_be_reclaimed() {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut reg = registry(clock.clone());
        reg.register(entry(&alice(), "alice.vfs", "v1", NOW)).unwrap();

        clock.advance(2_000_000);
        assert!(reg.resolve("alice.vfs").is_none());

        let later = NOW + 2_000_001;
        let kind = reg.register(entry(&bob(), "alice.vfs", "bob", later)).unwrap();
        assert_eq!(kind, DeltaKind::Register);
        assert_eq!(reg.resolve("alice.vfs").unwrap().owner, bob().owner_id());
    }

    #[test]
    fn expire_tombstones() {
        let mut reg = fresh();
        reg.register(entry(&alice(), "alice.vfs", "v1", NOW)).unwrap();
        let root_before = reg.merkle_root();

        reg.expire(entry(&alice(), "alice.vfs", "gone", NOW + 1)).unwrap();
        assert!(reg.resolve("alice.vfs").is_none());
        let rec = reg.record("alice.vfs").unwrap();
        assert!(rec.tombstone);
        assert_eq!(rec.kind, DeltaKind::Expire);
        assert_ne!(reg.merkle_root(), root_before);
    }

    #[test]
    fn expire_requires_owner() {
        let mut reg = fresh();
        reg.register(entry(&alice(), "alice.vfs", "v1", NOW)).unwrap();
        assert!(matches!(
            reg.expire(entry(&bob(), "alice.vfs", "x", NOW + 1)),
            Err(RegistryError::AlreadySignedDifferently { .. })
        ));
        assert!(matches!(
            reg.expire(entry(&alice(), "other.vfs", "x", NOW + 1)),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn apply_rejects_invalid() {
        let mut reg = fresh();
        let mut e = entry(&alice(), "alice.vfs", "v1", NOW);
        e.signature = "00".repeat(64);
        let outcome = reg.apply_delta(&delta(DeltaKind::Register, e)).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Rejected(RejectReason::Invalid(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn apply_does_not_check_ownership() {
        // Ownership is an admission rule; replication is pure LWW.
        let mut reg = fresh();
        reg.apply_delta(&delta(DeltaKind::Register, entry(&alice(), "x.vns", "a", NOW)))
            .unwrap();
        let outcome = reg
            .apply_delta(&delta(DeltaKind::Register, entry(&bob(), "x.vns", "b", NOW + 1)))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Accepted);
        assert_eq!(reg.resolve("x.vns").unwrap().owner, bob().owner_id());
    }

    #[test]
    fn idempotent_apply() {
        let mut reg = fresh();
        let d = delta(DeltaKind::Register, entry(&alice(), "alice.vfs", "v1", NOW));
        assert_eq!(reg.apply_delta(&d).unwrap(), ApplyOutcome::Accepted);
        let root = reg.merkle_root();
        let version = reg.record("alice.vfs").unwrap().version;

        assert_eq!(reg.apply_delta(&d).unwrap(), ApplyOutcome::Rejected(RejectReason::Stale));
        assert_eq!(reg.merkle_root(), root);
        assert_eq!(reg.record("alice.vfs").unwrap().version, version);
    }

    #[test]
    fn lww_either_order() {
        let old = delta(DeltaKind::Register, entry(&alice(), "alice.vfs", "t1", NOW));
        let new = delta(DeltaKind::Update, entry(&alice(), "alice.vfs", "t2", NOW + 5));

        let mut a = fresh();
        a.apply_delta(&old).unwrap();
        a.apply_delta(&new).unwrap();

        let mut b = fresh();
        b.apply_delta(&new).unwrap();
        assert_eq!(b.apply_delta(&old).unwrap(), ApplyOutcome::Rejected(RejectReason::Stale));

        assert_eq!(a.resolve("alice.vfs").unwrap().records[0].value, "t2");
        assert_eq!(b.resolve("alice.vfs").unwrap().records[0].value, "t2");
        assert_eq!(a.merkle_root(), b.merkle_root());
    }

    #[test]
    fn equal_timestamp_tie_break() {
        let x = delta(DeltaKind::Register, entry(&alice(), "tie.vns", "alice", NOW));
        let y = delta(DeltaKind::Register, entry(&bob(), "tie.vns", "bob", NOW));
        let expected = if x.entry.signature > y.entry.signature { &x } else { &y };

        let mut a = fresh();
        a.apply_delta(&x).unwrap();
        a.apply_delta(&y).unwrap();
        let mut b = fresh();
        b.apply_delta(&y).unwrap();
        b.apply_delta(&x).unwrap();

        assert_eq!(a.resolve("tie.vns").as_ref(), Some(&expected.entry));
        assert_eq!(b.resolve("tie.vns").as_ref(), Some(&expected.entry));
        assert_eq!(a.merkle_root(), b.merkle_root());
    }

    #[test]
    fn tombstone_beats_same_entry() {
        let e = entry(&alice(), "alice.vfs", "v1", NOW);
        let live = delta(DeltaKind::Register, e.clone());
        let dead = delta(DeltaKind::Expire, e);

        let mut a = fresh();
        a.apply_delta(&live).unwrap();
        a.apply_delta(&dead).unwrap();
        let mut b = fresh();
        b.apply_delta(&dead).unwrap();
        b.apply_delta(&live).unwrap();

        assert!(a.resolve("alice.vfs").is_none());
        assert!(b.resolve("alice.vfs").is_none());
        assert_eq!(a.merkle_root(), b.merkle_root());
    }

    #[test]
    fn status_and_peers() {
        let mut reg = fresh();
        let id = alice();
        let owner = id.owner_id();
        let nonce = pow::solve("bootstrap.vns", &owner, DIFFICULTY).unwrap();
        let e = Entry::new(
            "bootstrap.vns",
            owner,
            vec![Record::role("bootstrap"), Record::endpoint("http://10.1.1.1:3001")],
            nonce,
            NOW,
            NOW + 10_000,
        )
        .signed_by(&id);
        reg.register(e).unwrap();
        reg.register(entry(&alice(), "plain.vfs", "x", NOW)).unwrap();

        let status = reg.status();
        assert!(status.enabled);
        assert_eq!(status.entry_count, 2);
        assert_eq!(status.merkle_root, reg.merkle_root());

        let peers = reg.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "bootstrap.vns");
        assert_eq!(peers[0].ip, "10.1.1.1");
        assert_eq!(peers[0].port, 3001);
        assert_eq!(peers[0].public_key.as_deref(), Some(id.public_key_hex().as_str()));
    }

    #[test]
    fn snapshot_replays_to_same_root() {
        let mut a = fresh();
        a.register(entry(&alice(), "a.vns", "1", NOW)).unwrap();
        a.register(entry(&bob(), "b.vns", "2", NOW)).unwrap();
        a.expire(entry(&bob(), "b.vns", "x", NOW + 1)).unwrap();

        let mut b = fresh();
        for rec in a.snapshot() {
            assert!(b.apply_delta(&rec.to_delta("a")).unwrap().is_accepted());
        }
        assert_eq!(a.merkle_root(), b.merkle_root());
        assert!(b.resolve("b.vns").is_none());
    }

    fn pool() -> Vec<Delta> {
        let ids = [alice(), bob(), Identity::from_seed([3u8; 32])];
        let mut out = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            for (j, name) in ["x.vns", "y.vns"].iter().enumerate() {
                let ts = NOW + ((i + j) % 2) as u64;
                out.push(delta(DeltaKind::Register, entry(id, name, &format!("{i}{j}"), ts)));
                out.push(delta(DeltaKind::Expire, entry(id, name, "gone", ts + 1)));
            }
        }
        out
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn converges_under_any_order_and_duplication(
            order_a in proptest::collection::vec(0usize..12, 1..40),
            order_b in proptest::collection::vec(0usize..12, 1..40),
        ) {
            let deltas = pool();
            let mut a = fresh();
            let mut b = fresh();

            // Both replicas observe the same set: the union of both index streams.
            for &i in order_a.iter().chain(order_b.iter()) {
                a.apply_delta(&deltas[i]).unwrap();
            }
            for &i in order_b.iter().rev().chain(order_a.iter().rev()) {
                b.apply_delta(&deltas[i]).unwrap();
            }

            prop_assert_eq!(a.merkle_root(), b.merkle_root());
            prop_assert_eq!(a.snapshot().len(), b.snapshot().len());
        }
    }
}
