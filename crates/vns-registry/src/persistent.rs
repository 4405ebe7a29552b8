//! Persistent registry backend using RocksDB.
//!
//! Records live in memory for reads; every accepted write is also stored under
//! `record:{name}` and reloaded on open.

use crate::clock::Clock;
use crate::crypto::{Identity, SignatureVerifier};
use crate::delta::{Delta, DeltaKind};
use crate::entry::Entry;
use crate::error::{RegistryError, Result};
use crate::memory::MemoryRegistry;
use crate::registry::{
    ApplyOutcome, NameRegistry, PeerDescriptor, RegistryConfig, RegistryRecord, RegistryStatus,
};
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const RECORD_PREFIX: &[u8] = b"record:";
const NODE_KEY: &[u8] = b"node:signing_key";

/// Registry backed by RocksDB.
pub struct RocksRegistry {
    inner: MemoryRegistry,
    db: DB,
}

impl RocksRegistry {
    /// Open or create storage at the given path and load stored records.
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: RegistryConfig,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Self::with_db(db, config, verifier, clock)
    }

    /// Wrap an opened database and load stored records.
    fn with_db(
        db: DB,
        config: RegistryConfig,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut records = Vec::new();
        for item in db.prefix_iterator(RECORD_PREFIX) {
            let (key, value) = item?;
            if !key.starts_with(RECORD_PREFIX) {
                break;
            }
            let record: RegistryRecord = serde_json::from_slice(&value)?;
            records.push(record);
        }

        let mut inner = MemoryRegistry::new(config, verifier, clock);
        inner.restore(records);
        info!("Loaded {} registry records from disk", inner.len());

        Ok(Self { inner, db })
    }

    /// Get or create the node's signing identity.
    pub fn node_identity(&self) -> Result<Identity> {
        if let Some(data) = self.db.get(NODE_KEY)? {
            let seed: [u8; 32] = data
                .as_slice()
                .try_into()
                .map_err(|_| RegistryError::Storage("invalid stored node key".into()))?;
            Ok(Identity::from_seed(seed))
        } else {
            let identity = Identity::generate();
            self.db.put(NODE_KEY, identity.seed())?;
            Ok(identity)
        }
    }

    fn persist(&self, name: &str) -> Result<()> {
        if let Some(record) = self.inner.record(name) {
            let key = format!("record:{}", name);
            self.db.put(key.as_bytes(), serde_json::to_vec(&record)?)?;
        }
        Ok(())
    }

    /// Store the record for `name`, or undo the in-memory write if that fails.
    fn commit(&mut self, name: &str, previous: Option<RegistryRecord>) -> Result<()> {
        if let Err(e) = self.persist(name) {
            warn!("Failed to store {}, reverting: {}", name, e);
            self.inner.revert(name, previous);
            return Err(e);
        }
        Ok(())
    }
}

impl NameRegistry for RocksRegistry {
    fn register(&mut self, entry: Entry) -> Result<DeltaKind> {
        let name = entry.name.clone();
        let previous = self.inner.record(&name);
        let kind = self.inner.register(entry)?;
        self.commit(&name, previous)?;
        Ok(kind)
    }

    fn expire(&mut self, entry: Entry) -> Result<()> {
        let name = entry.name.clone();
        let previous = self.inner.record(&name);
        self.inner.expire(entry)?;
        self.commit(&name, previous)
    }

    fn apply_delta(&mut self, delta: &Delta) -> Result<ApplyOutcome> {
        let previous = self.inner.record(&delta.entry.name);
        let outcome = self.inner.apply_delta(delta)?;
        if outcome.is_accepted() {
            self.commit(&delta.entry.name, previous)?;
        }
        Ok(outcome)
    }

    fn resolve(&self, name: &str) -> Option<Entry> {
        self.inner.resolve(name)
    }

    fn record(&self, name: &str) -> Option<RegistryRecord> {
        self.inner.record(name)
    }

    fn status(&self) -> RegistryStatus {
        self.inner.status()
    }

    fn peers(&self) -> Vec<PeerDescriptor> {
        self.inner.peers()
    }

    fn snapshot(&self) -> Vec<RegistryRecord> {
        self.inner.snapshot()
    }

    fn merkle_root(&self) -> String {
        self.inner.merkle_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::Ed25519Verifier;
    use crate::entry::Record;
    use crate::pow;
    use tempfile::tempdir;

    const NOW: u64 = 5_000;

    fn open(path: &Path) -> RocksRegistry {
        RocksRegistry::open(
            path,
            RegistryConfig {
                difficulty: 4,
                enabled: true,
            },
            Arc::new(Ed25519Verifier),
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap()
    }

    fn entry(identity: &Identity, name: &str, timestamp: u64) -> Entry {
        let owner = identity.owner_id();
        let nonce = pow::solve(name, &owner, 4).unwrap();
        let records = vec![Record::endpoint("http://a:1")];
        Entry::new(name, owner, records, nonce, timestamp, timestamp + 10_000).signed_by(identity)
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = Identity::from_seed([4u8; 32]);
        let root = {
            let mut reg = open(dir.path());
            reg.register(entry(&id, "a.vns", NOW)).unwrap();
            reg.register(entry(&id, "b.vns", NOW)).unwrap();
            reg.expire(entry(&id, "b.vns", NOW + 1)).unwrap();
            reg.merkle_root()
        };

        let reg = open(dir.path());
        assert_eq!(reg.status().entry_count, 2);
        assert_eq!(reg.merkle_root(), root);
        assert!(reg.resolve("a.vns").is_some());
        assert!(reg.resolve("b.vns").is_none());
    }

    #[test]
    fn rejected_delta_not_persisted() {
        let dir = tempdir().unwrap();
        {
            let mut reg = open(dir.path());
            let mut e = entry(&Identity::from_seed([4u8; 32]), "a.vns", NOW);
            e.timestamp += 1;
            let d = Delta::new(DeltaKind::Register, e, "x", NOW);
            assert!(!reg.apply_delta(&d).unwrap().is_accepted());
        }
        assert_eq!(open(dir.path()).status().entry_count, 0);
    }

    #[test]
    fn node_identity_is_stable() {
        let dir = tempdir().unwrap();
        let first = open(dir.path()).node_identity().unwrap().public_key_hex();
        let second = open(dir.path()).node_identity().unwrap().public_key_hex();
        assert_eq!(first, second);
    }

    #[test]
    fn failed_write_is_reverted_in_memory() {
        let dir = tempdir().unwrap();
        let id = Identity::from_seed([4u8; 32]);
        let root = {
            let mut reg = open(dir.path());
            reg.register(entry(&id, "a.vns", NOW)).unwrap();
            reg.merkle_root()
        };

        // A read-only handle rejects every put.
        let db = DB::open_for_read_only(&Options::default(), dir.path(), false).unwrap();
        let mut reg = RocksRegistry::with_db(
            db,
            RegistryConfig {
                difficulty: 4,
                enabled: true,
            },
            Arc::new(Ed25519Verifier),
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();

        assert!(matches!(
            reg.register(entry(&id, "a.vns", NOW + 1)),
            Err(RegistryError::Storage(_))
        ));
        assert!(matches!(
            reg.register(entry(&id, "b.vns", NOW)),
            Err(RegistryError::Storage(_))
        ));
        let d = Delta::new(DeltaKind::Register, entry(&id, "c.vns", NOW), "x", NOW);
        assert!(reg.apply_delta(&d).is_err());

        assert_eq!(reg.merkle_root(), root);
        assert_eq!(reg.status().entry_count, 1);
        assert_eq!(reg.resolve("a.vns").unwrap().timestamp, NOW);
        assert!(reg.record("b.vns").is_none());
    }
}
