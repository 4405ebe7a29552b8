//! Local write path: builds node-signed entries and admits them.

use crate::bootstrap::normalize_peer_url;
use crate::error::Result;
use crate::SharedRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vns_registry::{
    pow, Clock, Delta, DeltaKind, Entry, Identity, Record, RecordKind, RegistryError,
    RegistryRecord,
};

/// Rebuilds allowed when concurrent writes keep changing the stored record.
const MAX_BUILD_ATTEMPTS: usize = 3;

/// An accepted local write and the delta to replicate.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: DeltaKind,
    pub delta: Delta,
    pub merkle_root: String,
}

/// Signs and admits writes made through this node.
///
/// Value registrations produce entries owned by the node identity. Posting a
/// URL under a name the node already owns adds another ENDPOINT record, which
/// is how several bootstrap nodes end up advertised under one name.
pub struct LocalRegistrar {
    registry: SharedRegistry,
    identity: Identity,
    node_id: String,
    clock: Arc<dyn Clock>,
    difficulty: u32,
    entry_ttl_ms: u64,
}

impl LocalRegistrar {
    pub fn new(
        registry: SharedRegistry,
        identity: Identity,
        clock: Arc<dyn Clock>,
        difficulty: u32,
        entry_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            node_id: identity.owner_id(),
            identity,
            clock,
            difficulty,
            entry_ttl_ms: entry_ttl.as_millis() as u64,
        }
    }

    /// Identifier this node stamps on the deltas it originates.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Register `value` under `name` in a node-owned entry.
    ///
    /// The nonce is solved on the blocking pool without holding the registry
    /// lock. If the stored record changes meanwhile, the entry is rebuilt.
    pub async fn register_value(
        &self,
        name: &str,
        value: &str,
        role: Option<&str>,
    ) -> Result<Mutation> {
        for _ in 0..MAX_BUILD_ATTEMPTS {
            let now = self.clock.now_millis();
            let existing = self.registry.read().await.record(name);

            let builder = self.builder();
            let (name_owned, value_owned) = (name.to_string(), value.to_string());
            let role_owned = role.map(str::to_string);
            let basis = existing.clone();
            let entry = tokio::task::spawn_blocking(move || {
                let role = role_owned.as_deref();
                builder.build(&name_owned, &value_owned, role, basis.as_ref(), now)
            })
            .await??;

            let mut registry = self.registry.write().await;
            if registry.record(name) != existing {
                debug!("Record for {} changed while building, retrying", name);
                continue;
            }
            let kind = registry.register(entry.clone())?;
            let merkle_root = registry.merkle_root();
            drop(registry);

            info!("Registered {} = {} ({:?})", name, value, kind);
            return Ok(self.mutation(kind, entry, merkle_root, now));
        }
        let current = self.registry.read().await.record(name);
        Err(RegistryError::Stale {
            name: name.to_string(),
            timestamp: self.clock.now_millis(),
            current: current.map_or(0, |rec| rec.entry.timestamp),
        }
        .into())
    }

    /// Admit a client-signed entry.
    pub async fn submit(&self, entry: Entry) -> Result<Mutation> {
        let now = self.clock.now_millis();
        let mut registry = self.registry.write().await;
        let kind = registry.register(entry.clone())?;
        let merkle_root = registry.merkle_root();
        drop(registry);

        info!("Accepted signed entry {} ({:?})", entry.name, kind);
        Ok(self.mutation(kind, entry, merkle_root, now))
    }

    /// Tombstone a name with an owner-signed entry.
    pub async fn expire(&self, entry: Entry) -> Result<Mutation> {
        let now = self.clock.now_millis();
        let mut registry = self.registry.write().await;
        registry.expire(entry.clone())?;
        let merkle_root = registry.merkle_root();
        drop(registry);

        info!("Expired {}", entry.name);
        Ok(self.mutation(DeltaKind::Expire, entry, merkle_root, now))
    }

    fn mutation(&self, kind: DeltaKind, entry: Entry, merkle_root: String, now: u64) -> Mutation {
        Mutation {
            kind,
            delta: Delta::new(kind, entry, self.node_id.clone(), now),
            merkle_root,
        }
    }

    fn builder(&self) -> EntryBuilder {
        EntryBuilder {
            identity: self.identity.clone(),
            owner: self.node_id.clone(),
            difficulty: self.difficulty,
            entry_ttl_ms: self.entry_ttl_ms,
        }
    }
}

/// Everything needed to build a node-signed entry away from the registry lock.
struct EntryBuilder {
    identity: Identity,
    owner: String,
    difficulty: u32,
    entry_ttl_ms: u64,
}

impl EntryBuilder {
    /// Build the next node-signed entry for `name` given the stored record.
    fn build(
        &self,
        name: &str,
        value: &str,
        role: Option<&str>,
        existing: Option<&RegistryRecord>,
        now: u64,
    ) -> Result<Entry> {
        let owner = self.owner.clone();
        let owned = existing.filter(|rec| rec.entry.owner == owner);

        let mut records = owned
            .filter(|rec| rec.is_live_at(now))
            .map(|rec| rec.entry.records.clone())
            .unwrap_or_default();

        match normalize_peer_url(value) {
            Some(url) => {
                if !records.iter().any(|r| r.kind == RecordKind::Endpoint && r.value == url) {
                    records.push(Record::endpoint(url));
                }
            }
            None => {
                records.retain(|r| r.kind != RecordKind::Txt);
                records.push(Record::new(RecordKind::Txt, value));
            }
        }
        if let Some(role) = role {
            records.retain(|r| r.kind != RecordKind::Role);
            records.push(Record::role(role));
        }

        let timestamp = match existing {
            Some(rec) => rec
                .entry
                .timestamp
                .checked_add(1)
                .map(|next| now.max(next))
                .ok_or_else(|| RegistryError::Stale {
                    name: name.to_string(),
                    timestamp: now,
                    current: rec.entry.timestamp,
                })?,
            None => now,
        };
        let expires = timestamp.checked_add(self.entry_ttl_ms).ok_or_else(|| {
            RegistryError::Malformed(format!("expiry overflows for timestamp {}", timestamp))
        })?;

        // The puzzle binds name and owner only, so a previous solution still holds.
        let nonce = match owned.map(|rec| rec.entry.nonce) {
            Some(nonce) if pow::meets_difficulty(name, &owner, nonce, self.difficulty) => nonce,
            _ => pow::solve(name, &owner, self.difficulty).ok_or(
                RegistryError::InsufficientProofOfWork {
                    required: self.difficulty,
                    actual: 0,
                },
            )?,
        };

        Ok(Entry::new(name, owner, records, nonce, timestamp, expires).signed_by(&self.identity))
    }
}
