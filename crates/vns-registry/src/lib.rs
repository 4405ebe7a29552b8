//! VNS Name Registry
//!
//! An eventually consistent registry mapping human-readable, dot-namespaced
//! names (`alice.vfs`, `bootstrap.vns`) to owner-signed entries.
//!
//! # Design
//!
//! Every replica holds one [`RegistryRecord`] per name. Replicas exchange
//! [`Delta`]s and merge them with last-write-wins semantics. The winner of
//! two writes for the same name is decided by a total order over
//! `(timestamp, signature, tombstone, content id)`, so any two replicas that
//! have seen the same set of deltas hold the same map, whatever the delivery
//! order or duplication.
//!
//! # Admission
//!
//! An entry is admitted only if
//!
//! - its Ed25519 signature verifies over the canonical serialization, and
//! - `sha256(name:owner:nonce)` has at least `D` leading zero bits
//!   (default `D = 12`, three leading hex zeros).
//!
//! # Convergence Check
//!
//! The merkle root is a Blake3 hash over the sorted `(name, content id)`
//! pairs. Two replicas with equal roots hold identical state.

mod clock;
mod crypto;
mod delta;
mod entry;
mod error;
mod memory;
mod merkle;
#[cfg(feature = "rocksdb")]
mod persistent;
pub mod pow;
mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{owner_id_from_public_key, Ed25519Verifier, Identity, SignatureVerifier};
pub use delta::{Delta, DeltaKind};
pub use entry::{validate_name, Entry, Record, RecordKind};
pub use error::{RegistryError, Result};
pub use memory::MemoryRegistry;
pub use merkle::merkle_root;
#[cfg(feature = "rocksdb")]
pub use persistent::RocksRegistry;
pub use registry::{
    ApplyOutcome, NameRegistry, PeerDescriptor, RegistryConfig, RegistryRecord, RegistryStatus,
    RejectReason,
};
