//! Error types for the registry.

use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The name is held by a different owner or key.
    #[error("name {name} is already registered by a different owner")]
    AlreadySignedDifferently { name: String },

    /// Signature does not verify against the entry's public key.
    #[error("signature does not verify against the entry public key")]
    InvalidSignature,

    /// Nonce does not solve the registration puzzle.
    #[error("insufficient proof of work: need {required} leading zero bits, got {actual}")]
    InsufficientProofOfWork { required: u32, actual: u32 },

    /// Entry expiry is already in the past.
    #[error("entry already expired at {expires}")]
    AlreadyExpired { expires: u64 },

    /// Write does not supersede the stored record.
    #[error("stale write for {name}: timestamp {timestamp} does not supersede {current}")]
    Stale {
        name: String,
        timestamp: u64,
        current: u64,
    },

    /// Entry shape is invalid (bad name, expiry before timestamp, missing fields).
    #[error("malformed entry: {0}")]
    Malformed(String),

    /// No live record for the name.
    #[error("name not found: {0}")]
    NotFound(String),

    /// Key material could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Whether the error is a validation failure the caller must fix
    /// (as opposed to a stale write or a backend fault).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegistryError::InvalidSignature
                | RegistryError::InsufficientProofOfWork { .. }
                | RegistryError::AlreadyExpired { .. }
                | RegistryError::Malformed(_)
        )
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for RegistryError {
    fn from(e: rocksdb::Error) -> Self {
        RegistryError::Storage(e.to_string())
    }
}
