//! Signing and verification capabilities.

use crate::error::{RegistryError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Signature verification capability.
///
/// Signatures and public keys travel as hex strings.
pub trait SignatureVerifier: Send + Sync {
    /// Return true iff `signature` is valid for `message` under `public_key`.
    fn verify(&self, message: &[u8], signature: &str, public_key: &str) -> bool;
}

/// Ed25519 verifier (strict verification).
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &str, public_key: &str) -> bool {
        let Ok(key_bytes) = hex::decode(public_key) else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        key.verify_strict(message, &sig).is_ok()
    }
}

/// Compute an owner ID from raw public key bytes using double-BLAKE3.
/// hash₁ = BLAKE3(pubkey), hash₂ = BLAKE3(hash₁), owner = "b3b3/{hash₂}"
pub fn owner_id_from_public_key(pubkey_bytes: &[u8]) -> String {
    let hash1 = blake3::hash(pubkey_bytes);
    let hash2 = blake3::hash(hash1.as_bytes());
    format!("b3b3/{}", hex::encode(hash2.as_bytes()))
}

/// An Ed25519 signing identity.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic identity from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Identity from a hex-encoded 32-byte seed.
    pub fn from_hex(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| RegistryError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| {
                RegistryError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
            })?;
        Ok(Self::from_seed(seed))
    }

    /// The 32-byte secret seed (for persistence).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Hex-encoded public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Owner ID derived from the public key.
    pub fn owner_id(&self) -> String {
        owner_id_from_public_key(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign a message, returning the hex signature.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("owner", &self.owner_id())
            .finish_non_exhaustive()
    }
}
