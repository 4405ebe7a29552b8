//! Registration proof-of-work.
//!
//! A nonce is valid for `(name, owner)` when `SHA256(name:owner:nonce)` has
//! at least `difficulty` leading zero bits. The puzzle binds the name and the
//! owner but not the timestamp, so an owner solves it once per name and
//! reuses the nonce for every later update.

use sha2::{Digest, Sha256};

/// Default difficulty: 12 bits, three leading hex zeros.
pub const DEFAULT_DIFFICULTY: u32 = 12;

/// Bits in a SHA-256 digest; no nonce can do better.
pub const MAX_DIFFICULTY: u32 = 256;

/// Hash the puzzle input for a nonce.
pub fn pow_hash(name: &str, owner: &str, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(owner.as_bytes());
    hasher.update(b":");
    hasher.update(nonce.to_string().as_bytes());
    hasher.finalize().into()
}

/// Count leading zero bits in a byte slice.
pub fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut count = 0;
    for &byte in bytes {
        if byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros();
            break;
        }
    }
    count
}

/// Leading zero bits achieved by a nonce.
pub fn work(name: &str, owner: &str, nonce: u64) -> u32 {
    leading_zero_bits(&pow_hash(name, owner, nonce))
}

/// Whether a nonce meets the difficulty.
pub fn meets_difficulty(name: &str, owner: &str, nonce: u64, difficulty: u32) -> bool {
    work(name, owner, nonce) >= difficulty
}

/// Search nonces from zero upward. Expected cost is `2^difficulty` hashes.
///
/// Returns `None` at once for a difficulty no digest can meet.
pub fn solve(name: &str, owner: &str, difficulty: u32) -> Option<u64> {
    if difficulty > MAX_DIFFICULTY {
        return None;
    }
    (0..=u64::MAX).find(|&nonce| meets_difficulty(name, owner, nonce, difficulty))
}
