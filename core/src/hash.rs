//! SHA-256 and HMAC-SHA-256 primitives for consensus-critical operations.
//!
//! All hashing is deterministic and reproducible across platforms.
//! Raw byte concatenations on hash preimages use big-endian integers.

use crate::errors::{ConsensusError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Compute SHA-256 hash of arbitrary bytes
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 of multiple byte slices (concatenated)
pub fn sha256_multi(data_slices: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for slice in data_slices {
        hasher.update(slice);
    }
    hasher.finalize().into()
}

/// Compute HMAC-SHA-256 over concatenated message slices
pub fn hmac_sha256(key: &[u8], msg_slices: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| ConsensusError::Hmac(e.to_string()))?;
    for slice in msg_slices {
        mac.update(slice);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time HMAC-SHA-256 comparison against an expected tag
pub fn hmac_sha256_verify(key: &[u8], msg_slices: &[&[u8]], expected: &[u8; 32]) -> Result<bool> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| ConsensusError::Hmac(e.to_string()))?;
    for slice in msg_slices {
        mac.update(slice);
    }
    Ok(mac.verify_slice(expected).is_ok())
}

/// Derive address from public key: address = SHA-256(pubkey).
///
/// Human-facing prefixes are presentation only; consensus sees 32 bytes.
pub fn derive_address(pubkey: &[u8; 32]) -> [u8; 32] {
    sha256(pubkey)
}
