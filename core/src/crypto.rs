//! Ed25519 signing primitives and header signature checks.

use crate::codec::header_hash;
use crate::errors::{ConsensusError, Result};
use crate::hash::derive_address;
use crate::types::BlockHeader;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Ed25519 key pair for block signing
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        KeyPair {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Deterministic key from a 32-byte seed (tests, key files)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn address(&self) -> [u8; 32] {
        derive_address(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verify an Ed25519 signature over a message
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| ConsensusError::SignatureInvalid)?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify(message, &sig)
        .map_err(|_| ConsensusError::SignatureInvalid)
}

/// Verify a header's miner signature and its address derivation.
///
/// `miner_address` must be the canonical SHA-256 of `miner_public_key`,
/// and the signature must verify over the header hash.
pub fn verify_header_signature(header: &BlockHeader) -> Result<()> {
    if header.miner_address != derive_address(&header.miner_public_key) {
        return Err(ConsensusError::AddressMismatch);
    }

    let hash = header_hash(header)?;
    verify_signature(&header.miner_public_key, &hash, &header.miner_signature)
}

/// Fill in key, address, and signature on a freshly built header
pub fn sign_header(header: &mut BlockHeader, keypair: &KeyPair) -> Result<()> {
    header.miner_public_key = keypair.public_key();
    header.miner_address = keypair.address();

    let hash = header_hash(header)?;
    header.miner_signature = keypair.sign(&hash);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HardwareTier, CODEC_VERSION};

    fn sample_header() -> BlockHeader {
        BlockHeader {
            codec_version: CODEC_VERSION,
            block_index: 7,
            timestamp: 1_700_000_000,
            tier: HardwareTier::Desktop,
            difficulty_target: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_sign_and_verify_header() {
        let keypair = KeyPair::from_seed(&[11u8; 32]);
        let mut header = sample_header();

        sign_header(&mut header, &keypair).unwrap();
        assert!(verify_header_signature(&header).is_ok());
    }

    #[test]
    fn test_tampered_header_fails() {
        let keypair = KeyPair::from_seed(&[11u8; 32]);
        let mut header = sample_header();
        sign_header(&mut header, &keypair).unwrap();

        header.difficulty_target += 1;
        assert_eq!(
            verify_header_signature(&header),
            Err(ConsensusError::SignatureInvalid)
        );
    }

    #[test]
    fn test_address_derivation_enforced() {
        let keypair = KeyPair::from_seed(&[11u8; 32]);
        let mut header = sample_header();
        sign_header(&mut header, &keypair).unwrap();

        header.miner_address = [0xAAu8; 32];
        assert_eq!(
            verify_header_signature(&header),
            Err(ConsensusError::AddressMismatch)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let keypair = KeyPair::from_seed(&[11u8; 32]);
        let other = KeyPair::from_seed(&[12u8; 32]);
        let mut header = sample_header();
        sign_header(&mut header, &keypair).unwrap();

        // Swap in another identity without re-signing
        header.miner_public_key = other.public_key();
        header.miner_address = other.address();
        assert!(verify_header_signature(&header).is_err());
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let a = KeyPair::from_seed(&[42u8; 32]);
        let b = KeyPair::from_seed(&[42u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.address(), b.address());
    }
}
