//! Canonical codec for deterministic serialization.
//!
//! One codec on every consensus path: named msgpack with frozen field order.
//! Strict decode: rejects unknown fields, unknown enum variants, and
//! trailing bytes. Two nodes that accept the same bytes compute the same
//! hash, or one of them rejects.

use crate::errors::{ConsensusError, Result};
use crate::hash::sha256;
use crate::types::*;
use serde::{de::DeserializeOwned, Serialize};

/// Encode to canonical msgpack (binary, deterministic)
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| ConsensusError::Codec(e.to_string()))
}

/// Decode from canonical msgpack with STRICT validation
pub fn decode_strict<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut deserializer = rmp_serde::Deserializer::new(std::io::Cursor::new(bytes));

    let value: T = serde::Deserialize::deserialize(&mut deserializer).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("unknown field") || msg.contains("unknown variant") {
            ConsensusError::UnknownField {
                field: extract_backtick_token(&msg),
            }
        } else {
            ConsensusError::Codec(msg)
        }
    })?;

    // Every byte must be consumed; trailing data is non-canonical
    let consumed = deserializer.position() as usize;
    if consumed != bytes.len() {
        return Err(ConsensusError::TrailingBytes {
            consumed,
            total: bytes.len(),
        });
    }

    Ok(value)
}

/// Extract the offending token from an error like "unknown field `foo`"
fn extract_backtick_token(err_msg: &str) -> String {
    if let Some(start) = err_msg.find('`') {
        if let Some(end) = err_msg[start + 1..].find('`') {
            return err_msg[start + 1..start + 1 + end].to_string();
        }
    }
    "unknown".to_string()
}

/// SHA-256 of the canonical encoding
pub fn hash_of<T: Serialize>(value: &T) -> Result<[u8; 32]> {
    Ok(sha256(&encode(value)?))
}

// ==================== HEADER HASHING ====================

/// Signing preimage of a header: every field except `miner_signature`,
/// in the header's frozen order under the same field names.
#[derive(Serialize)]
struct HeaderPreimage<'a> {
    codec_version: u8,
    block_index: u64,
    timestamp: i64,
    #[serde(with = "preimage_arrays")]
    parent_hash: &'a [u8; 32],
    #[serde(with = "preimage_arrays")]
    merkle_root: &'a [u8; 32],
    #[serde(with = "preimage_arrays")]
    miner_address: &'a [u8; 32],
    #[serde(with = "preimage_arrays")]
    commitment: &'a [u8; 32],
    difficulty_target: u64,
    tier: HardwareTier,
    offchain_cid: &'a [u8],
    #[serde(with = "preimage_arrays")]
    miner_public_key: &'a [u8; 32],
}

/// Serialize-only view of the byte-array helper for borrowed fields
mod preimage_arrays {
    use serde::{Serialize, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &&[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            hex::encode(*bytes).serialize(serializer)
        } else {
            serializer.collect_seq(bytes.iter())
        }
    }
}

/// Canonical signing bytes of a header (the hash preimage)
pub fn header_preimage(header: &BlockHeader) -> Result<Vec<u8>> {
    encode(&HeaderPreimage {
        codec_version: header.codec_version,
        block_index: header.block_index,
        timestamp: header.timestamp,
        parent_hash: &header.parent_hash,
        merkle_root: &header.merkle_root,
        miner_address: &header.miner_address,
        commitment: &header.commitment,
        difficulty_target: header.difficulty_target,
        tier: header.tier,
        offchain_cid: &header.offchain_cid,
        miner_public_key: &header.miner_public_key,
    })
}

/// Header hash = SHA-256(canonical(header \ signature)).
///
/// The signature is verified AGAINST this hash, never folded into it.
pub fn header_hash(header: &BlockHeader) -> Result<[u8; 32]> {
    Ok(sha256(&header_preimage(header)?))
}

// ==================== SPECIALIZED HASHES ====================

/// Problem hash for commitment binding
pub fn problem_hash(problem: &Problem) -> Result<[u8; 32]> {
    hash_of(problem)
}

/// Solution hash for commitment binding
pub fn solution_hash(solution: &Solution) -> Result<[u8; 32]> {
    hash_of(solution)
}

/// Transaction hash (block body Merkle leaf)
pub fn transaction_hash(tx: &Transaction) -> Result<[u8; 32]> {
    hash_of(tx)
}

// ==================== STRUCTURAL VALIDATION ====================

/// Validate codec version
pub fn validate_codec_version(version: u8) -> Result<()> {
    if version != CODEC_VERSION {
        return Err(ConsensusError::CodecVersionMismatch {
            expected: CODEC_VERSION,
            actual: version,
        });
    }
    Ok(())
}

/// Cheap shape checks that run before any cryptography
pub fn validate_header_structure(header: &BlockHeader) -> Result<()> {
    validate_codec_version(header.codec_version)?;

    if header.offchain_cid.len() > MAX_OFFCHAIN_CID_BYTES {
        return Err(ConsensusError::CidTooLong {
            len: header.offchain_cid.len(),
            max: MAX_OFFCHAIN_CID_BYTES,
        });
    }

    Ok(())
}
