//! Content-addressed store contract for off-chain proof bundles.
//!
//! The core only depends on `put(bytes) -> CID` / `get(CID) -> bytes` and
//! never blocks on missing CIDs for blocks it has already admitted. CIDs
//! are base58btc-encoded sha2-256 multihashes.

use coinjecture_core::hash::sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

/// Multihash prefix for sha2-256 with a 32-byte digest
const MULTIHASH_SHA2_256: [u8; 2] = [0x12, 0x20];

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("invalid CID: {0}")]
    InvalidCid(String),

    #[error("store poisoned")]
    Poisoned,
}

/// Canonical base58btc content identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cid(String);

impl Cid {
    /// Content address of a byte string
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let digest = sha256(bytes);
        let mut multihash = Vec::with_capacity(34);
        multihash.extend_from_slice(&MULTIHASH_SHA2_256);
        multihash.extend_from_slice(&digest);
        Cid(bs58::encode(multihash).into_string())
    }

    /// Parse and shape-check an externally supplied CID
    pub fn parse(s: &str) -> Result<Self, ContentError> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| ContentError::InvalidCid(e.to_string()))?;
        if raw.len() != 34 || raw[..2] != MULTIHASH_SHA2_256 {
            return Err(ContentError::InvalidCid(format!(
                "unsupported multihash in {}",
                s
            )));
        }
        Ok(Cid(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The put/get contract the consensus core requires
pub trait ContentStore: Send + Sync {
    fn put(&self, bytes: &[u8]) -> Result<Cid, ContentError>;

    /// May legitimately miss; callers tolerate absence
    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, ContentError>;
}

/// In-memory store for tests and single-process nodes
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<Cid, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, bytes: &[u8]) -> Result<Cid, ContentError> {
        let cid = Cid::for_bytes(bytes);
        self.blobs
            .write()
            .map_err(|_| ContentError::Poisoned)?
            .insert(cid.clone(), bytes.to_vec());
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, ContentError> {
        Ok(self
            .blobs
            .read()
            .map_err(|_| ContentError::Poisoned)?
            .get(cid)
            .cloned())
    }
}
