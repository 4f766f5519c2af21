//! COINjecture Core - Consensus-Critical Blockchain Logic
//!
//! Deterministic, verifiable implementations of every consensus-critical
//! primitive: the canonical codec, hashing, the commit-reveal protocol,
//! the NP-problem registry, and work scoring. No I/O, no ambient clocks,
//! no panics on consensus paths.
//!
//! # Architecture
//!
//! - **types**: Canonical data structures with frozen field order
//! - **codec**: Deterministic serialization (named msgpack), strict decode
//! - **hash**: SHA-256 / HMAC-SHA-256 primitives
//! - **merkle**: Domain-tagged deterministic Merkle root
//! - **crypto**: Ed25519 signing and header signature checks
//! - **commitment**: Commit-reveal protocol with epoch binding
//! - **problem**: Problem registry (generate / verify / solve) with budgets
//! - **work**: Work scoring for fork choice
//! - **params**: Consensus parameters
//! - **errors**: Typed error handling (no panics in consensus)

pub mod codec;
pub mod commitment;
pub mod crypto;
pub mod errors;
pub mod hash;
pub mod merkle;
pub mod params;
pub mod problem;
pub mod types;
pub mod work;

pub use errors::{ConsensusError, Result};
pub use params::ChainParams;
pub use types::{
    Block, BlockHeader, ComplexityRecord, HardwareTier, MemoryClass, Problem, Reveal, Solution,
    Transaction, VerifyBudget, VerifyOutcome, CODEC_VERSION, MAX_OFFCHAIN_CID_BYTES,
    MAX_TX_PER_BLOCK,
};

/// Library version (matches Cargo.toml)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_compile() {
        let header = BlockHeader::default();
        assert_eq!(header.codec_version, CODEC_VERSION);
        assert!(!VERSION.is_empty());
    }
}
