//! Consensus-critical type definitions with deterministic representation.
//!
//! Field order is EXPLICIT and FROZEN - changes require golden vector updates
//! and a labeled codec version bump. Serialization is CANONICAL: one codec
//! (named msgpack), strict decode, no floats on hash paths.

use serde::{Deserialize, Serialize};

/// Codec version for forward/backward compatibility
pub const CODEC_VERSION: u8 = 1;

/// Maximum length of the off-chain proof bundle reference
pub const MAX_OFFCHAIN_CID_BYTES: usize = 128;

/// Maximum transaction count carried in a block body
pub const MAX_TX_PER_BLOCK: usize = 10_000;

// ==================== HARDWARE TIERS ====================

/// Hardware tiers for mining - resource limits, not reward brackets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HardwareTier {
    Mobile = 1,  // 8-16 elements
    Desktop = 2, // 16-24 elements
    Server = 3,  // 24-32 elements
}

impl HardwareTier {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Mobile),
            2 => Some(Self::Desktop),
            3 => Some(Self::Server),
            _ => None,
        }
    }

    /// Hard consensus bounds on Subset-Sum element count, inclusive
    pub fn element_range(&self) -> (usize, usize) {
        match self {
            Self::Mobile => (8, 16),
            Self::Desktop => (16, 24),
            Self::Server => (24, 32),
        }
    }

    /// Upper bound on a miner-reported solve time for this tier
    pub fn max_solve_time_ms(&self) -> u64 {
        match self {
            Self::Mobile => 60_000,
            Self::Desktop => 300_000,
            Self::Server => 1_800_000,
        }
    }

    /// Verifier op budget: a generous multiple of the worst-case O(n) scan
    pub fn max_verify_ops(&self) -> u64 {
        let (_, max_elem) = self.element_range();
        10 * max_elem as u64
    }

    pub fn all() -> [HardwareTier; 3] {
        [Self::Mobile, Self::Desktop, Self::Server]
    }
}

// ==================== COMPLEXITY MEASUREMENT ====================

/// Peak memory category observed while solving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MemoryClass {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl MemoryClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }
}

/// Miner-reported solve cost, bounded by tier limits at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplexityRecord {
    /// Wall-clock solve time in milliseconds
    pub solve_time_ms: u64,

    /// Peak memory category during solving
    pub memory: MemoryClass,

    /// Number of attempts before the committed solution was found
    pub attempts: u32,
}

// ==================== BLOCK HEADER ====================

/// Block header - consensus-critical, deterministic hash.
///
/// The header hash is SHA-256 over the canonical encoding of every field
/// EXCEPT `miner_signature`; the signature is Ed25519 over that hash and
/// rides along in the transport encoding only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockHeader {
    /// Codec version for compatibility (MUST BE FIRST FIELD)
    pub codec_version: u8,

    /// Block index (height); genesis = 0
    pub block_index: u64,

    /// Timestamp (seconds since Unix epoch)
    pub timestamp: i64,

    /// Parent header hash (32 bytes, SHA-256); genesis: all zeros
    #[serde(with = "serde_arrays")]
    pub parent_hash: [u8; 32],

    /// Merkle root of the ordered block body leaves
    #[serde(with = "serde_arrays")]
    pub merkle_root: [u8; 32],

    /// Miner address (32 bytes, SHA-256 of the public key)
    #[serde(with = "serde_arrays")]
    pub miner_address: [u8; 32],

    /// Commitment hash binding the eventual reveal (32 bytes)
    #[serde(with = "serde_arrays")]
    pub commitment: [u8; 32],

    /// Problem-size target encoded per tier
    pub difficulty_target: u64,

    /// Declared hardware class
    pub tier: HardwareTier,

    /// Content address of the off-chain proof bundle (max 128 bytes)
    pub offchain_cid: Vec<u8>,

    /// Miner Ed25519 public key (32 bytes)
    #[serde(with = "serde_arrays")]
    pub miner_public_key: [u8; 32],

    /// Ed25519 signature over the header hash (64 bytes)
    #[serde(with = "serde_arrays")]
    pub miner_signature: [u8; 64],
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            codec_version: CODEC_VERSION,
            block_index: 0,
            timestamp: 0,
            parent_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            miner_address: [0u8; 32],
            commitment: [0u8; 32],
            difficulty_target: 0,
            tier: HardwareTier::Desktop,
            offchain_cid: Vec::new(),
            miner_public_key: [0u8; 32],
            miner_signature: [0u8; 64],
        }
    }
}

impl BlockHeader {
    /// Epoch this header falls in
    pub fn epoch(&self, epoch_length: u64) -> u64 {
        self.block_index / epoch_length.max(1)
    }

    pub fn is_genesis(&self) -> bool {
        self.block_index == 0 && self.parent_hash == [0u8; 32]
    }
}

// ==================== PROBLEM ====================

/// NP-complete problem instance for PoW.
///
/// The registry is open-ended; unknown variants fail strict decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Problem {
    SubsetSum { elements: Vec<i64>, target: i64 },
}

impl Problem {
    /// Instance size in the units the tier limits bound
    pub fn size(&self) -> usize {
        match self {
            Self::SubsetSum { elements, .. } => elements.len(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubsetSum { .. } => "subset-sum",
        }
    }
}

// ==================== SOLUTION ====================

/// Witness for a problem instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Solution {
    SubsetSum { indices: Vec<u32> },
}

// ==================== REVEAL ====================

/// Reveal phase data released in the block body; binds the commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reveal {
    /// The instance actually solved
    pub problem: Problem,

    /// The witness
    pub solution: Solution,

    /// Random per-attempt salt (same value bound into the commitment)
    #[serde(with = "serde_arrays")]
    pub miner_salt: [u8; 32],

    /// Measured solve complexity
    pub measured: ComplexityRecord,
}

// ==================== VERIFICATION BUDGET ====================

/// Budget limits for proof verification (defense against DoS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyBudget {
    /// Maximum charged operations
    pub max_ops: u64,

    /// Maximum wall time in milliseconds
    pub max_duration_ms: u64,
}

impl VerifyBudget {
    pub fn from_tier(tier: HardwareTier) -> Self {
        Self {
            max_ops: tier.max_verify_ops(),
            max_duration_ms: 100,
        }
    }

    pub fn permissive() -> Self {
        Self {
            max_ops: u64::MAX,
            max_duration_ms: u64::MAX,
        }
    }
}

/// Outcome of a budget-limited verification.
///
/// `BudgetExceeded` is a rejection, never a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Invalid,
    BudgetExceeded,
}

// ==================== TRANSACTION ====================

/// Value transfer carried as a block body leaf.
///
/// Reward semantics stay downstream of consensus; the core only hashes,
/// orders, and signature-checks these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transaction {
    /// Codec version
    pub codec_version: u8,

    /// Sender address (32 bytes)
    #[serde(with = "serde_arrays")]
    pub from: [u8; 32],

    /// Recipient address (32 bytes)
    #[serde(with = "serde_arrays")]
    pub to: [u8; 32],

    /// Amount in the smallest unit
    pub amount: u64,

    /// Per-sender nonce (prevents replay)
    pub nonce: u64,

    /// Timestamp
    pub timestamp: i64,

    /// Sender Ed25519 public key (32 bytes)
    #[serde(with = "serde_arrays")]
    pub public_key: [u8; 32],

    /// Signature (64 bytes, Ed25519)
    #[serde(with = "serde_arrays")]
    pub signature: [u8; 64],
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            codec_version: CODEC_VERSION,
            from: [0u8; 32],
            to: [0u8; 32],
            amount: 0,
            nonce: 0,
            timestamp: 0,
            public_key: [0u8; 32],
            signature: [0u8; 64],
        }
    }
}

// ==================== BLOCK ====================

/// A header plus its reveal, once both are known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub header: BlockHeader,
    pub reveal: Reveal,
    pub transactions: Vec<Transaction>,
}

// ==================== HELPER MODULES ====================

/// Serde helper for fixed byte arrays of any length.
///
/// serde only derives arrays up to 32 elements; signatures are 64 bytes.
/// Binary form is a plain element sequence so every canonical backend
/// produces the same shape; human-readable form is hex.
pub(crate) mod serde_arrays {
    use serde::de::{Error as DeError, SeqAccess, Visitor};
    use serde::{Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            hex::encode(bytes).serialize(serializer)
        } else {
            serializer.collect_seq(bytes.iter())
        }
    }

    struct ArrayVisitor<const N: usize>(PhantomData<[u8; N]>);

    impl<'de, const N: usize> Visitor<'de> for ArrayVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a byte array of length {}", N)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut arr = [0u8; N];
            for (i, slot) in arr.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| DeError::invalid_length(i, &self))?;
            }
            if seq.next_element::<u8>()?.is_some() {
                return Err(DeError::invalid_length(N + 1, &self));
            }
            Ok(arr)
        }

        fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
        where
            E: DeError,
        {
            let bytes = hex::decode(s).map_err(DeError::custom)?;
            if bytes.len() != N {
                return Err(DeError::custom(format!(
                    "expected {} bytes, got {}",
                    N,
                    bytes.len()
                )));
            }
            let mut arr = [0u8; N];
            arr.copy_from_slice(&bytes);
            Ok(arr)
        }
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(ArrayVisitor::<N>(PhantomData))
        } else {
            deserializer.deserialize_seq(ArrayVisitor::<N>(PhantomData))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_tier_ranges() {
        assert_eq!(HardwareTier::Mobile.element_range(), (8, 16));
        assert_eq!(HardwareTier::Desktop.element_range(), (16, 24));
        assert_eq!(HardwareTier::Server.element_range(), (24, 32));
    }

    #[test]
    fn test_tier_from_u8_roundtrip() {
        for tier in HardwareTier::all() {
            assert_eq!(HardwareTier::from_u8(tier as u8), Some(tier));
        }
        assert_eq!(HardwareTier::from_u8(0), None);
        assert_eq!(HardwareTier::from_u8(4), None);
    }

    #[test]
    fn test_verify_budget_from_tier() {
        let budget = VerifyBudget::from_tier(HardwareTier::Server);
        assert_eq!(budget.max_ops, 320);
    }

    #[test]
    fn test_codec_version_default() {
        let header = BlockHeader::default();
        assert_eq!(header.codec_version, CODEC_VERSION);
        assert!(header.is_genesis());
    }

    #[test]
    fn test_header_epoch() {
        let mut header = BlockHeader::default();
        header.block_index = 127;
        assert_eq!(header.epoch(128), 0);
        header.block_index = 128;
        assert_eq!(header.epoch(128), 1);
    }

    #[test]
    fn test_problem_size() {
        let problem = Problem::SubsetSum {
            elements: vec![1, 2, 3],
            target: 6,
        };
        assert_eq!(problem.size(), 3);
        assert_eq!(problem.kind(), "subset-sum");
    }
}
