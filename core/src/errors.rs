//! Typed error definitions for consensus-critical operations.
//!
//! NO PANICS in consensus path - all errors are typed and recoverable
//! except `Internal`, which drives the engine into read-only safe mode.

use thiserror::Error;

/// Result type alias for consensus operations
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Consensus-critical errors - NEVER panic, always return typed error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsensusError {
    // ==================== CODEC ====================
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unknown field in strict decode: {field}")]
    UnknownField { field: String },

    #[error("Trailing data: consumed {consumed} of {total} bytes")]
    TrailingBytes { consumed: usize, total: usize },

    #[error("Codec version mismatch: expected {expected}, got {actual}")]
    CodecVersionMismatch { expected: u8, actual: u8 },

    #[error("Off-chain CID too long: {len} > {max} bytes")]
    CidTooLong { len: usize, max: usize },

    // ==================== SIGNATURES ====================
    #[error("Ed25519 signature verification failed")]
    SignatureInvalid,

    #[error("Miner address is not the canonical derivation of the public key")]
    AddressMismatch,

    // ==================== TIER ====================
    #[error("Tier violation: tier {tier} requires {min}..={max} elements, got {actual}")]
    TierViolation {
        tier: u8,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Solve time {actual_ms}ms exceeds tier limit {max_ms}ms")]
    SolveTimeExceedsTier { max_ms: u64, actual_ms: u64 },

    // ==================== TIMESTAMPS ====================
    #[error("Timestamp {timestamp} outside ±{window_secs}s of local clock {now}")]
    TimestampOutOfWindow {
        timestamp: i64,
        now: i64,
        window_secs: i64,
    },

    #[error("Timestamp {timestamp} not greater than chain median {median}")]
    TimestampNotMonotone { timestamp: i64, median: i64 },

    // ==================== ADMISSION ====================
    #[error("Commitment already admitted in epoch {epoch}")]
    Replay { epoch: u64 },

    #[error("Parent header unknown")]
    ParentUnknown,

    #[error("Miner sequence regressed in epoch: last admitted height {last}, got {got}")]
    NonceOutOfOrder { last: u64, got: u64 },

    #[error("Peer over rate limit")]
    RateLimited,

    // ==================== COMMIT-REVEAL ====================
    #[error("Commitment binding verification failed")]
    CommitmentMismatch,

    #[error("Reveal received for unknown or already-revealed header")]
    RevealUnexpected,

    // ==================== VERIFICATION ====================
    #[error("Solution does not solve the committed problem")]
    VerificationInvalid,

    #[error("Verification budget exceeded: max_ops={max_ops}")]
    BudgetExceeded { max_ops: u64 },

    #[error("Work score must be positive, got {score}")]
    WorkNotPositive { score: f64 },

    // ==================== CRYPTOGRAPHIC PRIMITIVES ====================
    #[error("HMAC computation failed: {0}")]
    Hmac(String),

    // ==================== TREE ====================
    #[error("Reorg refused: unwind depth {depth} exceeds bound {max}")]
    ReorgRefused { depth: u64, max: u64 },

    // ==================== FATAL ====================
    #[error("Internal invariant violation: {0}")]
    Internal(String),
}

impl ConsensusError {
    /// Error code for monitoring and alerting
    pub fn error_code(&self) -> &'static str {
        match self {
            // Codec: 1xxx
            Self::Codec(_) => "E1000",
            Self::UnknownField { .. } => "E1001",
            Self::TrailingBytes { .. } => "E1002",
            Self::CodecVersionMismatch { .. } => "E1003",
            Self::CidTooLong { .. } => "E1004",

            // Signatures: 2xxx
            Self::SignatureInvalid => "E2000",
            Self::AddressMismatch => "E2001",

            // Tier: 3xxx
            Self::TierViolation { .. } => "E3000",
            Self::SolveTimeExceedsTier { .. } => "E3001",

            // Timestamps: 4xxx
            Self::TimestampOutOfWindow { .. } => "E4000",
            Self::TimestampNotMonotone { .. } => "E4001",

            // Admission: 5xxx
            Self::Replay { .. } => "E5000",
            Self::ParentUnknown => "E5001",
            Self::NonceOutOfOrder { .. } => "E5002",
            Self::RateLimited => "E5003",

            // Commit-reveal: 6xxx
            Self::CommitmentMismatch => "E6000",
            Self::RevealUnexpected => "E6001",

            // Verification: 7xxx
            Self::VerificationInvalid => "E7000",
            Self::BudgetExceeded { .. } => "E7001",
            Self::WorkNotPositive { .. } => "E7002",

            // Crypto primitives: 8xxx
            Self::Hmac(_) => "E8000",

            // Tree: 9xxx
            Self::ReorgRefused { .. } => "E9000",

            // Fatal: 0xxx
            Self::Internal(_) => "E0001",
        }
    }

    /// Does this rejection increment the offending peer's fault counter?
    ///
    /// Replays and unknown parents are legitimate retry/race outcomes;
    /// reorg refusals are recorded, not blamed.
    pub fn is_peer_fault(&self) -> bool {
        !matches!(
            self,
            Self::Replay { .. }
                | Self::ParentUnknown
                | Self::RateLimited
                | Self::ReorgRefused { .. }
                | Self::Internal(_)
        )
    }

    /// Fatal errors flip the engine into read-only safe mode
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
