//! Events emitted by the consensus engine, in tree-commit order.
//!
//! Downstream consumers (rewards, telemetry) apply reorg diffs
//! idempotently; the engine never re-emits for committed state.

/// A 32-byte header hash
pub type HeaderHash = [u8; 32];

#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusEvent {
    /// The selected tip moved
    TipChanged {
        old: HeaderHash,
        new: HeaderHash,
        height: u64,
    },

    /// The tip switched branches: blocks unwound (tip-first) and applied
    /// (oldest-first)
    Reorg {
        unwound: Vec<HeaderHash>,
        applied: Vec<HeaderHash>,
    },

    /// Blocks crossed the finality depth, oldest-first; never reverted
    Finalized { hashes: Vec<HeaderHash> },

    /// A heavier branch was refused because it unwound too deep; its
    /// subtree was pruned
    ReorgRefused { depth: u64, max: u64 },

    /// Epoch rollover: salts rotate, replay cache prunes, difficulty
    /// retargets
    EpochRollover { epoch: u64 },
}
