//! Admission control: the cheap, ordered gates every inbound header or
//! reveal passes before any budgeted verification.
//!
//! Gates: structure, signature, tier legality, timestamp window and chain
//! monotonicity, replay suppression, per-miner sequencing, per-peer rate.
//! Over-rate messages are dropped, never buffered.

use coinjecture_core::crypto::verify_header_signature;
use coinjecture_core::errors::{ConsensusError, Result};
use coinjecture_core::params::ChainParams;
use coinjecture_core::types::{BlockHeader, Reveal};
use std::collections::HashMap;
use tracing::debug;

/// Opaque peer identity assigned by the transport layer
pub type PeerId = u64;

/// Token bucket parameters for the per-peer rate gate
const RATE_BURST: f64 = 32.0;
const RATE_PER_SEC: f64 = 8.0;

/// First admission of a commitment within its epoch
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub epoch: u64,
    pub header_hash: [u8; 32],
    pub first_seen: i64,
}

#[derive(Debug, Clone)]
struct PeerState {
    tokens: f64,
    last_refill: i64,
    faults: u32,
}

/// Result of the replay gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    Fresh,
    Duplicate,
}

pub struct AdmissionGate {
    params: ChainParams,
    /// commitment -> first admission in its epoch; TTL = epoch length
    replay: HashMap<[u8; 32], ReplayEntry>,
    /// (miner_address, epoch) -> highest admitted height
    miner_seq: HashMap<([u8; 32], u64), u64>,
    peers: HashMap<PeerId, PeerState>,
}

impl AdmissionGate {
    pub fn new(params: ChainParams) -> Self {
        Self {
            params,
            replay: HashMap::new(),
            miner_seq: HashMap::new(),
            peers: HashMap::new(),
        }
    }

    // ==================== RATE GATE ====================

    /// Charge one token from the peer's bucket; empty bucket drops
    pub fn check_rate(&mut self, peer: PeerId, now_secs: i64) -> Result<()> {
        let state = self.peers.entry(peer).or_insert(PeerState {
            tokens: RATE_BURST,
            last_refill: now_secs,
            faults: 0,
        });

        let elapsed = (now_secs - state.last_refill).max(0) as f64;
        state.tokens = (state.tokens + elapsed * RATE_PER_SEC).min(RATE_BURST);
        state.last_refill = now_secs;

        if state.tokens < 1.0 {
            return Err(ConsensusError::RateLimited);
        }
        state.tokens -= 1.0;
        Ok(())
    }

    /// Record a peer fault (used on faulting rejections)
    pub fn fault(&mut self, peer: PeerId) {
        if let Some(state) = self.peers.get_mut(&peer) {
            state.faults += 1;
        }
    }

    pub fn fault_count(&self, peer: PeerId) -> u32 {
        self.peers.get(&peer).map(|s| s.faults).unwrap_or(0)
    }

    // ==================== HEADER GATES ====================

    /// Signature + address derivation
    pub fn check_signature(&self, header: &BlockHeader) -> Result<()> {
        verify_header_signature(header)
    }

    /// The declared tier must bound the header's problem-size target
    pub fn check_tier_target(&self, header: &BlockHeader) -> Result<()> {
        let (min_n, max_n) = header.tier.element_range();
        let target = header.difficulty_target as usize;
        if target < min_n || target > max_n {
            return Err(ConsensusError::TierViolation {
                tier: header.tier as u8,
                min: min_n,
                max: max_n,
                actual: target,
            });
        }
        Ok(())
    }

    /// Timestamp inside ±window of the local clock AND strictly above the
    /// chain's median time past
    pub fn check_timestamp(
        &self,
        timestamp: i64,
        now_secs: i64,
        median_time_past: Option<i64>,
    ) -> Result<()> {
        let window = self.params.timestamp_window_secs;
        if timestamp < now_secs - window || timestamp > now_secs + window {
            return Err(ConsensusError::TimestampOutOfWindow {
                timestamp,
                now: now_secs,
                window_secs: window,
            });
        }

        if let Some(median) = median_time_past {
            if timestamp <= median {
                return Err(ConsensusError::TimestampNotMonotone { timestamp, median });
            }
        }
        Ok(())
    }

    /// Replay gate: a commitment admits once per epoch. The identical
    /// header resubmitted is a silent duplicate, not a fault.
    pub fn check_replay(
        &self,
        commitment: &[u8; 32],
        epoch: u64,
        header_hash: &[u8; 32],
    ) -> Result<ReplayCheck> {
        match self.replay.get(commitment) {
            None => Ok(ReplayCheck::Fresh),
            Some(entry) if entry.epoch != epoch => Ok(ReplayCheck::Fresh),
            Some(entry) if entry.header_hash == *header_hash => Ok(ReplayCheck::Duplicate),
            Some(entry) => Err(ConsensusError::Replay { epoch: entry.epoch }),
        }
    }

    /// Per-miner sequencing: a miner's admitted heights within an epoch are
    /// monotone non-decreasing. Same-height forks stay admissible; only
    /// back-dating below the miner's own admitted height rejects.
    pub fn check_sequence(&self, miner: &[u8; 32], epoch: u64, height: u64) -> Result<()> {
        if let Some(&last) = self.miner_seq.get(&(*miner, epoch)) {
            if height < last {
                return Err(ConsensusError::NonceOutOfOrder { last, got: height });
            }
        }
        Ok(())
    }

    /// Record state after every gate has passed
    pub fn record_admission(
        &mut self,
        commitment: [u8; 32],
        epoch: u64,
        header_hash: [u8; 32],
        miner: [u8; 32],
        height: u64,
        now_secs: i64,
    ) {
        self.replay.insert(
            commitment,
            ReplayEntry {
                epoch,
                header_hash,
                first_seen: now_secs,
            },
        );
        let seq = self.miner_seq.entry((miner, epoch)).or_insert(height);
        if height > *seq {
            *seq = height;
        }
    }

    // ==================== REVEAL GATES ====================

    /// Tier legality of the revealed instance and its measurements
    pub fn check_tier_reveal(&self, header: &BlockHeader, reveal: &Reveal) -> Result<()> {
        let (min_n, max_n) = header.tier.element_range();
        let size = reveal.problem.size();
        if size < min_n || size > max_n {
            return Err(ConsensusError::TierViolation {
                tier: header.tier as u8,
                min: min_n,
                max: max_n,
                actual: size,
            });
        }

        let max_ms = header.tier.max_solve_time_ms();
        if reveal.measured.solve_time_ms > max_ms {
            return Err(ConsensusError::SolveTimeExceedsTier {
                max_ms,
                actual_ms: reveal.measured.solve_time_ms,
            });
        }
        Ok(())
    }

    // ==================== EPOCH MAINTENANCE ====================

    /// Evict replay entries and sequence records from earlier epochs
    pub fn prune_epoch(&mut self, current_epoch: u64) {
        let before = self.replay.len();
        self.replay.retain(|_, entry| entry.epoch >= current_epoch);
        self.miner_seq.retain(|(_, epoch), _| *epoch >= current_epoch);
        let evicted = before - self.replay.len();
        if evicted > 0 {
            debug!(evicted, current_epoch, "replay cache pruned on rollover");
        }
    }

    pub fn replay_entries(&self) -> impl Iterator<Item = (&[u8; 32], &ReplayEntry)> {
        self.replay.iter()
    }
}
