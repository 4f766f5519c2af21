//! Difficulty adjustment: per-tier EWMA controller over inter-block
//! intervals, retargeting at epoch boundaries.
//!
//! The update is deterministic from chain history visible at the boundary;
//! every node computes the same new target. A single epoch never moves a
//! target by more than 2x in either direction, and targets stay inside the
//! tier's hard element range.

use coinjecture_core::params::ChainParams;
use coinjecture_core::types::HardwareTier;
use tracing::debug;

/// EWMA window N; alpha = 2 / (N + 1)
const EWMA_WINDOW: u64 = 64;

#[derive(Debug, Clone, Copy)]
struct TierState {
    target: u64,
    ewma_interval_secs: Option<f64>,
    last_timestamp: Option<i64>,
}

pub struct DifficultyAdjuster {
    params: ChainParams,
    tiers: [TierState; 3],
}

impl DifficultyAdjuster {
    pub fn new(params: ChainParams) -> Self {
        let tiers = HardwareTier::all().map(|tier| TierState {
            target: params.initial_difficulty_target(tier),
            ewma_interval_secs: None,
            last_timestamp: None,
        });
        Self { params, tiers }
    }

    fn index(tier: HardwareTier) -> usize {
        tier as usize - 1
    }

    /// Current problem-size target for a tier
    pub fn target_for(&self, tier: HardwareTier) -> u64 {
        self.tiers[Self::index(tier)].target
    }

    /// Feed the timestamp of a block accepted on the canonical chain
    pub fn observe_block(&mut self, tier: HardwareTier, timestamp: i64) {
        let state = &mut self.tiers[Self::index(tier)];

        if let Some(last) = state.last_timestamp {
            let interval = (timestamp - last).max(1) as f64;
            let alpha = 2.0 / (EWMA_WINDOW as f64 + 1.0);
            state.ewma_interval_secs = Some(match state.ewma_interval_secs {
                Some(ewma) => alpha * interval + (1.0 - alpha) * ewma,
                None => interval,
            });
        }
        state.last_timestamp = Some(timestamp);
    }

    /// Retarget every tier at the epoch boundary:
    /// target <- clamp(target * ewma / T_target, tier_min, tier_max),
    /// with the per-epoch ratio clamped into [0.5, 2.0].
    pub fn on_epoch_rollover(&mut self) {
        for tier in HardwareTier::all() {
            let target_interval = self.params.target_interval_secs(tier) as f64;
            let state = &mut self.tiers[Self::index(tier)];

            let Some(ewma) = state.ewma_interval_secs else {
                continue;
            };

            let ratio = (ewma / target_interval).clamp(0.5, 2.0);
            let (min_n, max_n) = tier.element_range();
            let next = ((state.target as f64 * ratio).round() as u64)
                .clamp(min_n as u64, max_n as u64);

            if next != state.target {
                debug!(
                    tier = tier as u8,
                    old = state.target,
                    new = next,
                    "difficulty retargeted"
                );
            }
            state.target = next;
        }
    }

    /// Snapshot for epoch metadata persistence: (tier, target) triples
    pub fn targets(&self) -> [(HardwareTier, u64); 3] {
        HardwareTier::all().map(|tier| (tier, self.target_for(tier)))
    }
}
