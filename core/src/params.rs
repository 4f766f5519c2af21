//! Chain parameters. Changing any of these is a labeled codec bump.

use crate::types::HardwareTier;
use serde::{Deserialize, Serialize};

/// Consensus-wide configuration; every field is consensus-affecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainParams {
    /// Domain separation in epoch-salt derivation and signatures
    pub network_id: String,

    /// Blocks per epoch (shared epoch salt)
    pub epoch_length: u64,

    /// Blocks a HEADER_ONLY node may wait for its reveal
    pub reveal_window: u64,

    /// Depth at which a block becomes FINAL (k)
    pub finality_depth: u64,

    /// Maximum blocks a reorg may unwind below the current tip (D)
    pub max_reorg_depth: u64,

    /// Accepted clock skew for header timestamps, seconds
    pub timestamp_window_secs: i64,

    /// Broadcast pacing rate; 1/√2 is the critical-damping boundary
    pub gossip_pace_hz: f64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            network_id: "coinjecture-main".to_string(),
            epoch_length: 128,
            reveal_window: 128,
            finality_depth: 32,
            max_reorg_depth: 100,
            timestamp_window_secs: 2 * 60 * 60,
            gossip_pace_hz: std::f64::consts::FRAC_1_SQRT_2,
        }
    }
}

impl ChainParams {
    /// Target inter-block interval per tier, seconds
    pub fn target_interval_secs(&self, tier: HardwareTier) -> u64 {
        match tier {
            HardwareTier::Mobile => 600,
            HardwareTier::Desktop => 300,
            HardwareTier::Server => 120,
        }
    }

    /// Starting problem-size target per tier (mid-range)
    pub fn initial_difficulty_target(&self, tier: HardwareTier) -> u64 {
        let (min_n, max_n) = tier.element_range();
        ((min_n + max_n) / 2) as u64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.network_id.is_empty() {
            return Err("network_id must not be empty".to_string());
        }
        if self.epoch_length == 0 {
            return Err("epoch_length must be positive".to_string());
        }
        if self.reveal_window == 0 {
            return Err("reveal_window must be positive".to_string());
        }
        if self.finality_depth == 0 {
            return Err("finality_depth must be positive".to_string());
        }
        if self.max_reorg_depth < self.finality_depth {
            return Err(format!(
                "max_reorg_depth {} must be >= finality_depth {}",
                self.max_reorg_depth, self.finality_depth
            ));
        }
        if !(self.gossip_pace_hz.is_finite() && self.gossip_pace_hz > 0.0) {
            return Err("gossip_pace_hz must be a positive finite rate".to_string());
        }
        Ok(())
    }
}
