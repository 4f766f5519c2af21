//! Work scoring: maps measured solve complexity to the scalar weight a
//! block carries in fork choice.
//!
//! The pre-log score enters `cumulative_work`; the log-compressed form is
//! only for reward computation downstream. Tier constants are fixed per
//! codec version; every node must compute these bit-for-bit identically
//! (golden vectors pin the bit patterns).

use crate::types::{ComplexityRecord, HardwareTier};

/// Per-element cost floor in milliseconds-equivalent (C_tier)
pub fn cost_scale(tier: HardwareTier) -> f64 {
    match tier {
        HardwareTier::Mobile => 50.0,
        HardwareTier::Desktop => 200.0,
        HardwareTier::Server => 800.0,
    }
}

/// Reward compression scale (S_tier)
pub fn reward_scale(tier: HardwareTier) -> f64 {
    match tier {
        HardwareTier::Mobile => 1_000.0,
        HardwareTier::Desktop => 10_000.0,
        HardwareTier::Server => 100_000.0,
    }
}

/// score = max(solve_time_ms, problem_size * C_tier).
///
/// The size floor bounds the damage of a miner deflating its reported solve
/// time; inflation is capped by the tier solve-time limit at admission.
pub fn work_score(tier: HardwareTier, problem_size: usize, measured: &ComplexityRecord) -> f64 {
    let time = measured.solve_time_ms as f64;
    let floor = problem_size as f64 * cost_scale(tier);
    time.max(floor)
}

/// reward_contribution = log2(1 + score / S_tier); never enters fork choice
pub fn reward_contribution(tier: HardwareTier, score: f64) -> f64 {
    (1.0 + score / reward_scale(tier)).log2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryClass;

    fn measured(solve_time_ms: u64) -> ComplexityRecord {
        ComplexityRecord {
            solve_time_ms,
            memory: MemoryClass::Low,
            attempts: 1,
        }
    }

    #[test]
    fn test_size_floor_dominates_fast_solves() {
        // 20 elements * 200.0 desktop cost scale = 4000
        let score = work_score(HardwareTier::Desktop, 20, &measured(10));
        assert_eq!(score, 4000.0);
    }

    #[test]
    fn test_reported_time_dominates_slow_solves() {
        let score = work_score(HardwareTier::Desktop, 20, &measured(60_000));
        assert_eq!(score, 60_000.0);
    }

    #[test]
    fn test_positive_for_any_legal_size() {
        for tier in HardwareTier::all() {
            let (min_n, _) = tier.element_range();
            assert!(work_score(tier, min_n, &measured(0)) > 0.0);
        }
    }

    #[test]
    fn test_reward_contribution_monotone() {
        let small = reward_contribution(HardwareTier::Mobile, 100.0);
        let large = reward_contribution(HardwareTier::Mobile, 10_000.0);
        assert!(large > small);
        assert!(small > 0.0);
    }

    #[test]
    fn test_tiers_incomparable_only_via_constants() {
        let m = measured(10);
        let mobile = work_score(HardwareTier::Mobile, 16, &m);
        let server = work_score(HardwareTier::Server, 16, &m);
        assert_eq!(mobile, 16.0 * 50.0);
        assert_eq!(server, 16.0 * 800.0);
    }
}
