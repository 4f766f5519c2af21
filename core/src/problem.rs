//! Problem registry: deterministic generation, budget-limited verification,
//! and the prover-side solver for Subset-Sum.
//!
//! Generation draws from a SHA-256 counter stream so two platforms given the
//! same seed produce byte-identical instances - no RNG crates on consensus
//! paths. Verification is O(n), charges 1 op per element examined and per
//! addition, and observes budget/cancellation at fixed checkpoints.

use crate::codec::hash_of;
use crate::errors::Result;
use crate::hash::sha256_multi;
use crate::types::{HardwareTier, Problem, Solution, VerifyBudget, VerifyOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Ops between cancellation / wall-clock checkpoints
pub const BUDGET_CHECKPOINT_OPS: u64 = 4096;

/// Element values are drawn from [1, ELEMENT_RANGE]
const ELEMENT_RANGE: u64 = 1000;

// ==================== GENERATION ====================

/// Deterministically generate an instance from a seed.
///
/// The element count is the difficulty target clamped into the tier's hard
/// range; the target sum is taken over a seed-derived subset, so every
/// generated instance is solvable.
pub fn generate(seed: &[u8; 32], tier: HardwareTier, difficulty_target: u64) -> Problem {
    let (min_n, max_n) = tier.element_range();
    let n = (difficulty_target.clamp(min_n as u64, max_n as u64)) as usize;

    let mut elements = Vec::with_capacity(n);
    for i in 0..n as u64 {
        let digest = sha256_multi(&[seed, b"element", &i.to_be_bytes()]);
        let raw = u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        elements.push((raw % ELEMENT_RANGE + 1) as i64);
    }

    let mut target: i64 = 0;
    let mut any = false;
    for (i, &element) in elements.iter().enumerate() {
        let digest = sha256_multi(&[seed, b"subset", &(i as u64).to_be_bytes()]);
        if digest[0] & 1 == 1 {
            target += element;
            any = true;
        }
    }
    if !any {
        target = elements[0];
    }

    Problem::SubsetSum { elements, target }
}

/// Instance hash via canonical encoding
pub fn instance_hash(problem: &Problem) -> Result<[u8; 32]> {
    hash_of(problem)
}

// ==================== VERIFICATION ====================

/// Verify a witness within a budget.
///
/// Malformed witnesses (wrong variant, duplicate or out-of-range indices,
/// empty subset) are `Invalid`, never a panic. Budget exhaustion on the
/// last legal op is `BudgetExceeded`, not `Valid`.
pub fn verify(problem: &Problem, solution: &Solution, budget: &VerifyBudget) -> VerifyOutcome {
    verify_inner(problem, solution, budget, None).unwrap_or(VerifyOutcome::BudgetExceeded)
}

/// Cancellable variant for verifier pools; `None` means the task observed
/// cancellation at a checkpoint and produced no outcome.
pub fn verify_cancellable(
    problem: &Problem,
    solution: &Solution,
    budget: &VerifyBudget,
    cancel: &AtomicBool,
) -> Option<VerifyOutcome> {
    verify_inner(problem, solution, budget, Some(cancel))
}

fn verify_inner(
    problem: &Problem,
    solution: &Solution,
    budget: &VerifyBudget,
    cancel: Option<&AtomicBool>,
) -> Option<VerifyOutcome> {
    let started = Instant::now();
    let mut ops: u64 = 0;

    let Problem::SubsetSum { elements, target } = problem;
    let Solution::SubsetSum { indices } = solution;

    let n = elements.len();

    if indices.is_empty() || indices.len() > n {
        return Some(VerifyOutcome::Invalid);
    }

    // Uniqueness and bounds in one pass
    let mut seen = vec![false; n];
    for &index in indices {
        match charge(&mut ops, budget, started, cancel)? {
            Charge::Ok => {}
            Charge::Exhausted => return Some(VerifyOutcome::BudgetExceeded),
        }

        let idx = index as usize;
        if idx >= n || seen[idx] {
            return Some(VerifyOutcome::Invalid);
        }
        seen[idx] = true;
    }

    // Sum in i128: no overflow for any i64 element set of this size
    let mut sum: i128 = 0;
    for &index in indices {
        match charge(&mut ops, budget, started, cancel)? {
            Charge::Ok => {}
            Charge::Exhausted => return Some(VerifyOutcome::BudgetExceeded),
        }
        sum += elements[index as usize] as i128;
    }

    if elapsed_exceeded(started, budget) {
        return Some(VerifyOutcome::BudgetExceeded);
    }

    if sum == *target as i128 {
        Some(VerifyOutcome::Valid)
    } else {
        Some(VerifyOutcome::Invalid)
    }
}

enum Charge {
    Ok,
    Exhausted,
}

fn charge(
    ops: &mut u64,
    budget: &VerifyBudget,
    started: Instant,
    cancel: Option<&AtomicBool>,
) -> Option<Charge> {
    *ops += 1;
    if *ops > budget.max_ops {
        return Some(Charge::Exhausted);
    }
    if *ops % BUDGET_CHECKPOINT_OPS == 0 {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return None;
            }
        }
        if elapsed_exceeded(started, budget) {
            return Some(Charge::Exhausted);
        }
    }
    Some(Charge::Ok)
}

fn elapsed_exceeded(started: Instant, budget: &VerifyBudget) -> bool {
    budget.max_duration_ms != u64::MAX && started.elapsed().as_millis() as u64 > budget.max_duration_ms
}

// ==================== SOLVING (PROVER SIDE) ====================

/// Solve an instance by dynamic programming over reachable sums.
///
/// Pseudo-polynomial in the element total; generated instances keep element
/// values small enough that this is fast for every tier. Returns indices in
/// ascending order, or None when no subset reaches the target.
pub fn solve(problem: &Problem) -> Option<Solution> {
    let Problem::SubsetSum { elements, target } = problem;

    let n = elements.len();
    if n == 0 || elements.iter().any(|&e| e < 0) {
        return None;
    }

    let total: i64 = elements.iter().sum();
    if *target < 0 || *target > total {
        return None;
    }

    // reach[s] = index of the element that first reached sum s
    let mut reach: Vec<Option<usize>> = vec![None; total as usize + 1];
    let mut reachable = vec![false; total as usize + 1];
    reachable[0] = true;

    for (i, &element) in elements.iter().enumerate() {
        let e = element as usize;
        for s in (e..=total as usize).rev() {
            if reachable[s - e] && !reachable[s] {
                reachable[s] = true;
                reach[s] = Some(i);
            }
        }
    }

    if !reachable[*target as usize] {
        return None;
    }

    let mut indices = Vec::new();
    let mut s = *target as usize;
    while s > 0 {
        let i = reach[s]?;
        indices.push(i as u32);
        s -= elements[i] as usize;
    }
    indices.sort_unstable();

    Some(Solution::SubsetSum { indices })
}
