//! End-to-end consensus scenarios, each driving full engines through the
//! public submission surface.

use coinjecture_consensus::engine::{ConsensusEngine, SubmitStatus};
use coinjecture_consensus::events::ConsensusEvent;
use coinjecture_consensus::miner::BlockProducer;
use coinjecture_consensus::tree::NodeState;
use coinjecture_core::codec::header_hash;
use coinjecture_core::crypto::KeyPair;
use coinjecture_core::errors::ConsensusError;
use coinjecture_core::params::ChainParams;
use coinjecture_core::types::*;

const NOW: i64 = 1_700_000_000;
const BLOCK_SPACING: i64 = 300;

fn test_params() -> ChainParams {
    ChainParams {
        network_id: "coinjecture-test".to_string(),
        ..Default::default()
    }
}

fn engine() -> ConsensusEngine {
    ConsensusEngine::new(test_params()).unwrap()
}

fn producer(seed: u8) -> BlockProducer {
    BlockProducer::new(
        KeyPair::from_seed(&[seed; 32]),
        HardwareTier::Desktop,
        test_params(),
    )
}

/// Time at which a block of the given height is mined and submitted
fn time_at(height: u64) -> i64 {
    NOW + height as i64 * BLOCK_SPACING
}

/// Produce and fully submit one block on the engine's current tip
fn mine_one(
    engine: &mut ConsensusEngine,
    producer: &BlockProducer,
    solve_ms: Option<u64>,
) -> ([u8; 32], f64) {
    let height = engine.snapshot().tip.height + 1;
    let now = time_at(height);
    let (header, reveal) = producer
        .produce_reporting(engine, now, Vec::new(), solve_ms)
        .unwrap();
    let hash = header_hash(&header).unwrap();
    let score = coinjecture_core::work::work_score(
        header.tier,
        reveal.problem.size(),
        &reveal.measured,
    );

    assert_eq!(
        engine.submit_header(1, header, now),
        SubmitStatus::Accepted,
        "header at height {} should admit",
        height
    );
    assert_eq!(
        engine.submit_reveal(1, hash, reveal, now),
        SubmitStatus::Accepted,
        "reveal at height {} should admit",
        height
    );
    (hash, score)
}

// ==================== SCENARIO 1: GENESIS ONLY ====================

#[test]
fn scenario_genesis_only() {
    let a = engine();
    let b = engine();

    let view_a = a.snapshot();
    let view_b = b.snapshot();

    assert_eq!(view_a.tip.header_hash, view_b.tip.header_hash);
    assert_eq!(view_a.tip.cumulative_work, 0.0);
    assert_eq!(view_a.tip.height, 0);
}

// ==================== SCENARIO 2: LINEAR CHAIN ====================

#[test]
fn scenario_linear_chain_ten_blocks() {
    let mut engine = engine();
    let producer = producer(1);

    let mut expected_work = 0.0;
    for _ in 0..10 {
        let (_, score) = mine_one(&mut engine, &producer, None);
        expected_work += score;
    }

    let view = engine.snapshot();
    assert_eq!(view.tip.height, 10);
    assert_eq!(view.tip.cumulative_work, expected_work);
    // FINALITY_DEPTH = 32 not reached
    assert_eq!(view.finalized_height, None);
}

// ==================== SCENARIO 3: FORK THEN RESOLVE ====================

#[test]
fn scenario_fork_resolves_to_heavier_block() {
    let mut engine = engine();
    let mut fork_engine = ConsensusEngine::new(test_params()).unwrap();
    let miner_x = producer(1);
    let miner_y = producer(2);

    // Shared prefix of 4 blocks, identical on both engines
    for _ in 0..4 {
        let height = engine.snapshot().tip.height + 1;
        let t = time_at(height);
        let (h, r) = miner_x.produce_reporting(&engine, t, Vec::new(), None).unwrap();
        let hh = header_hash(&h).unwrap();
        engine.submit_header(1, h.clone(), t);
        engine.submit_reveal(1, hh, r.clone(), t);
        fork_engine.submit_header(1, h, t);
        fork_engine.submit_reveal(1, hh, r, t);
    }
    engine.take_events();

    // Block A extends the prefix with modest work
    let now = time_at(5);
    let (header_a, reveal_a) = miner_x
        .produce_reporting(&engine, now, Vec::new(), Some(5_000))
        .unwrap();
    let hash_a = header_hash(&header_a).unwrap();
    engine.submit_header(1, header_a, now);
    engine.submit_reveal(1, hash_a, reveal_a, now);
    assert_eq!(engine.snapshot().tip.header_hash, hash_a);
    engine.take_events();

    // Block B competes at the same height with strictly greater work;
    // it is built on the fork engine, whose tip is still the prefix.
    let (header_b, reveal_b) = miner_y
        .produce_reporting(&fork_engine, now, Vec::new(), Some(50_000))
        .unwrap();
    let hash_b = header_hash(&header_b).unwrap();

    engine.submit_header(2, header_b, now);
    engine.submit_reveal(2, hash_b, reveal_b, now);

    assert_eq!(engine.snapshot().tip.header_hash, hash_b);

    let events = engine.take_events();
    let reorg = events
        .iter()
        .find_map(|e| match e {
            ConsensusEvent::Reorg { unwound, applied } => Some((unwound, applied)),
            _ => None,
        })
        .expect("a reorg event must fire");
    assert_eq!(reorg.0, &vec![hash_a]);
    assert_eq!(reorg.1, &vec![hash_b]);
}

// ==================== SCENARIO 3b: DETERMINISM ====================

#[test]
fn scenario_two_nodes_same_stream_same_tip() {
    let mut node_a = engine();
    let mut node_b = engine();
    let miner = producer(3);

    // Record a stream of (header, reveal) pairs from a third engine
    let mut stream = Vec::new();
    {
        let mut source = ConsensusEngine::new(test_params()).unwrap();
        for _ in 0..8 {
            let height = source.snapshot().tip.height + 1;
            let t = time_at(height);
            let (h, r) = miner.produce_reporting(&source, t, Vec::new(), None).unwrap();
            let hh = header_hash(&h).unwrap();
            source.submit_header(1, h.clone(), t);
            source.submit_reveal(1, hh, r.clone(), t);
            stream.push((h, hh, r, t));
        }
    }

    for (header, hash, reveal, t) in &stream {
        node_a.submit_header(1, header.clone(), *t);
        node_a.submit_reveal(1, *hash, reveal.clone(), *t);
        node_b.submit_header(1, header.clone(), *t);
        node_b.submit_reveal(1, *hash, reveal.clone(), *t);
    }

    let view_a = node_a.snapshot();
    let view_b = node_b.snapshot();
    assert_eq!(view_a.tip.header_hash, view_b.tip.header_hash);
    assert_eq!(view_a.tip.cumulative_work, view_b.tip.cumulative_work);
    assert_eq!(view_a.finalized_height, view_b.finalized_height);
}

// ==================== SCENARIO 4: REORG REFUSAL ====================

#[test]
fn scenario_reorg_refused_beyond_bound() {
    // Small depths keep the test fast: max reorg depth 10, divergence 15
    let params = ChainParams {
        network_id: "coinjecture-test".to_string(),
        finality_depth: 10,
        max_reorg_depth: 10,
        ..Default::default()
    };

    let mut engine = ConsensusEngine::new(params.clone()).unwrap();
    let miner_main = BlockProducer::new(
        KeyPair::from_seed(&[1u8; 32]),
        HardwareTier::Desktop,
        params.clone(),
    );
    let miner_side = BlockProducer::new(
        KeyPair::from_seed(&[2u8; 32]),
        HardwareTier::Desktop,
        params.clone(),
    );

    // Shared prefix: 2 blocks, recorded for replay on the side engine
    let mut side_engine = ConsensusEngine::new(params.clone()).unwrap();
    for _ in 0..2 {
        let height = engine.snapshot().tip.height + 1;
        let t = time_at(height);
        let (h, r) = miner_main
            .produce_reporting(&engine, t, Vec::new(), None)
            .unwrap();
        let hh = header_hash(&h).unwrap();
        engine.submit_header(1, h.clone(), t);
        engine.submit_reveal(1, hh, r.clone(), t);
        side_engine.submit_header(1, h, t);
        side_engine.submit_reveal(1, hh, r, t);
    }

    // Main chain extends 15 more (modest work)
    for _ in 0..15 {
        let height = engine.snapshot().tip.height + 1;
        let t = time_at(height);
        let (h, r) = miner_main
            .produce_reporting(&engine, t, Vec::new(), Some(4_500))
            .unwrap();
        let hh = header_hash(&h).unwrap();
        engine.submit_header(1, h, t);
        engine.submit_reveal(1, hh, r, t);
    }
    let tip_before = engine.snapshot().tip;
    assert_eq!(tip_before.height, 17);
    engine.take_events();

    // Side chain diverges at height 2 with far heavier blocks
    let mut side_blocks = Vec::new();
    for _ in 0..14 {
        let height = side_engine.snapshot().tip.height + 1;
        let t = time_at(height) + 7; // distinct timestamps, same window
        let (h, r) = miner_side
            .produce_reporting(&side_engine, t, Vec::new(), Some(290_000))
            .unwrap();
        let hh = header_hash(&h).unwrap();
        side_engine.submit_header(1, h.clone(), t);
        side_engine.submit_reveal(1, hh, r.clone(), t);
        side_blocks.push((h, hh, r, t));
    }
    assert!(
        side_engine.snapshot().tip.cumulative_work > tip_before.cumulative_work,
        "side chain must be heavier for the refusal to trigger"
    );

    // Feed the heavy branch to the main engine
    for (h, hh, r, t) in side_blocks {
        engine.submit_header(2, h, t);
        engine.submit_reveal(2, hh, r, t);
    }

    let events = engine.take_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ConsensusEvent::ReorgRefused { depth: 15, max: 10 })),
        "expected a refusal event, got {:?}",
        events
    );
    assert_eq!(engine.snapshot().tip.header_hash, tip_before.header_hash);
}

// ==================== SCENARIO 5: COMMITMENT MISMATCH ====================

#[test]
fn scenario_commitment_mismatch_reveal() {
    let mut engine = engine();
    let miner = producer(1);

    let now = time_at(1);
    let (header, reveal) = miner.produce(&engine, now, Vec::new()).unwrap();
    let hash = header_hash(&header).unwrap();
    engine.submit_header(1, header, now);

    // A reveal binding different contents recomputes to C2 != C1
    let mut tampered = reveal;
    if let Solution::SubsetSum { indices } = &mut tampered.solution {
        indices.reverse();
    }
    tampered.miner_salt[0] ^= 0xFF;

    assert_eq!(
        engine.submit_reveal(1, hash, tampered, now),
        SubmitStatus::Rejected(ConsensusError::CommitmentMismatch)
    );
    assert_eq!(
        engine.tree().get(&hash).unwrap().state,
        NodeState::HeaderOnly
    );
}

// ==================== SCENARIO 6: BUDGET EXCEEDED ====================

#[test]
fn scenario_budget_exceeded_verify() {
    let mut engine = engine();
    let miner = producer(1);

    let now = time_at(1);
    let (header, reveal) = miner.produce(&engine, now, Vec::new()).unwrap();
    let hash = header_hash(&header).unwrap();
    engine.submit_header(1, header, now);

    // Sanity: the honest reveal passes its tier budget comfortably
    let budget = VerifyBudget::from_tier(HardwareTier::Desktop);
    assert_eq!(
        coinjecture_core::problem::verify(&reveal.problem, &reveal.solution, &budget),
        VerifyOutcome::Valid
    );

    // A crafted budget that dies mid-verification maps to rejection and a
    // peer fault, leaving the tree unchanged.
    let starved = VerifyBudget {
        max_ops: 1,
        max_duration_ms: u64::MAX,
    };
    let outcome =
        coinjecture_core::problem::verify(&reveal.problem, &reveal.solution, &starved);
    assert_eq!(outcome, VerifyOutcome::BudgetExceeded);

    let ticket = coinjecture_consensus::engine::RevealTicket {
        header_hash: hash,
        height: 1,
        budget: starved,
    };
    let faults_before = engine.peer_faults(1);
    let status = {
        let result = engine.attach_reveal(&ticket, reveal, outcome);
        assert!(matches!(
            result,
            Err(ConsensusError::BudgetExceeded { max_ops: 1 })
        ));
        engine.submit_reveal(1, hash, make_garbage_reveal(), now)
    };
    // The garbage reveal also rejects; header stays HEADER_ONLY throughout
    assert!(matches!(status, SubmitStatus::Rejected(_)));
    assert!(engine.peer_faults(1) > faults_before);
    assert_eq!(
        engine.tree().get(&hash).unwrap().state,
        NodeState::HeaderOnly
    );
    assert_eq!(engine.snapshot().tip.height, 0);
}

fn make_garbage_reveal() -> Reveal {
    Reveal {
        problem: Problem::SubsetSum {
            elements: vec![1; 20],
            target: 999,
        },
        solution: Solution::SubsetSum { indices: vec![0] },
        miner_salt: [0u8; 32],
        measured: ComplexityRecord {
            solve_time_ms: 10,
            memory: MemoryClass::Low,
            attempts: 1,
        },
    }
}

// ==================== SCENARIO 7: REPLAY ====================

#[test]
fn scenario_replay_within_epoch() {
    let mut engine = engine();
    let miner = producer(1);

    let now = time_at(1);
    let (header, reveal) = miner.produce(&engine, now, Vec::new()).unwrap();
    let hash = header_hash(&header).unwrap();

    engine.submit_header(1, header.clone(), now);
    engine.submit_reveal(1, hash, reveal.clone(), now);
    let view_before = engine.snapshot();

    assert_eq!(
        engine.submit_header(1, header, now),
        SubmitStatus::AcceptedDuplicate
    );
    assert_eq!(
        engine.submit_reveal(1, hash, reveal, now),
        SubmitStatus::AcceptedDuplicate
    );
    assert_eq!(engine.snapshot(), view_before);
}

// ==================== FINALITY ====================

#[test]
fn scenario_finality_depth_crossed() {
    let params = ChainParams {
        network_id: "coinjecture-test".to_string(),
        finality_depth: 5,
        max_reorg_depth: 100,
        ..Default::default()
    };
    let mut engine = ConsensusEngine::new(params.clone()).unwrap();
    let miner = BlockProducer::new(
        KeyPair::from_seed(&[1u8; 32]),
        HardwareTier::Desktop,
        params,
    );

    let mut hashes = Vec::new();
    for _ in 0..8 {
        let height = engine.snapshot().tip.height + 1;
        let t = time_at(height);
        let (h, r) = miner.produce_reporting(&engine, t, Vec::new(), None).unwrap();
        let hh = header_hash(&h).unwrap();
        engine.submit_header(1, h, t);
        engine.submit_reveal(1, hh, r, t);
        hashes.push(hh);
    }

    // Tip at 8, k = 5: heights 1..=3 are FINAL
    let view = engine.snapshot();
    assert_eq!(view.finalized_height, Some(3));
    assert_eq!(
        engine.tree().get(&hashes[2]).unwrap().state,
        NodeState::Final
    );
    assert_eq!(
        engine.tree().get(&hashes[3]).unwrap().state,
        NodeState::Revealed
    );

    let events = engine.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ConsensusEvent::Finalized { .. })));
}
