//! Block producer: generate an instance from the chain state, solve it,
//! measure the cost, commit, and sign.
//!
//! The producer never mutates the engine; it reads the tip and the current
//! difficulty target and emits a (header, reveal) pair for submission.

use crate::engine::ConsensusEngine;
use coinjecture_core::codec;
use coinjecture_core::commitment::{epoch_number, epoch_salt, make_commitment};
use coinjecture_core::crypto::{sign_header, KeyPair};
use coinjecture_core::errors::{ConsensusError, Result};
use coinjecture_core::hash::{sha256, sha256_multi};
use coinjecture_core::merkle::merkle_root_of_transactions;
use coinjecture_core::params::ChainParams;
use coinjecture_core::problem;
use coinjecture_core::types::{
    BlockHeader, ComplexityRecord, HardwareTier, MemoryClass, Reveal, Transaction, CODEC_VERSION,
};
use rand::RngCore;
use std::time::Instant;
use tracing::debug;

pub struct BlockProducer {
    keypair: KeyPair,
    tier: HardwareTier,
    params: ChainParams,
}

impl BlockProducer {
    pub fn new(keypair: KeyPair, tier: HardwareTier, params: ChainParams) -> Self {
        Self {
            keypair,
            tier,
            params,
        }
    }

    pub fn address(&self) -> [u8; 32] {
        self.keypair.address()
    }

    /// Produce a block extending the engine's current tip
    pub fn produce(
        &self,
        engine: &ConsensusEngine,
        timestamp: i64,
        transactions: Vec<Transaction>,
    ) -> Result<(BlockHeader, Reveal)> {
        self.produce_reporting(engine, timestamp, transactions, None)
    }

    /// Like `produce`, but with an explicit reported solve time (tests and
    /// benchmark rigs; still subject to the tier cap at admission)
    pub fn produce_reporting(
        &self,
        engine: &ConsensusEngine,
        timestamp: i64,
        transactions: Vec<Transaction>,
        reported_solve_ms: Option<u64>,
    ) -> Result<(BlockHeader, Reveal)> {
        self.produce_at(
            engine.tree().tip(),
            engine.difficulty_target(self.tier),
            timestamp,
            transactions,
            reported_solve_ms,
        )
    }

    /// Build a block extending an arbitrary tip (remote engine views)
    pub fn produce_at(
        &self,
        tip: crate::tree::ChainTip,
        target: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        reported_solve_ms: Option<u64>,
    ) -> Result<(BlockHeader, Reveal)> {
        let height = tip.height + 1;

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let (miner_salt, instance, solution) = loop {
            attempts += 1;
            if attempts > 64 {
                return Err(ConsensusError::Internal(
                    "no solvable instance after 64 attempts".to_string(),
                ));
            }

            let mut salt = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut salt);

            let seed = sha256_multi(&[&tip.header_hash, &salt, &self.keypair.address()]);
            let instance = problem::generate(&seed, self.tier, target);
            if let Some(solution) = problem::solve(&instance) {
                break (salt, instance, solution);
            }
        };

        let solve_time_ms = reported_solve_ms
            .unwrap_or_else(|| (started.elapsed().as_millis() as u64).max(1));
        let measured = ComplexityRecord {
            solve_time_ms,
            memory: MemoryClass::Low,
            attempts,
        };

        let reveal = Reveal {
            problem: instance,
            solution,
            miner_salt,
            measured,
        };

        let epoch = epoch_number(height, self.params.epoch_length);
        let salt = epoch_salt(epoch, &self.params.network_id)?;
        let commitment = make_commitment(
            &salt,
            &tip.header_hash,
            &reveal.miner_salt,
            &codec::problem_hash(&reveal.problem)?,
            &codec::solution_hash(&reveal.solution)?,
        )?;

        // Content address of the proof bundle; the storage layer pins the
        // encoded reveal under this digest.
        let offchain_cid = hex::encode(sha256(&codec::encode(&reveal)?)).into_bytes();

        let mut header = BlockHeader {
            codec_version: CODEC_VERSION,
            block_index: height,
            timestamp,
            parent_hash: tip.header_hash,
            merkle_root: merkle_root_of_transactions(&transactions)?,
            miner_address: [0u8; 32],
            commitment,
            difficulty_target: target,
            tier: self.tier,
            offchain_cid,
            miner_public_key: [0u8; 32],
            miner_signature: [0u8; 64],
        };
        sign_header(&mut header, &self.keypair)?;

        debug!(
            height,
            attempts,
            solve_time_ms,
            "produced block candidate"
        );
        Ok((header, reveal))
    }
}
