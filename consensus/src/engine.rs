//! The consensus engine: classify -> admit -> verify -> attach -> fork
//! choice -> events and outbound pacing.
//!
//! The engine is the single writer of the tree, replay cache, and
//! difficulty state. It is fully synchronous and deterministic: two engines
//! fed the same ordered byte stream with the same clock readings reach the
//! same tip and the same FINAL set. The actor wrapper in `actor` puts this
//! behind channels without changing any of that.

use crate::admission::{AdmissionGate, PeerId, ReplayCheck};
use crate::difficulty::DifficultyAdjuster;
use crate::events::{ConsensusEvent, HeaderHash};
use crate::pacer::OutboundItem;
use crate::tree::{BlockTree, ChainTip, InsertOutcome, NodeState};
use coinjecture_core::codec::{self, header_hash};
use coinjecture_core::commitment;
use coinjecture_core::errors::{ConsensusError, Result};
use coinjecture_core::params::ChainParams;
use coinjecture_core::problem;
use coinjecture_core::types::{
    Block, BlockHeader, Reveal, VerifyBudget, VerifyOutcome,
};
use coinjecture_core::work;
use coinjecture_network::wire::{decode_message, Message};
use std::collections::{HashMap, VecDeque};
use tracing::{error, info, warn};

/// Cap on reveals buffered for headers we have not seen yet
const MAX_PENDING_REVEALS: usize = 4096;

/// Outcome of a submission, also the ack surface of `submit(bytes)`
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitStatus {
    Accepted,
    AcceptedDuplicate,
    Rejected(ConsensusError),
}

/// Read-only view for downstream consumers
#[derive(Debug, Clone, PartialEq)]
pub struct ChainView {
    pub tip: ChainTip,
    pub finalized_height: Option<u64>,
    pub epoch: u64,
    pub difficulty_targets: [(coinjecture_core::types::HardwareTier, u64); 3],
    pub safe_mode: bool,
}

impl ChainView {
    pub fn target_for(&self, tier: coinjecture_core::types::HardwareTier) -> u64 {
        self.difficulty_targets
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }
}

/// Admission decision for a reveal, before the budgeted verify runs
pub enum RevealAdmission {
    Proceed(RevealTicket),
    Duplicate,
}

/// Everything the verifier pool needs, detached from engine state
#[derive(Debug, Clone)]
pub struct RevealTicket {
    pub header_hash: HeaderHash,
    pub height: u64,
    pub budget: VerifyBudget,
}

/// Deterministic genesis for a network: all zeros except the network
/// binding, so equal `network_id` means equal genesis hash.
pub fn genesis_header(params: &ChainParams) -> BlockHeader {
    BlockHeader {
        offchain_cid: params.network_id.as_bytes().to_vec(),
        ..Default::default()
    }
}

pub struct ConsensusEngine {
    params: ChainParams,
    admission: AdmissionGate,
    tree: BlockTree,
    difficulty: DifficultyAdjuster,
    /// Reveals that arrived before their header, FIFO-bounded
    pending_reveals: HashMap<HeaderHash, Reveal>,
    outbound: VecDeque<OutboundItem>,
    replies: VecDeque<(PeerId, Message)>,
    events: VecDeque<ConsensusEvent>,
    current_epoch: u64,
    finalized_height: Option<u64>,
    safe_mode: bool,
}

impl ConsensusEngine {
    pub fn new(params: ChainParams) -> Result<Self> {
        params
            .validate()
            .map_err(ConsensusError::Internal)?;
        let genesis = genesis_header(&params);
        let tree = BlockTree::new(params.clone(), genesis)?;
        Ok(Self {
            admission: AdmissionGate::new(params.clone()),
            difficulty: DifficultyAdjuster::new(params.clone()),
            params,
            tree,
            pending_reveals: HashMap::new(),
            outbound: VecDeque::new(),
            replies: VecDeque::new(),
            events: VecDeque::new(),
            current_epoch: 0,
            finalized_height: None,
            safe_mode: false,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn difficulty_target(&self, tier: coinjecture_core::types::HardwareTier) -> u64 {
        self.difficulty.target_for(tier)
    }

    pub fn snapshot(&self) -> ChainView {
        ChainView {
            tip: self.tree.tip(),
            finalized_height: self.finalized_height,
            epoch: self.current_epoch,
            difficulty_targets: self.difficulty.targets(),
            safe_mode: self.safe_mode,
        }
    }

    // ==================== INGRESS ====================

    /// Entry point for raw peer bytes: decode, classify, dispatch
    pub fn on_bytes_in(&mut self, peer: PeerId, bytes: &[u8], now_secs: i64) -> SubmitStatus {
        if self.safe_mode {
            return SubmitStatus::Rejected(ConsensusError::Internal(
                "engine is in read-only safe mode".to_string(),
            ));
        }

        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.admission.fault(peer);
                return SubmitStatus::Rejected(ConsensusError::Codec(e.to_string()));
            }
        };

        match message {
            Message::Header(header) => self.submit_header(peer, header, now_secs),
            Message::Reveal {
                header_hash,
                reveal,
            } => self.submit_reveal(peer, header_hash, reveal, now_secs),
            Message::RequestBlock { header_hash } => {
                let block = self.lookup_block(&header_hash);
                self.replies.push_back((
                    peer,
                    Message::ResponseBlock { header_hash, block },
                ));
                SubmitStatus::Accepted
            }
            Message::ResponseBlock {
                header_hash,
                block: Some(block),
            } => {
                let status = self.submit_header(peer, block.header, now_secs);
                match status {
                    SubmitStatus::Accepted | SubmitStatus::AcceptedDuplicate => {
                        self.submit_reveal(peer, header_hash, block.reveal, now_secs)
                    }
                    rejected => rejected,
                }
            }
            Message::ResponseBlock { block: None, .. } => SubmitStatus::Accepted,
            Message::HeadersRangeRequest { from_height, count } => {
                let headers = self.tree.headers_range(from_height, count.min(512));
                self.replies
                    .push_back((peer, Message::HeadersRangeResponse { headers }));
                SubmitStatus::Accepted
            }
            Message::HeadersRangeResponse { headers } => {
                let mut last = SubmitStatus::Accepted;
                for header in headers {
                    last = self.submit_header(peer, header, now_secs);
                    if let SubmitStatus::Rejected(e) = &last {
                        if e.is_fatal() {
                            break;
                        }
                    }
                }
                last
            }
        }
    }

    // ==================== HEADERS ====================

    pub fn submit_header(
        &mut self,
        peer: PeerId,
        header: BlockHeader,
        now_secs: i64,
    ) -> SubmitStatus {
        if self.safe_mode {
            return SubmitStatus::Rejected(ConsensusError::Internal(
                "engine is in read-only safe mode".to_string(),
            ));
        }
        let result = self.admit_header(peer, header, now_secs, true);
        self.resolve(peer, result)
    }

    /// The ordered header gates. `charge_rate` is false on orphan
    /// re-admission, which is not a fresh peer message.
    fn admit_header(
        &mut self,
        peer: PeerId,
        header: BlockHeader,
        now_secs: i64,
        charge_rate: bool,
    ) -> Result<SubmitStatus> {
        // 1. Syntactic / structural
        codec::validate_header_structure(&header)?;

        // 2. Signature and address derivation
        self.admission.check_signature(&header)?;

        // 3. Tier legality of the declared target
        self.admission.check_tier_target(&header)?;

        // 4. Timestamps; the chain median needs a known parent
        let parent_known = self.tree.contains(&header.parent_hash);
        if parent_known {
            let median = self.tree.median_time_past(&header.parent_hash);
            self.admission.check_timestamp(header.timestamp, now_secs, median)?;
        } else {
            self.admission.check_timestamp(header.timestamp, now_secs, None)?;
        }

        let hash = header_hash(&header)?;
        let epoch = header.epoch(self.params.epoch_length);

        // 5. Replay
        if self
            .admission
            .check_replay(&header.commitment, epoch, &hash)?
            == ReplayCheck::Duplicate
        {
            return Ok(SubmitStatus::AcceptedDuplicate);
        }

        // 6. Per-miner sequencing
        self.admission
            .check_sequence(&header.miner_address, epoch, header.block_index)?;

        // 7. Rate gate
        if charge_rate {
            self.admission.check_rate(peer, now_secs)?;
        }

        let miner = header.miner_address;
        let commitment_value = header.commitment;
        let height = header.block_index;

        match self.tree.insert_header(header)? {
            InsertOutcome::AlreadyKnown(_) => return Ok(SubmitStatus::AcceptedDuplicate),
            InsertOutcome::Orphaned(_) => return Err(ConsensusError::ParentUnknown),
            InsertOutcome::Attached(attached) => {
                debug_assert_eq!(attached, hash);
            }
        }

        self.admission
            .record_admission(commitment_value, epoch, hash, miner, height, now_secs);

        self.outbound.push_back(OutboundItem::Header(Box::new(
            self.tree
                .get(&hash)
                .ok_or_else(|| {
                    ConsensusError::Internal("freshly attached header vanished".to_string())
                })?
                .header
                .clone(),
        )));

        // A reveal that raced ahead of its header
        if let Some(reveal) = self.pending_reveals.remove(&hash) {
            let status = self.submit_reveal(peer, hash, reveal, now_secs);
            if let SubmitStatus::Rejected(e) = status {
                warn!(error = %e, "buffered reveal rejected after header arrival");
            }
        }

        // Orphan headers waiting on this one re-admit in arrival order
        for orphan in self.tree.take_orphans_of(&hash) {
            let result = self.admit_header(peer, orphan, now_secs, false);
            if let Err(e) = &result {
                if e.is_fatal() {
                    return result;
                }
            }
        }

        Ok(SubmitStatus::Accepted)
    }

    // ==================== REVEALS ====================

    pub fn submit_reveal(
        &mut self,
        peer: PeerId,
        header_hash: HeaderHash,
        reveal: Reveal,
        now_secs: i64,
    ) -> SubmitStatus {
        if self.safe_mode {
            return SubmitStatus::Rejected(ConsensusError::Internal(
                "engine is in read-only safe mode".to_string(),
            ));
        }

        let admission = self.admit_reveal(peer, &header_hash, &reveal, now_secs);
        match admission {
            Err(e) => self.resolve(peer, Err(e)),
            Ok(RevealAdmission::Duplicate) => SubmitStatus::AcceptedDuplicate,
            Ok(RevealAdmission::Proceed(ticket)) => {
                let outcome = problem::verify(&reveal.problem, &reveal.solution, &ticket.budget);
                let result = self.attach_reveal(&ticket, reveal, outcome);
                self.resolve(peer, result)
            }
        }
    }

    /// Replay one accepted block from the local consensus log. The log is
    /// this node's own prior output, so the rate gate does not apply; all
    /// consensus gates still do.
    pub fn replay_accepted(
        &mut self,
        header: BlockHeader,
        reveal: Option<Reveal>,
    ) -> SubmitStatus {
        let now_secs = header.timestamp;
        let hash = match header_hash(&header) {
            Ok(hash) => hash,
            Err(e) => return SubmitStatus::Rejected(e),
        };

        let result = self.admit_header(0, header, now_secs, false);
        let status = self.resolve(0, result);
        if let SubmitStatus::Rejected(_) = status {
            return status;
        }

        let Some(reveal) = reveal else {
            return status;
        };
        let admission = self.admit_reveal_gates(0, &hash, &reveal, now_secs, false);
        match admission {
            Err(e) => self.resolve(0, Err(e)),
            Ok(RevealAdmission::Duplicate) => SubmitStatus::AcceptedDuplicate,
            Ok(RevealAdmission::Proceed(ticket)) => {
                let outcome = problem::verify(&reveal.problem, &reveal.solution, &ticket.budget);
                let result = self.attach_reveal(&ticket, reveal, outcome);
                self.resolve(0, result)
            }
        }
    }

    /// Gates that run before the budgeted verifier. Pure admission: no
    /// tree mutation besides the pending-reveal buffer.
    pub fn admit_reveal(
        &mut self,
        peer: PeerId,
        header_hash: &HeaderHash,
        reveal: &Reveal,
        now_secs: i64,
    ) -> Result<RevealAdmission> {
        self.admit_reveal_gates(peer, header_hash, reveal, now_secs, true)
    }

    fn admit_reveal_gates(
        &mut self,
        peer: PeerId,
        header_hash: &HeaderHash,
        reveal: &Reveal,
        now_secs: i64,
        charge_rate: bool,
    ) -> Result<RevealAdmission> {
        let Some(node) = self.tree.get(header_hash) else {
            // Reveal before header: buffer under the same TTL as orphans
            if self.pending_reveals.len() < MAX_PENDING_REVEALS {
                self.pending_reveals.insert(*header_hash, reveal.clone());
            }
            return Err(ConsensusError::ParentUnknown);
        };

        if node.state != NodeState::HeaderOnly {
            if self.tree.has_same_reveal(header_hash, reveal) {
                return Ok(RevealAdmission::Duplicate);
            }
            return Err(ConsensusError::RevealUnexpected);
        }

        let header = node.header.clone();
        let height = node.height;

        self.admission.check_tier_reveal(&header, reveal)?;

        commitment::verify_reveal(
            &header,
            reveal,
            &self.params.network_id,
            self.params.epoch_length,
        )?;

        if charge_rate {
            self.admission.check_rate(peer, now_secs)?;
        }

        Ok(RevealAdmission::Proceed(RevealTicket {
            header_hash: *header_hash,
            height,
            budget: VerifyBudget::from_tier(header.tier),
        }))
    }

    /// Score and attach a verified reveal, then re-run fork choice.
    /// Rejections never touch committed tree state.
    pub fn attach_reveal(
        &mut self,
        ticket: &RevealTicket,
        reveal: Reveal,
        outcome: VerifyOutcome,
    ) -> Result<SubmitStatus> {
        match outcome {
            VerifyOutcome::Invalid => return Err(ConsensusError::VerificationInvalid),
            VerifyOutcome::BudgetExceeded => {
                return Err(ConsensusError::BudgetExceeded {
                    max_ops: ticket.budget.max_ops,
                })
            }
            VerifyOutcome::Valid => {}
        }

        let node = self
            .tree
            .get(&ticket.header_hash)
            .ok_or(ConsensusError::ParentUnknown)?;
        let tier = node.header.tier;

        let score = work::work_score(tier, reveal.problem.size(), &reveal.measured);
        if !(score > 0.0) {
            return Err(ConsensusError::WorkNotPositive { score });
        }

        let revealed = self
            .tree
            .apply_reveal(&ticket.header_hash, reveal.clone(), score)?;

        for hash in &revealed {
            if let Some(node) = self.tree.get(hash) {
                self.difficulty
                    .observe_block(node.header.tier, node.header.timestamp);
            }
        }

        let events = self.tree.update_fork_choice()?;
        self.commit_events(events);
        self.roll_epoch_if_needed();
        self.tree.expire();

        self.outbound.push_back(OutboundItem::Reveal {
            header_hash: ticket.header_hash,
            reveal: Box::new(reveal),
        });

        Ok(SubmitStatus::Accepted)
    }

    // ==================== EPOCHS / EVENTS ====================

    fn roll_epoch_if_needed(&mut self) {
        let tip_epoch = self.tree.tip().height / self.params.epoch_length;
        if tip_epoch > self.current_epoch {
            self.current_epoch = tip_epoch;
            self.admission.prune_epoch(tip_epoch);
            self.difficulty.on_epoch_rollover();
            info!(epoch = tip_epoch, "epoch rollover");
            self.events
                .push_back(ConsensusEvent::EpochRollover { epoch: tip_epoch });
        }
    }

    fn commit_events(&mut self, events: Vec<ConsensusEvent>) {
        for event in events {
            if let ConsensusEvent::Finalized { hashes } = &event {
                if let Some(last) = hashes.last() {
                    if let Some(node) = self.tree.get(last) {
                        self.finalized_height = Some(
                            self.finalized_height
                                .map_or(node.height, |h| h.max(node.height)),
                        );
                    }
                }
            }
            self.events.push_back(event);
        }
    }

    pub(crate) fn resolve(&mut self, peer: PeerId, result: Result<SubmitStatus>) -> SubmitStatus {
        match result {
            Ok(status) => status,
            Err(e) => {
                if e.is_fatal() {
                    error!(error = %e, "fatal invariant failure; entering safe mode");
                    self.safe_mode = true;
                } else if e.is_peer_fault() {
                    self.admission.fault(peer);
                }
                SubmitStatus::Rejected(e)
            }
        }
    }

    // ==================== READS / DRAINS ====================

    fn lookup_block(&self, hash: &HeaderHash) -> Option<Block> {
        let node = self.tree.get(hash)?;
        let reveal = node.reveal.clone()?;
        Some(Block {
            header: node.header.clone(),
            reveal,
            transactions: Vec::new(),
        })
    }

    pub fn peer_faults(&self, peer: PeerId) -> u32 {
        self.admission.fault_count(peer)
    }

    pub fn take_events(&mut self) -> Vec<ConsensusEvent> {
        self.events.drain(..).collect()
    }

    pub fn take_outbound(&mut self) -> Vec<OutboundItem> {
        self.outbound.drain(..).collect()
    }

    pub fn take_replies(&mut self) -> Vec<(PeerId, Message)> {
        self.replies.drain(..).collect()
    }
}
