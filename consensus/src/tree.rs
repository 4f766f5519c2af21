//! Block tree and fork choice.
//!
//! Headers form a DAG keyed by header hash; parents are referenced by hash,
//! children lists are non-owning. Each node's cumulative work is fixed when
//! its reveal attaches and never edited. The tip is the heaviest Revealed or
//! Final node, ties broken by lowest hash; an arrival sequence number acts
//! only as a local stabilizer for which equal-work tip the miner extends.

use crate::events::{ConsensusEvent, HeaderHash};
use coinjecture_core::codec::header_hash;
use coinjecture_core::errors::{ConsensusError, Result};
use coinjecture_core::params::ChainParams;
use coinjecture_core::types::{BlockHeader, Reveal};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Lifecycle of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    HeaderOnly,
    Revealed,
    Final,
}

impl NodeState {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::HeaderOnly => 0,
            Self::Revealed => 1,
            Self::Final => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::HeaderOnly),
            1 => Some(Self::Revealed),
            2 => Some(Self::Final),
            _ => None,
        }
    }
}

/// Tree entry; owned exclusively by the tree
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub header_hash: HeaderHash,
    pub header: BlockHeader,
    pub reveal: Option<Reveal>,
    pub parent_hash: HeaderHash,
    pub children: Vec<HeaderHash>,
    pub height: u64,
    pub work_score: f64,
    pub cumulative_work: f64,
    pub state: NodeState,
    pub arrival_seq: u64,
}

/// The head of the locally selected chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainTip {
    pub header_hash: HeaderHash,
    pub cumulative_work: f64,
    pub height: u64,
}

/// A header buffered until its parent arrives
#[derive(Debug, Clone)]
struct OrphanHeader {
    header: BlockHeader,
    buffered_at_height: u64,
    arrival_seq: u64,
}

/// Outcome of a header insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Attached(HeaderHash),
    AlreadyKnown(HeaderHash),
    Orphaned(HeaderHash),
}

pub struct BlockTree {
    params: ChainParams,
    nodes: HashMap<HeaderHash, BlockNode>,
    genesis_hash: HeaderHash,
    tip: HeaderHash,
    arrival_counter: u64,
    /// parent hash -> headers waiting for it, in arrival order
    orphans: HashMap<HeaderHash, Vec<OrphanHeader>>,
    /// reveals waiting for their parent chain to reveal: hash -> (reveal, score)
    pending_reveals: HashMap<HeaderHash, (Reveal, f64)>,
}

impl BlockTree {
    /// Build a tree rooted at the genesis header (zero parent, zero work)
    pub fn new(params: ChainParams, genesis: BlockHeader) -> Result<Self> {
        if !genesis.is_genesis() {
            return Err(ConsensusError::Internal(
                "tree root must be a genesis header".to_string(),
            ));
        }
        let genesis_hash = header_hash(&genesis)?;

        let node = BlockNode {
            header_hash: genesis_hash,
            header: genesis,
            reveal: None,
            parent_hash: [0u8; 32],
            children: Vec::new(),
            height: 0,
            work_score: 0.0,
            cumulative_work: 0.0,
            state: NodeState::Revealed,
            arrival_seq: 0,
        };

        let mut nodes = HashMap::new();
        nodes.insert(genesis_hash, node);

        Ok(Self {
            params,
            nodes,
            genesis_hash,
            tip: genesis_hash,
            arrival_counter: 0,
            orphans: HashMap::new(),
            pending_reveals: HashMap::new(),
        })
    }

    pub fn genesis_hash(&self) -> HeaderHash {
        self.genesis_hash
    }

    pub fn contains(&self, hash: &HeaderHash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get(&self, hash: &HeaderHash) -> Option<&BlockNode> {
        self.nodes.get(hash)
    }

    pub fn tip(&self) -> ChainTip {
        let node = &self.nodes[&self.tip];
        ChainTip {
            header_hash: node.header_hash,
            cumulative_work: node.cumulative_work,
            height: node.height,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Median of up to the previous 11 timestamps along the chain ending at
    /// `parent_hash` (inclusive)
    pub fn median_time_past(&self, parent_hash: &HeaderHash) -> Option<i64> {
        let mut timestamps = Vec::with_capacity(11);
        let mut cursor = *parent_hash;
        while timestamps.len() < 11 {
            let node = self.nodes.get(&cursor)?;
            timestamps.push(node.header.timestamp);
            if node.height == 0 {
                break;
            }
            cursor = node.parent_hash;
        }
        timestamps.sort_unstable();
        Some(timestamps[timestamps.len() / 2])
    }

    /// Insert a header whose parent may or may not be known yet.
    ///
    /// Unknown parents buffer the header as an orphan; the caller surfaces
    /// `ParentUnknown` without a peer fault.
    pub fn insert_header(&mut self, header: BlockHeader) -> Result<InsertOutcome> {
        let hash = header_hash(&header)?;
        if self.nodes.contains_key(&hash) {
            return Ok(InsertOutcome::AlreadyKnown(hash));
        }

        let parent_hash = header.parent_hash;
        let Some(parent) = self.nodes.get(&parent_hash) else {
            self.arrival_counter += 1;
            let tip_height = self.tip().height;
            self.orphans
                .entry(parent_hash)
                .or_default()
                .push(OrphanHeader {
                    header,
                    buffered_at_height: tip_height,
                    arrival_seq: self.arrival_counter,
                });
            debug!(hash = %hex::encode(hash), "buffered orphan header");
            return Ok(InsertOutcome::Orphaned(hash));
        };

        if header.block_index != parent.height + 1 {
            return Err(ConsensusError::Codec(format!(
                "block_index {} does not extend parent height {}",
                header.block_index, parent.height
            )));
        }

        self.arrival_counter += 1;
        let node = BlockNode {
            header_hash: hash,
            height: header.block_index,
            parent_hash,
            header,
            reveal: None,
            children: Vec::new(),
            work_score: 0.0,
            cumulative_work: 0.0,
            state: NodeState::HeaderOnly,
            arrival_seq: self.arrival_counter,
        };
        self.nodes.insert(hash, node);
        if let Some(parent) = self.nodes.get_mut(&parent_hash) {
            parent.children.push(hash);
        }

        debug!(hash = %hex::encode(hash), "attached header");
        Ok(InsertOutcome::Attached(hash))
    }

    /// Drain orphan headers waiting on `parent_hash`, in arrival order
    pub fn take_orphans_of(&mut self, parent_hash: &HeaderHash) -> Vec<BlockHeader> {
        let mut waiting = self.orphans.remove(parent_hash).unwrap_or_default();
        waiting.sort_by_key(|o| o.arrival_seq);
        waiting.into_iter().map(|o| o.header).collect()
    }

    /// Attach a verified reveal and its work score.
    ///
    /// If the parent chain is not yet revealed the reveal parks until it is;
    /// cumulative work is assigned exactly once, when the whole ancestry is
    /// scored. Returns the hashes that transitioned to Revealed.
    pub fn apply_reveal(
        &mut self,
        hash: &HeaderHash,
        reveal: Reveal,
        work_score: f64,
    ) -> Result<Vec<HeaderHash>> {
        let node = self
            .nodes
            .get(hash)
            .ok_or(ConsensusError::ParentUnknown)?;
        if node.state != NodeState::HeaderOnly {
            return Err(ConsensusError::RevealUnexpected);
        }
        if !(work_score > 0.0) {
            return Err(ConsensusError::WorkNotPositive { score: work_score });
        }

        let parent_state = self
            .nodes
            .get(&node.parent_hash)
            .map(|p| p.state)
            .ok_or_else(|| ConsensusError::Internal("attached node lost its parent".to_string()))?;

        if parent_state == NodeState::HeaderOnly {
            self.pending_reveals.insert(*hash, (reveal, work_score));
            return Ok(Vec::new());
        }

        let mut revealed = Vec::new();
        self.reveal_node(hash, reveal, work_score, &mut revealed)?;

        // Cascade into children whose reveals arrived early
        let mut frontier = revealed.clone();
        while let Some(current) = frontier.pop() {
            let children = self.nodes[&current].children.clone();
            for child in children {
                if let Some((reveal, score)) = self.pending_reveals.remove(&child) {
                    self.reveal_node(&child, reveal, score, &mut revealed)?;
                    frontier.push(child);
                }
            }
        }

        Ok(revealed)
    }

    fn reveal_node(
        &mut self,
        hash: &HeaderHash,
        reveal: Reveal,
        work_score: f64,
        revealed: &mut Vec<HeaderHash>,
    ) -> Result<()> {
        let parent_hash = self.nodes[hash].parent_hash;
        let parent_cumulative = self.nodes[&parent_hash].cumulative_work;

        let node = self
            .nodes
            .get_mut(hash)
            .ok_or_else(|| ConsensusError::Internal("reveal target vanished".to_string()))?;
        node.reveal = Some(reveal);
        node.work_score = work_score;
        node.cumulative_work = parent_cumulative + work_score;
        node.state = NodeState::Revealed;
        revealed.push(*hash);
        Ok(())
    }

    /// Does the stored reveal equal this one (idempotent resubmission)?
    pub fn has_same_reveal(&self, hash: &HeaderHash, reveal: &Reveal) -> bool {
        self.nodes
            .get(hash)
            .and_then(|n| n.reveal.as_ref())
            .map(|r| r == reveal)
            .unwrap_or(false)
    }

    // ==================== FORK CHOICE ====================

    /// Strict ordering for tip selection: heavier wins; exact work ties go
    /// to the lexicographically lowest hash.
    fn better_tip(a: &BlockNode, b: &BlockNode) -> bool {
        if a.cumulative_work != b.cumulative_work {
            return a.cumulative_work > b.cumulative_work;
        }
        a.header_hash < b.header_hash
    }

    /// Re-run fork choice after an attachment. Emits tip/reorg/finality
    /// events in commit order; never leaves the tree partially updated.
    pub fn update_fork_choice(&mut self) -> Result<Vec<ConsensusEvent>> {
        let mut events = Vec::new();

        let best = self
            .nodes
            .values()
            .filter(|n| n.state != NodeState::HeaderOnly)
            .fold(None::<&BlockNode>, |best, candidate| match best {
                None => Some(candidate),
                Some(current) => {
                    if Self::better_tip(candidate, current) {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            })
            .ok_or_else(|| ConsensusError::Internal("tree has no revealed node".to_string()))?
            .header_hash;

        if best == self.tip {
            self.advance_finality(&mut events)?;
            return Ok(events);
        }

        let old_tip = self.tip;
        let ancestor = self.common_ancestor(&old_tip, &best)?;
        let old_height = self.nodes[&old_tip].height;
        let ancestor_height = self.nodes[&ancestor].height;
        let unwind_depth = old_height - ancestor_height;

        if unwind_depth > self.params.max_reorg_depth {
            let pruned = self.prune_branch_toward(&ancestor, &best)?;
            warn!(
                depth = unwind_depth,
                max = self.params.max_reorg_depth,
                pruned,
                "reorg refused; branch pruned"
            );
            events.push(ConsensusEvent::ReorgRefused {
                depth: unwind_depth,
                max: self.params.max_reorg_depth,
            });
            return Ok(events);
        }

        // FINAL nodes are never unwound, whatever the weights say
        if self.path_contains_final(&old_tip, &ancestor) {
            let pruned = self.prune_branch_toward(&ancestor, &best)?;
            warn!(pruned, "reorg would unwind finalized blocks; branch pruned");
            events.push(ConsensusEvent::ReorgRefused {
                depth: unwind_depth,
                max: self.params.max_reorg_depth,
            });
            return Ok(events);
        }

        let unwound = self.path_down_exclusive(&old_tip, &ancestor);
        let applied: Vec<HeaderHash> = {
            let mut path = self.path_down_exclusive(&best, &ancestor);
            path.reverse();
            path
        };

        self.tip = best;
        let new_height = self.nodes[&best].height;
        info!(
            old = %hex::encode(old_tip),
            new = %hex::encode(best),
            height = new_height,
            "tip changed"
        );

        events.push(ConsensusEvent::TipChanged {
            old: old_tip,
            new: best,
            height: new_height,
        });
        if !unwound.is_empty() {
            events.push(ConsensusEvent::Reorg { unwound, applied });
        }

        self.advance_finality(&mut events)?;
        Ok(events)
    }

    /// Mark canonical ancestors at depth >= k as Final, oldest-first
    fn advance_finality(&mut self, events: &mut Vec<ConsensusEvent>) -> Result<()> {
        let tip_height = self.nodes[&self.tip].height;
        if tip_height < self.params.finality_depth {
            return Ok(());
        }
        let final_cutoff = tip_height - self.params.finality_depth;

        let mut newly_final = Vec::new();
        let mut cursor = self.tip;
        loop {
            let node = &self.nodes[&cursor];
            if node.height <= final_cutoff && node.state == NodeState::Revealed {
                newly_final.push(cursor);
            }
            if node.height == 0 || node.state == NodeState::Final {
                break;
            }
            cursor = node.parent_hash;
        }

        if newly_final.is_empty() {
            return Ok(());
        }

        newly_final.reverse(); // oldest first
        for hash in &newly_final {
            if let Some(node) = self.nodes.get_mut(hash) {
                node.state = NodeState::Final;
            }
        }
        info!(count = newly_final.len(), "blocks finalized");
        events.push(ConsensusEvent::Finalized {
            hashes: newly_final,
        });
        Ok(())
    }

    /// Walk both nodes up to their common ancestor
    pub fn common_ancestor(&self, a: &HeaderHash, b: &HeaderHash) -> Result<HeaderHash> {
        let mut x = *a;
        let mut y = *b;

        let height =
            |tree: &Self, h: &HeaderHash| -> Result<u64> {
                tree.nodes.get(h).map(|n| n.height).ok_or_else(|| {
                    ConsensusError::Internal("ancestor walk left the tree".to_string())
                })
            };

        while height(self, &x)? > height(self, &y)? {
            x = self.nodes[&x].parent_hash;
        }
        while height(self, &y)? > height(self, &x)? {
            y = self.nodes[&y].parent_hash;
        }
        while x != y {
            x = self.nodes[&x].parent_hash;
            y = self.nodes[&y].parent_hash;
        }
        Ok(x)
    }

    /// Hashes from `from` down to (excluding) `ancestor`, tip-first
    fn path_down_exclusive(&self, from: &HeaderHash, ancestor: &HeaderHash) -> Vec<HeaderHash> {
        let mut path = Vec::new();
        let mut cursor = *from;
        while cursor != *ancestor {
            path.push(cursor);
            cursor = self.nodes[&cursor].parent_hash;
        }
        path
    }

    fn path_contains_final(&self, from: &HeaderHash, ancestor: &HeaderHash) -> bool {
        let mut cursor = *from;
        while cursor != *ancestor {
            let node = &self.nodes[&cursor];
            if node.state == NodeState::Final {
                return true;
            }
            cursor = node.parent_hash;
        }
        false
    }

    /// Remove the subtree hanging off `ancestor` in the direction of
    /// `target`. Returns the number of nodes removed.
    fn prune_branch_toward(&mut self, ancestor: &HeaderHash, target: &HeaderHash) -> Result<usize> {
        // First child of `ancestor` on the path to `target`
        let mut cursor = *target;
        let mut branch_root = cursor;
        while cursor != *ancestor {
            branch_root = cursor;
            cursor = self.nodes[&cursor].parent_hash;
        }

        if let Some(parent) = self.nodes.get_mut(ancestor) {
            parent.children.retain(|c| c != &branch_root);
        }

        let mut removed = 0;
        let mut stack = vec![branch_root];
        while let Some(hash) = stack.pop() {
            if let Some(node) = self.nodes.remove(&hash) {
                self.pending_reveals.remove(&hash);
                stack.extend(node.children);
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ==================== EXPIRY ====================

    /// Expire HEADER_ONLY leaves past the reveal window and orphans whose
    /// parent never arrived. Returns the number of entries dropped.
    pub fn expire(&mut self) -> usize {
        let tip_height = self.nodes[&self.tip].height;
        let window = self.params.reveal_window;
        let mut dropped = 0;

        // Orphans: TTL measured against tip progress since buffering
        self.orphans.retain(|_, waiting| {
            let before = waiting.len();
            waiting.retain(|o| tip_height.saturating_sub(o.buffered_at_height) <= window);
            dropped += before - waiting.len();
            !waiting.is_empty()
        });

        // Unrevealed subtrees strictly below the horizon cannot attach work
        // any more; drop them leaf-first.
        loop {
            let stale: Vec<HeaderHash> = self
                .nodes
                .values()
                .filter(|n| {
                    n.state == NodeState::HeaderOnly
                        && n.children.is_empty()
                        && n.height + window < tip_height
                })
                .map(|n| n.header_hash)
                .collect();
            if stale.is_empty() {
                break;
            }
            for hash in stale {
                if let Some(node) = self.nodes.remove(&hash) {
                    self.pending_reveals.remove(&hash);
                    if let Some(parent) = self.nodes.get_mut(&node.parent_hash) {
                        parent.children.retain(|c| c != &hash);
                    }
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            debug!(dropped, "expired unrevealed entries");
        }
        dropped
    }

    /// Iterate nodes (unordered); storage uses this for persistence
    pub fn nodes(&self) -> impl Iterator<Item = &BlockNode> {
        self.nodes.values()
    }

    /// Ordered canonical headers for a range request, clipped to the tip
    pub fn headers_range(&self, from_height: u64, count: u32) -> Vec<BlockHeader> {
        let tip_height = self.nodes[&self.tip].height;
        if from_height > tip_height || count == 0 {
            return Vec::new();
        }
        let last = (from_height + count as u64 - 1).min(tip_height);

        let mut headers = Vec::new();
        let mut cursor = self.tip;
        loop {
            let node = &self.nodes[&cursor];
            if node.height < from_height {
                break;
            }
            if node.height <= last {
                headers.push(node.header.clone());
            }
            if node.height == 0 {
                break;
            }
            cursor = node.parent_hash;
        }
        headers.reverse();
        headers
    }
}
