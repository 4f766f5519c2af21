//! redb-backed chain store.
//!
//! Column families follow the consensus storage contract: `headers`,
//! `reveals`, `tree`, `tips`, `finality`, `replay`, `epoch_meta`. Every
//! mutation belonging to one state transition lands in a single write
//! transaction; recovery replays the accepted headers and reveals in
//! height order.

use coinjecture_core::codec;
use coinjecture_core::types::{BlockHeader, HardwareTier, Reveal};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

const HEADERS_TABLE: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("headers");
const REVEALS_TABLE: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("reveals");
const TREE_TABLE: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("tree");
const TIPS_TABLE: TableDefinition<&str, &[u8; 32]> = TableDefinition::new("tips");
const FINALITY_TABLE: TableDefinition<u64, &[u8; 32]> = TableDefinition::new("finality");
const REPLAY_TABLE: TableDefinition<&[u8; 32], u64> = TableDefinition::new("replay");
const EPOCH_META_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("epoch_meta");

const TIP_KEY: &str = "tip";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::Error),
    #[error("Database creation error: {0}")]
    DatabaseCreation(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Codec error: {0}")]
    Codec(#[from] coinjecture_core::ConsensusError),
    #[error("Corrupt tree entry for {0}")]
    CorruptTreeEntry(String),
}

/// Fixed-width tree column record; floats stored as big-endian bit patterns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeEntry {
    pub parent_hash: [u8; 32],
    pub cumulative_work: f64,
    pub height: u64,
    pub state: u8,
    pub work_score: f64,
}

const TREE_ENTRY_LEN: usize = 32 + 8 + 8 + 1 + 8;

impl TreeEntry {
    pub fn encode(&self) -> [u8; TREE_ENTRY_LEN] {
        let mut out = [0u8; TREE_ENTRY_LEN];
        out[0..32].copy_from_slice(&self.parent_hash);
        out[32..40].copy_from_slice(&self.cumulative_work.to_bits().to_be_bytes());
        out[40..48].copy_from_slice(&self.height.to_be_bytes());
        out[48] = self.state;
        out[49..57].copy_from_slice(&self.work_score.to_bits().to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != TREE_ENTRY_LEN {
            return None;
        }
        let mut parent_hash = [0u8; 32];
        parent_hash.copy_from_slice(&bytes[0..32]);
        let cumulative_work =
            f64::from_bits(u64::from_be_bytes(bytes[32..40].try_into().ok()?));
        let height = u64::from_be_bytes(bytes[40..48].try_into().ok()?);
        let state = bytes[48];
        let work_score = f64::from_bits(u64::from_be_bytes(bytes[49..57].try_into().ok()?));
        Some(Self {
            parent_hash,
            cumulative_work,
            height,
            state,
            work_score,
        })
    }
}

/// Per-epoch metadata persisted at rollover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpochMeta {
    #[serde(with = "salt_bytes")]
    pub salt: [u8; 32],
    /// (tier discriminant, difficulty target) per tier
    pub difficulty_targets: Vec<(u8, u64)>,
}

mod salt_bytes {
    use serde::de::{Error as DeError, SeqAccess, Visitor};
    use serde::{Deserializer, Serialize, Serializer};
    use std::fmt;

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            hex::encode(bytes).serialize(serializer)
        } else {
            serializer.collect_seq(bytes.iter())
        }
    }

    struct SaltVisitor;

    impl<'de> Visitor<'de> for SaltVisitor {
        type Value = [u8; 32];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a 32-byte salt")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut arr = [0u8; 32];
            for (i, slot) in arr.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| DeError::invalid_length(i, &self))?;
            }
            Ok(arr)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(SaltVisitor)
    }
}

/// One consensus state transition, applied atomically
#[derive(Debug, Clone, Default)]
pub struct StateTransition {
    pub header: Option<([u8; 32], Vec<u8>)>,
    pub reveal: Option<([u8; 32], Vec<u8>)>,
    pub tree_entries: Vec<([u8; 32], TreeEntry)>,
    pub tip: Option<[u8; 32]>,
    pub finalized: Vec<(u64, [u8; 32])>,
    pub replay: Option<([u8; 32], u64)>,
    pub epoch_meta: Option<(u64, EpochMeta)>,
}

pub struct ChainStore {
    db: Database,
}

impl ChainStore {
    /// Create or open the chain database; tables are created up front
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path)?;

        let init = db.begin_write()?;
        {
            let _ = init.open_table(HEADERS_TABLE)?;
            let _ = init.open_table(REVEALS_TABLE)?;
            let _ = init.open_table(TREE_TABLE)?;
            let _ = init.open_table(TIPS_TABLE)?;
            let _ = init.open_table(FINALITY_TABLE)?;
            let _ = init.open_table(REPLAY_TABLE)?;
            let _ = init.open_table(EPOCH_META_TABLE)?;
        }
        init.commit()?;

        Ok(Self { db })
    }

    /// Apply a whole state transition in one write transaction
    pub fn apply(&self, transition: &StateTransition) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            if let Some((hash, bytes)) = &transition.header {
                let mut table = txn.open_table(HEADERS_TABLE)?;
                table.insert(hash, bytes.as_slice())?;
            }
            if let Some((hash, bytes)) = &transition.reveal {
                let mut table = txn.open_table(REVEALS_TABLE)?;
                table.insert(hash, bytes.as_slice())?;
            }
            if !transition.tree_entries.is_empty() {
                let mut table = txn.open_table(TREE_TABLE)?;
                for (hash, entry) in &transition.tree_entries {
                    table.insert(hash, entry.encode().as_slice())?;
                }
            }
            if let Some(tip) = &transition.tip {
                let mut table = txn.open_table(TIPS_TABLE)?;
                table.insert(TIP_KEY, tip)?;
            }
            if !transition.finalized.is_empty() {
                let mut table = txn.open_table(FINALITY_TABLE)?;
                for (height, hash) in &transition.finalized {
                    table.insert(height, hash)?;
                }
            }
            if let Some((commitment, epoch)) = &transition.replay {
                let mut table = txn.open_table(REPLAY_TABLE)?;
                table.insert(commitment, epoch)?;
            }
            if let Some((epoch, meta)) = &transition.epoch_meta {
                let mut table = txn.open_table(EPOCH_META_TABLE)?;
                let bytes = codec::encode(meta)?;
                table.insert(epoch, bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    // ==================== READS ====================

    pub fn header(&self, hash: &[u8; 32]) -> Result<Option<BlockHeader>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(HEADERS_TABLE)?;
        match table.get(hash)? {
            Some(bytes) => Ok(Some(codec::decode_strict(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn reveal(&self, hash: &[u8; 32]) -> Result<Option<Reveal>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REVEALS_TABLE)?;
        match table.get(hash)? {
            Some(bytes) => Ok(Some(codec::decode_strict(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn tree_entry(&self, hash: &[u8; 32]) -> Result<Option<TreeEntry>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TREE_TABLE)?;
        match table.get(hash)? {
            Some(bytes) => TreeEntry::decode(bytes.value())
                .map(Some)
                .ok_or_else(|| StoreError::CorruptTreeEntry(hex::encode(hash))),
            None => Ok(None),
        }
    }

    pub fn tip(&self) -> Result<Option<[u8; 32]>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TIPS_TABLE)?;
        Ok(table.get(TIP_KEY)?.map(|v| *v.value()))
    }

    pub fn finalized_at(&self, height: u64) -> Result<Option<[u8; 32]>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FINALITY_TABLE)?;
        Ok(table.get(height)?.map(|v| *v.value()))
    }

    pub fn replay_epoch(&self, commitment: &[u8; 32]) -> Result<Option<u64>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REPLAY_TABLE)?;
        Ok(table.get(commitment)?.map(|v| v.value()))
    }

    pub fn epoch_meta(&self, epoch: u64) -> Result<Option<EpochMeta>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EPOCH_META_TABLE)?;
        match table.get(epoch)? {
            Some(bytes) => Ok(Some(codec::decode_strict(bytes.value())?)),
            None => Ok(None),
        }
    }

    // ==================== RECOVERY ====================

    /// The consensus log: accepted (header, reveal?) pairs in height order.
    /// Feeding these back through a fresh engine reproduces the tree.
    pub fn load_chain(&self) -> Result<Vec<(BlockHeader, Option<Reveal>)>, StoreError> {
        let txn = self.db.begin_read()?;
        let headers = txn.open_table(HEADERS_TABLE)?;
        let reveals = txn.open_table(REVEALS_TABLE)?;

        let mut entries: Vec<(u64, BlockHeader, Option<Reveal>)> = Vec::new();
        for item in headers.iter()? {
            let (key, value) = item?;
            let header: BlockHeader = codec::decode_strict(value.value())?;
            let reveal = match reveals.get(key.value())? {
                Some(bytes) => Some(codec::decode_strict(bytes.value())?),
                None => None,
            };
            entries.push((header.block_index, header, reveal));
        }

        entries.sort_by_key(|(height, header, _)| (*height, header.timestamp));
        info!(blocks = entries.len(), "loaded consensus log");
        Ok(entries
            .into_iter()
            .map(|(_, header, reveal)| (header, reveal))
            .collect())
    }

    /// Helper for persisting an epoch rollover snapshot
    pub fn epoch_meta_record(
        salt: [u8; 32],
        targets: &[(HardwareTier, u64)],
    ) -> EpochMeta {
        EpochMeta {
            salt,
            difficulty_targets: targets.iter().map(|(t, v)| (*t as u8, *v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinjecture_core::types::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> (TempDir, ChainStore) {
        let dir = TempDir::new().unwrap();
        let store = ChainStore::open(dir.path().join("chain.redb")).unwrap();
        (dir, store)
    }

    fn sample_header(index: u64) -> BlockHeader {
        BlockHeader {
            block_index: index,
            timestamp: 1_700_000_000 + index as i64,
            tier: HardwareTier::Desktop,
            difficulty_target: 20,
            ..Default::default()
        }
    }

    fn sample_reveal() -> Reveal {
        Reveal {
            problem: Problem::SubsetSum {
                elements: vec![1; 20],
                target: 5,
            },
            solution: Solution::SubsetSum {
                indices: vec![0, 1, 2, 3, 4],
            },
            miner_salt: [7u8; 32],
            measured: ComplexityRecord {
                solve_time_ms: 42,
                memory: MemoryClass::Low,
                attempts: 1,
            },
        }
    }

    #[test]
    fn test_tree_entry_roundtrip() {
        let entry = TreeEntry {
            parent_hash: [5u8; 32],
            cumulative_work: 1234.5,
            height: 42,
            state: 1,
            work_score: 99.25,
        };
        let decoded = TreeEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
        // Bit-exact floats
        assert_eq!(
            decoded.cumulative_work.to_bits(),
            entry.cumulative_work.to_bits()
        );
    }

    #[test]
    fn test_tree_entry_rejects_wrong_length() {
        assert!(TreeEntry::decode(&[0u8; 10]).is_none());
        assert!(TreeEntry::decode(&[0u8; TREE_ENTRY_LEN + 1]).is_none());
    }

    #[test]
    fn test_atomic_transition_roundtrip() {
        let (_dir, store) = store();
        let header = sample_header(1);
        let reveal = sample_reveal();
        let hash = [1u8; 32];

        let transition = StateTransition {
            header: Some((hash, codec::encode(&header).unwrap())),
            reveal: Some((hash, codec::encode(&reveal).unwrap())),
            tree_entries: vec![(
                hash,
                TreeEntry {
                    parent_hash: [0u8; 32],
                    cumulative_work: 10.0,
                    height: 1,
                    state: 1,
                    work_score: 10.0,
                },
            )],
            tip: Some(hash),
            finalized: vec![],
            replay: Some(([9u8; 32], 0)),
            epoch_meta: None,
        };
        store.apply(&transition).unwrap();

        assert_eq!(store.header(&hash).unwrap().unwrap(), header);
        assert_eq!(store.reveal(&hash).unwrap().unwrap(), reveal);
        assert_eq!(store.tip().unwrap(), Some(hash));
        assert_eq!(store.replay_epoch(&[9u8; 32]).unwrap(), Some(0));
        assert_eq!(store.tree_entry(&hash).unwrap().unwrap().height, 1);
    }

    #[test]
    fn test_finality_column() {
        let (_dir, store) = store();
        let transition = StateTransition {
            finalized: vec![(3, [3u8; 32]), (4, [4u8; 32])],
            ..Default::default()
        };
        store.apply(&transition).unwrap();

        assert_eq!(store.finalized_at(3).unwrap(), Some([3u8; 32]));
        assert_eq!(store.finalized_at(4).unwrap(), Some([4u8; 32]));
        assert_eq!(store.finalized_at(5).unwrap(), None);
    }

    #[test]
    fn test_epoch_meta_roundtrip() {
        let (_dir, store) = store();
        let meta = ChainStore::epoch_meta_record(
            [8u8; 32],
            &[(HardwareTier::Mobile, 12), (HardwareTier::Desktop, 20)],
        );
        let transition = StateTransition {
            epoch_meta: Some((2, meta.clone())),
            ..Default::default()
        };
        store.apply(&transition).unwrap();
        assert_eq!(store.epoch_meta(2).unwrap(), Some(meta));
        assert_eq!(store.epoch_meta(3).unwrap(), None);
    }

    #[test]
    fn test_load_chain_height_ordered() {
        let (_dir, store) = store();
        for (i, hash_byte) in [(3u64, 3u8), (1, 1), (2, 2)] {
            let header = sample_header(i);
            store
                .apply(&StateTransition {
                    header: Some(([hash_byte; 32], codec::encode(&header).unwrap())),
                    ..Default::default()
                })
                .unwrap();
        }

        let chain = store.load_chain().unwrap();
        let heights: Vec<u64> = chain.iter().map(|(h, _)| h.block_index).collect();
        assert_eq!(heights, vec![1, 2, 3]);
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.redb");
        {
            let store = ChainStore::open(&path).unwrap();
            store
                .apply(&StateTransition {
                    tip: Some([6u8; 32]),
                    ..Default::default()
                })
                .unwrap();
        }
        let store = ChainStore::open(&path).unwrap();
        assert_eq!(store.tip().unwrap(), Some([6u8; 32]));
    }
}
