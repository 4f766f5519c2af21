//! Commit-reveal binding for the anti-grinding protocol.
//!
//! A miner commits to (parent, salt, problem, solution) before revealing.
//! Binding to H(solution) prevents post-hoc solution swaps; HMAC with the
//! epoch salt ties the commitment to a specific epoch and network.

use crate::codec::{problem_hash, solution_hash};
use crate::errors::{ConsensusError, Result};
use crate::hash::{hmac_sha256, hmac_sha256_verify};
use crate::types::{BlockHeader, Reveal};

/// Domain-separation key for epoch salt derivation
pub const EPOCH_SALT_KEY: &[u8] = b"coinjecture-epoch-v1";

/// Epoch number of a block height
pub fn epoch_number(block_index: u64, epoch_length: u64) -> u64 {
    block_index / epoch_length.max(1)
}

/// Deterministic 32-byte salt shared by every block of an epoch:
/// HMAC-SHA-256(key = "coinjecture-epoch-v1", msg = epoch_be || network_id)
pub fn epoch_salt(epoch: u64, network_id: &str) -> Result<[u8; 32]> {
    hmac_sha256(
        EPOCH_SALT_KEY,
        &[&epoch.to_be_bytes(), network_id.as_bytes()],
    )
}

/// Commitment = HMAC-SHA-256(key = epoch_salt,
///     msg = parent_hash || miner_salt || problem_hash || solution_hash)
pub fn make_commitment(
    epoch_salt: &[u8; 32],
    parent_hash: &[u8; 32],
    miner_salt: &[u8; 32],
    problem_hash: &[u8; 32],
    solution_hash: &[u8; 32],
) -> Result<[u8; 32]> {
    hmac_sha256(
        epoch_salt,
        &[parent_hash, miner_salt, problem_hash, solution_hash],
    )
}

/// Recompute the commitment for a reveal and compare against the header's
/// in constant time. Any differing bound field rejects.
pub fn verify_reveal(
    header: &BlockHeader,
    reveal: &Reveal,
    network_id: &str,
    epoch_length: u64,
) -> Result<()> {
    let salt = epoch_salt(epoch_number(header.block_index, epoch_length), network_id)?;
    let p_hash = problem_hash(&reveal.problem)?;
    let s_hash = solution_hash(&reveal.solution)?;

    let matches = hmac_sha256_verify(
        &salt,
        &[
            &header.parent_hash,
            &reveal.miner_salt,
            &p_hash,
            &s_hash,
        ],
        &header.commitment,
    )?;

    if !matches {
        return Err(ConsensusError::CommitmentMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    const NETWORK: &str = "coinjecture-test";
    const EPOCH_LEN: u64 = 128;

    fn make_reveal() -> Reveal {
        Reveal {
            problem: Problem::SubsetSum {
                elements: vec![3, 6, 7, 9, 12, 14, 20, 21],
                target: 30,
            },
            solution: Solution::SubsetSum {
                indices: vec![1, 3, 5],
            },
            miner_salt: [42u8; 32],
            measured: ComplexityRecord {
                solve_time_ms: 55,
                memory: MemoryClass::Low,
                attempts: 1,
            },
        }
    }

    fn committed_header(reveal: &Reveal, block_index: u64, parent_hash: [u8; 32]) -> BlockHeader {
        let salt = epoch_salt(epoch_number(block_index, EPOCH_LEN), NETWORK).unwrap();
        let commitment = make_commitment(
            &salt,
            &parent_hash,
            &reveal.miner_salt,
            &problem_hash(&reveal.problem).unwrap(),
            &solution_hash(&reveal.solution).unwrap(),
        )
        .unwrap();

        BlockHeader {
            block_index,
            parent_hash,
            commitment,
            ..Default::default()
        }
    }

    #[test]
    fn test_epoch_salt_deterministic() {
        let a = epoch_salt(3, NETWORK).unwrap();
        let b = epoch_salt(3, NETWORK).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_epoch_salt_separates_epochs_and_networks() {
        let a = epoch_salt(3, NETWORK).unwrap();
        assert_ne!(a, epoch_salt(4, NETWORK).unwrap());
        assert_ne!(a, epoch_salt(3, "coinjecture-other").unwrap());
    }

    #[test]
    fn test_epoch_number_boundaries() {
        assert_eq!(epoch_number(0, 128), 0);
        assert_eq!(epoch_number(127, 128), 0);
        assert_eq!(epoch_number(128, 128), 1);
    }

    #[test]
    fn test_verify_reveal_success() {
        let reveal = make_reveal();
        let header = committed_header(&reveal, 10, [1u8; 32]);
        assert!(verify_reveal(&header, &reveal, NETWORK, EPOCH_LEN).is_ok());
    }

    #[test]
    fn test_verify_reveal_wrong_solution_fails() {
        let reveal = make_reveal();
        let header = committed_header(&reveal, 10, [1u8; 32]);

        let mut wrong = reveal.clone();
        wrong.solution = Solution::SubsetSum {
            indices: vec![0, 2],
        };
        assert_eq!(
            verify_reveal(&header, &wrong, NETWORK, EPOCH_LEN),
            Err(ConsensusError::CommitmentMismatch)
        );
    }

    #[test]
    fn test_verify_reveal_wrong_problem_fails() {
        let reveal = make_reveal();
        let header = committed_header(&reveal, 10, [1u8; 32]);

        let mut wrong = reveal.clone();
        wrong.problem = Problem::SubsetSum {
            elements: vec![3, 6, 7, 9, 12, 14, 20, 22],
            target: 30,
        };
        assert!(verify_reveal(&header, &wrong, NETWORK, EPOCH_LEN).is_err());
    }

    #[test]
    fn test_verify_reveal_wrong_salt_fails() {
        let reveal = make_reveal();
        let header = committed_header(&reveal, 10, [1u8; 32]);

        let mut wrong = reveal.clone();
        wrong.miner_salt = [43u8; 32];
        assert!(verify_reveal(&header, &wrong, NETWORK, EPOCH_LEN).is_err());
    }

    #[test]
    fn test_verify_reveal_wrong_parent_fails() {
        let reveal = make_reveal();
        let mut header = committed_header(&reveal, 10, [1u8; 32]);
        header.parent_hash = [2u8; 32];
        assert!(verify_reveal(&header, &reveal, NETWORK, EPOCH_LEN).is_err());
    }

    #[test]
    fn test_commitment_changes_across_epoch_boundary() {
        // Same reveal, same parent, but height crosses into the next epoch:
        // the recomputed commitment must differ, so the old one rejects.
        let reveal = make_reveal();
        let header = committed_header(&reveal, 127, [1u8; 32]);

        let mut moved = header.clone();
        moved.block_index = 128;
        assert!(verify_reveal(&moved, &reveal, NETWORK, EPOCH_LEN).is_err());
    }
}
