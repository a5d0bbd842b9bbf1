//! Proof-of-work: blocks are accepted if their hash has enough leading zero bits.
//!
//! ## Difficulty adjustment
//!
//! The difficulty of a block is set relative to its parent: one more than the parent's if the block came
//! sooner than [`ProofOfWork::target_block_interval`] after its parent, one less (but never below
//! [`ProofOfWork::min_difficulty`]) otherwise. Children of genesis start from
//! [`ProofOfWork::initial_difficulty`].
//!
//! Since clocks differ between nodes, a validator accepts a recorded difficulty that is within one step of
//! the one it expects.

use std::time::Duration;

use crate::types::{
    block::{Block, ConsensusField},
    data_types::{Difficulty, Timestamp},
    transaction::Transaction,
};

use super::{CancellationToken, ConsensusError, ConsensusPreempted};

/// No block may have a difficulty greater than this: a SHA-256 hash cannot have more leading zero bits
/// than this and still be found in practice.
pub const MAX_DIFFICULTY: Difficulty = Difficulty::new(128);

/// Number of nonces tried between two checks of the cancellation token.
const NONCES_PER_CANCELLATION_CHECK: u64 = 256;

#[derive(Clone, Debug)]
pub struct ProofOfWork {
    pub initial_difficulty: Difficulty,
    pub min_difficulty: Difficulty,
    pub target_block_interval: Duration,
}

impl ProofOfWork {
    pub fn new(
        initial_difficulty: Difficulty,
        min_difficulty: Difficulty,
        target_block_interval: Duration,
    ) -> ProofOfWork {
        ProofOfWork {
            initial_difficulty,
            min_difficulty,
            target_block_interval,
        }
    }

    /// The difficulty that a block with the given `timestamp`, extending `previous`, should have.
    pub fn expected_difficulty(&self, previous: &Block, timestamp: Timestamp) -> Difficulty {
        let base = previous.difficulty().unwrap_or(self.initial_difficulty);
        let elapsed = timestamp.saturating_duration_since(previous.timestamp);
        let adjusted = if elapsed < self.target_block_interval {
            base.int().saturating_add(1)
        } else {
            base.int().saturating_sub(1)
        };

        Difficulty::new(adjusted.max(self.min_difficulty.int()).min(MAX_DIFFICULTY.int()))
    }

    /// Search for a nonce that makes a block extending `previous` meet the expected difficulty.
    ///
    /// Stops early with [`ConsensusPreempted`] if `cancellation` is cancelled.
    pub fn mine(
        &self,
        previous: &Block,
        transactions: Vec<Transaction>,
        cancellation: &CancellationToken,
    ) -> Result<Block, ConsensusPreempted> {
        let timestamp = Timestamp::now().max(previous.timestamp);
        self.mine_at(previous, transactions, timestamp, cancellation)
    }

    /// Like [`mine`](Self::mine), but for a block stamped with `timestamp` rather than the current time.
    pub fn mine_at(
        &self,
        previous: &Block,
        transactions: Vec<Transaction>,
        timestamp: Timestamp,
        cancellation: &CancellationToken,
    ) -> Result<Block, ConsensusPreempted> {
        let difficulty = self.expected_difficulty(previous, timestamp);
        let height = previous.height + 1;

        for nonce in 0..u64::MAX {
            if nonce % NONCES_PER_CANCELLATION_CHECK == 0 && cancellation.is_cancelled() {
                return Err(ConsensusPreempted);
            }

            let consensus = ConsensusField::ProofOfWork { nonce, difficulty };
            let hash =
                Block::compute_hash(height, timestamp, &previous.hash, &transactions, &consensus);
            if hash.leading_zero_bits() >= difficulty.int() {
                return Ok(Block {
                    height,
                    timestamp,
                    last_hash: previous.hash,
                    hash,
                    data: transactions,
                    consensus,
                });
            }
        }

        Err(ConsensusPreempted)
    }

    /// Check the proof-of-work of `block`. Assumes the block's hash has already been checked against its
    /// contents.
    pub fn validate(&self, block: &Block, previous: &Block) -> Result<(), ConsensusError> {
        let ConsensusField::ProofOfWork { difficulty, .. } = block.consensus else {
            return Err(ConsensusError::UnexpectedKind);
        };

        if difficulty < self.min_difficulty || difficulty > MAX_DIFFICULTY {
            return Err(ConsensusError::DifficultyOutOfRange { difficulty });
        }

        let expected = self.expected_difficulty(previous, block.timestamp);
        if expected.int().abs_diff(difficulty.int()) > 1 {
            return Err(ConsensusError::UnexpectedDifficulty {
                expected,
                found: difficulty,
            });
        }

        if block.hash.leading_zero_bits() < difficulty.int() {
            return Err(ConsensusError::InsufficientWork);
        }

        Ok(())
    }
}

/// The expected number of hashes needed to find a block of the given `difficulty`.
pub fn work(difficulty: Difficulty) -> u128 {
    1u128.checked_shl(difficulty.int()).unwrap_or(u128::MAX)
}

#[test]
fn difficulty_adjusts_by_one_step_test() {
    let pow = ProofOfWork::new(
        Difficulty::new(4),
        Difficulty::new(2),
        Duration::from_secs(10),
    );
    let genesis = Block::genesis();

    // Genesis was created at the Unix epoch, so any real block comes "late".
    assert_eq!(
        pow.expected_difficulty(&genesis, Timestamp::now()),
        Difficulty::new(3)
    );

    let mined = pow
        .mine(&genesis, Vec::new(), &CancellationToken::new())
        .unwrap();
    assert!(pow.validate(&mined, &genesis).is_ok());

    let soon = Timestamp::new(mined.timestamp.millis() + 1);
    assert_eq!(pow.expected_difficulty(&mined, soon), Difficulty::new(4));
    let late = Timestamp::new(mined.timestamp.millis() + 60_000);
    assert_eq!(pow.expected_difficulty(&mined, late), Difficulty::new(2));
}

#[test]
fn cancelled_mining_is_preempted_test() {
    let pow = ProofOfWork::new(
        Difficulty::new(64),
        Difficulty::new(64),
        Duration::from_secs(10),
    );
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    assert_eq!(
        pow.mine(&Block::genesis(), Vec::new(), &cancellation),
        Err(ConsensusPreempted)
    );
}
