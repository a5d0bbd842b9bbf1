/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The two consensus strategies a node can run, and the operations they share.
//!
//! A node chooses one [`Consensus`] strategy at start-up and keeps it for its whole lifetime. The
//! strategy decides three things:
//! 1. How the node [proposes](Consensus::propose_block) a block on top of its tip.
//! 2. How the node [validates](Consensus::validate_consensus_field) the consensus field of blocks
//!    proposed by others.
//! 3. How much a block [weighs](Consensus::block_weight) in fork resolution. The heaviest valid chain
//!    wins.

pub mod pos;

pub mod pow;

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    chain::InvalidBlock,
    state::stake_table::StakeTable,
    types::{
        block::{Block, ConsensusField},
        data_types::{BlockHeight, Difficulty, VerifyingKeyBytes},
        transaction::Transaction,
    },
};

use self::{pos::ProofOfStake, pow::ProofOfWork};

#[derive(Clone)]
pub enum Consensus {
    ProofOfWork(ProofOfWork),
    ProofOfStake(ProofOfStake),
}

impl Consensus {
    /// Build a block on top of `previous` containing `transactions`.
    ///
    /// `stakes` must be the stake table after replaying `previous`. Proof-of-work ignores it.
    pub fn propose_block(
        &self,
        previous: &Block,
        transactions: Vec<Transaction>,
        stakes: &StakeTable,
        cancellation: &CancellationToken,
    ) -> Result<Block, ProposeError> {
        match self {
            Consensus::ProofOfWork(pow) => Ok(pow.mine(previous, transactions, cancellation)?),
            Consensus::ProofOfStake(pos) => pos.forge(previous, transactions, stakes),
        }
    }

    /// Check the consensus field of `block`, which claims to extend `previous`. `stakes` must be the stake
    /// table after replaying `previous`.
    pub fn validate_consensus_field(
        &self,
        block: &Block,
        previous: &Block,
        stakes: &StakeTable,
    ) -> Result<(), ConsensusError> {
        match self {
            Consensus::ProofOfWork(pow) => pow.validate(block, previous),
            Consensus::ProofOfStake(pos) => pos.validate(block, previous, stakes),
        }
    }

    /// How much `block` contributes to the weight of a chain that contains it. The genesis block weighs
    /// nothing.
    pub fn block_weight(&self, block: &Block) -> u128 {
        match &block.consensus {
            ConsensusField::Genesis => 0,
            ConsensusField::ProofOfWork { difficulty, .. } => pow::work(*difficulty),
            ConsensusField::ProofOfStake { stake_snapshot, .. } => pos::weight(stake_snapshot),
        }
    }

    /// Whether Stake transactions can be admitted and committed.
    pub fn supports_stake(&self) -> bool {
        matches!(self, Consensus::ProofOfStake(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Consensus::ProofOfWork(_) => "ProofOfWork",
            Consensus::ProofOfStake(_) => "ProofOfStake",
        }
    }
}

/// A flag shared between a block proposer and the chain manager. Cancelling it tells the proposer that
/// the height it is building at has been filled by some other block.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Returned by a block proposal that was cancelled before it completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusPreempted;

#[derive(Clone, Debug, PartialEq)]
pub enum ProposeError {
    Preempted(ConsensusPreempted),

    /// Proof-of-stake selected another identity to forge at this height.
    NotForger { forger: VerifyingKeyBytes },

    /// This node has already forged a block at this height.
    AlreadyForged { height: BlockHeight },

    /// The block was built, but the chain manager did not accept it, typically because the tip moved in
    /// the meantime.
    Rejected(InvalidBlock),
}

impl From<InvalidBlock> for ProposeError {
    fn from(value: InvalidBlock) -> Self {
        ProposeError::Rejected(value)
    }
}

impl From<ConsensusPreempted> for ProposeError {
    fn from(value: ConsensusPreempted) -> Self {
        ProposeError::Preempted(value)
    }
}

impl Display for ProposeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProposeError::Preempted(_) => write!(f, "proposal preempted"),
            ProposeError::NotForger { .. } => write!(f, "not the selected forger"),
            ProposeError::AlreadyForged { height } => {
                write!(f, "already forged a block at height {}", height)
            }
            ProposeError::Rejected(reason) => write!(f, "proposed block rejected: {}", reason),
        }
    }
}

/// Reasons why the consensus field of a block is invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusError {
    /// The block carries the consensus field of the other strategy, or a genesis field above height 0.
    UnexpectedKind,

    /// The recorded difficulty is below the minimum or above the maximum.
    DifficultyOutOfRange { difficulty: Difficulty },

    /// The recorded difficulty is more than one step away from the one expected at this point.
    UnexpectedDifficulty {
        expected: Difficulty,
        found: Difficulty,
    },

    /// The block hash does not have as many leading zero bits as the recorded difficulty.
    InsufficientWork,

    /// The recorded stake snapshot differs from the stake table at this height.
    InvalidStakeSnapshot,

    /// The block was forged by someone other than the selected forger.
    InvalidForger { expected: VerifyingKeyBytes },

    /// The forger's signature does not verify.
    InvalidSignature,
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::UnexpectedKind => write!(f, "unexpected consensus field"),
            ConsensusError::DifficultyOutOfRange { difficulty } => {
                write!(f, "difficulty {} out of range", difficulty)
            }
            ConsensusError::UnexpectedDifficulty { expected, found } => {
                write!(f, "expected difficulty {}, found {}", expected, found)
            }
            ConsensusError::InsufficientWork => write!(f, "insufficient work"),
            ConsensusError::InvalidStakeSnapshot => write!(f, "invalid stake snapshot"),
            ConsensusError::InvalidForger { .. } => write!(f, "invalid forger"),
            ConsensusError::InvalidSignature => write!(f, "invalid forger signature"),
        }
    }
}
