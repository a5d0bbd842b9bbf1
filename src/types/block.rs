/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;

use super::{
    crypto_primitives::{encode, hash_parts},
    data_types::{
        BlockHeight, CryptoHash, Difficulty, SignatureBytes, Stake, Timestamp, TransactionID,
        VerifyingKeyBytes,
    },
    path::Path,
    transaction::{Operation, Transaction},
    value::Value,
};

/// The proof that makes a block acceptable under the active consensus strategy.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusField {
    /// Only carried by the genesis block, which is accepted by equality rather than by proof.
    Genesis,

    ProofOfWork {
        nonce: u64,
        difficulty: Difficulty,
    },

    ProofOfStake {
        forger: VerifyingKeyBytes,
        signature: SignatureBytes,
        /// The stake table in force at this block's height, i.e., after replaying every block before it.
        stake_snapshot: BTreeMap<VerifyingKeyBytes, Stake>,
    },
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub timestamp: Timestamp,
    pub last_hash: CryptoHash,
    pub hash: CryptoHash,
    pub data: Vec<Transaction>,
    pub consensus: ConsensusField,
}

impl Block {
    pub fn new(
        height: BlockHeight,
        timestamp: Timestamp,
        last_hash: CryptoHash,
        data: Vec<Transaction>,
        consensus: ConsensusField,
    ) -> Block {
        Block {
            height,
            timestamp,
            hash: Block::compute_hash(height, timestamp, &last_hash, &data, &consensus),
            last_hash,
            data,
            consensus,
        }
    }

    /// Deterministic content hash over every field of a block other than `hash` itself.
    pub fn compute_hash(
        height: BlockHeight,
        timestamp: Timestamp,
        last_hash: &CryptoHash,
        data: &Vec<Transaction>,
        consensus: &ConsensusField,
    ) -> CryptoHash {
        hash_parts(&[
            encode(&height),
            encode(&timestamp),
            encode(last_hash),
            encode(data),
            encode(consensus),
        ])
    }

    /// Check whether `hash` is what [`compute_hash`](Self::compute_hash) gives for the other fields.
    pub fn is_hash_correct(&self) -> bool {
        self.hash
            == Block::compute_hash(
                self.height,
                self.timestamp,
                &self.last_hash,
                &self.data,
                &self.consensus,
            )
    }

    /// Check that this block directly extends `previous`.
    pub fn check_linkage(&self, previous: &Block) -> Result<(), LinkageError> {
        if self.height != previous.height + 1 {
            return Err(LinkageError::UnexpectedHeight {
                expected: previous.height + 1,
                found: self.height,
            });
        }
        if self.last_hash != previous.hash {
            return Err(LinkageError::LastHashMismatch);
        }
        if self.timestamp < previous.timestamp {
            return Err(LinkageError::TimestampBeforePrevious);
        }
        Ok(())
    }

    /// The fixed first block of every chain.
    ///
    /// Its only transaction seeds the [rule tree](crate::state::rules) so that the `restricted` subtree
    /// cannot be written to.
    pub fn genesis() -> Block {
        let rules: Value = [(
            "restricted",
            [(".write", Value::Boolean(false))].into_iter().collect::<Value>(),
        )]
        .into_iter()
        .collect();
        let seed_rules = Transaction {
            id: TransactionID::new([0u8; 32]),
            timestamp: Timestamp::new(0),
            operation: Operation::Set {
                reference: Path::from_segments(["rules"]).unwrap_or_default(),
                value: rules,
            },
            signer: VerifyingKeyBytes::zero(),
            signature: SignatureBytes::zero(),
        };

        Block::new(
            BlockHeight::new(0),
            Timestamp::new(0),
            CryptoHash::zero(),
            vec![seed_rules],
            ConsensusField::Genesis,
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.height == BlockHeight::new(0)
    }

    /// The difficulty recorded in a proof-of-work block.
    pub fn difficulty(&self) -> Option<Difficulty> {
        match self.consensus {
            ConsensusField::ProofOfWork { difficulty, .. } => Some(difficulty),
            _ => None,
        }
    }
}

/// Reasons why a block does not directly extend its supposed predecessor.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkageError {
    UnexpectedHeight {
        expected: BlockHeight,
        found: BlockHeight,
    },
    LastHashMismatch,
    TimestampBeforePrevious,
}

#[test]
fn genesis_is_deterministic_test() {
    let genesis = Block::genesis();
    assert_eq!(genesis, Block::genesis());
    assert!(genesis.is_hash_correct());
    assert!(genesis.is_genesis());
    assert_eq!(genesis.data.len(), 1);
}
