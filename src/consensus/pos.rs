/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Stake-weighted proof-of-stake: at every height, one staker is chosen to forge the next block with
//! probability proportional to its stake.
//!
//! ## Forger selection
//!
//! The forger of the block at height `h` extending a block with hash `p` is chosen as follows:
//! 1. `seed = sha256(p || h.to_le_bytes())`.
//! 2. `draw = u128::from_be_bytes(seed[0..16]) % total_stake`.
//! 3. Walk the stake table in ascending order of identity, assigning each staker the range
//!    `[cumulative, cumulative + stake)`. The staker whose range contains `draw` is the forger.
//!
//! Every node that has replayed the same chain has the same stake table, so every node selects the same
//! forger.
//!
//! While the stake table is empty, no one can be selected, so any identity may forge. This lets the first
//! Stake transactions be committed.

use std::collections::BTreeMap;

use crate::{
    state::stake_table::StakeTable,
    types::{
        block::{Block, ConsensusField},
        crypto_primitives::{encode, hash_parts, verify_signature, Keypair},
        data_types::{BlockHeight, CryptoHash, Stake, Timestamp, VerifyingKeyBytes},
        transaction::Transaction,
    },
};

use super::{ConsensusError, ProposeError};

#[derive(Clone)]
pub struct ProofOfStake {
    keypair: Keypair,
}

impl ProofOfStake {
    /// Create a proof-of-stake strategy that forges blocks signed with `keypair`.
    pub fn new(keypair: Keypair) -> ProofOfStake {
        ProofOfStake { keypair }
    }

    pub fn identity(&self) -> VerifyingKeyBytes {
        self.keypair.identity()
    }

    /// Forge a block extending `previous`, if this node is the selected forger. `stakes` must be the stake
    /// table after replaying `previous`.
    pub fn forge(
        &self,
        previous: &Block,
        transactions: Vec<Transaction>,
        stakes: &StakeTable,
    ) -> Result<Block, ProposeError> {
        let height = previous.height + 1;
        let me = self.identity();
        if let Some(forger) = select_forger(&previous.hash, height, stakes) {
            if forger != me {
                return Err(ProposeError::NotForger { forger });
            }
        }

        let timestamp = Timestamp::now().max(previous.timestamp);
        let stake_snapshot = stakes.snapshot();
        let payload = signing_payload(
            height,
            timestamp,
            &previous.hash,
            &transactions,
            &me,
            &stake_snapshot,
        );
        let signature = self.keypair.sign(&payload.bytes());

        Ok(Block::new(
            height,
            timestamp,
            previous.hash,
            transactions,
            ConsensusField::ProofOfStake {
                forger: me,
                signature,
                stake_snapshot,
            },
        ))
    }

    /// Check the proof-of-stake of `block`. `stakes` must be the stake table after replaying `previous`.
    pub fn validate(
        &self,
        block: &Block,
        previous: &Block,
        stakes: &StakeTable,
    ) -> Result<(), ConsensusError> {
        let ConsensusField::ProofOfStake {
            forger,
            signature,
            stake_snapshot,
        } = &block.consensus
        else {
            return Err(ConsensusError::UnexpectedKind);
        };

        if !stakes.matches(stake_snapshot) {
            return Err(ConsensusError::InvalidStakeSnapshot);
        }

        if let Some(expected) = select_forger(&previous.hash, block.height, stakes) {
            if *forger != expected {
                return Err(ConsensusError::InvalidForger { expected });
            }
        }

        let payload = signing_payload(
            block.height,
            block.timestamp,
            &block.last_hash,
            &block.data,
            forger,
            stake_snapshot,
        );
        if !verify_signature(forger, &payload.bytes(), signature) {
            return Err(ConsensusError::InvalidSignature);
        }

        Ok(())
    }
}

/// Select the forger of the block at `height` extending the block with hash `previous_hash`. Returns
/// `None` if nobody has any stake.
pub fn select_forger(
    previous_hash: &CryptoHash,
    height: BlockHeight,
    stakes: &StakeTable,
) -> Option<VerifyingKeyBytes> {
    let total_stake = stakes.total_stake().int();
    if total_stake == 0 {
        return None;
    }

    let seed = hash_parts(&[previous_hash.bytes().to_vec(), height.to_le_bytes().to_vec()]).bytes();
    let mut draw_bytes = [0u8; 16];
    draw_bytes.copy_from_slice(&seed[0..16]);
    let draw = u128::from_be_bytes(draw_bytes) % total_stake;

    let mut cumulative: u128 = 0;
    for (staker, stake) in stakes.iter() {
        cumulative += stake.int() as u128;
        if draw < cumulative {
            return Some(*staker);
        }
    }

    None
}

/// The digest a forger signs. Covers every field of the block except the signature itself.
pub fn signing_payload(
    height: BlockHeight,
    timestamp: Timestamp,
    last_hash: &CryptoHash,
    data: &Vec<Transaction>,
    forger: &VerifyingKeyBytes,
    stake_snapshot: &BTreeMap<VerifyingKeyBytes, Stake>,
) -> CryptoHash {
    hash_parts(&[
        encode(&height),
        encode(&timestamp),
        encode(last_hash),
        encode(data),
        encode(forger),
        encode(stake_snapshot),
    ])
}

/// The weight of a proof-of-stake block: the total stake recorded in it, or 1 while nobody has staked.
pub fn weight(stake_snapshot: &BTreeMap<VerifyingKeyBytes, Stake>) -> u128 {
    StakeTable::from(stake_snapshot.clone())
        .total_stake()
        .int()
        .max(1)
}

/// Tests if the number of times each staker is selected as a forger is roughly proportional to its
/// stake.
#[test]
fn select_forger_fairness_test() {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let mut stakes = StakeTable::new();
    let stakers: Vec<VerifyingKeyBytes> = (1..=4)
        .map(|i| {
            let staker = Keypair::new(SigningKey::generate(&mut csprg)).identity();
            stakes.add(staker, Stake::new(i * 100));
            staker
        })
        .collect();

    let draws = 10_000;
    let mut counts: BTreeMap<VerifyingKeyBytes, u64> = BTreeMap::new();
    let previous_hash = CryptoHash::new([7u8; 32]);
    for height in 1..=draws {
        let forger = select_forger(&previous_hash, BlockHeight::new(height), &stakes).unwrap();
        *counts.entry(forger).or_insert(0) += 1;
    }

    let total_stake = stakes.total_stake().int() as f64;
    for staker in stakers {
        let expected = stakes.stake(&staker).unwrap().int() as f64 / total_stake;
        let observed = *counts.get(&staker).unwrap_or(&0) as f64 / draws as f64;
        assert!((expected - observed).abs() < 0.05);
    }
}

#[test]
fn forged_block_validates_test() {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let pos = ProofOfStake::new(Keypair::new(SigningKey::generate(&mut csprg)));
    let genesis = Block::genesis();
    let mut stakes = StakeTable::new();

    // Bootstrap: nobody has staked, so anyone may forge.
    let block = pos.forge(&genesis, Vec::new(), &stakes).unwrap();
    assert!(pos.validate(&block, &genesis, &stakes).is_ok());

    // A snapshot that disagrees with the local stake table is rejected.
    stakes.add(pos.identity(), Stake::new(250));
    assert_eq!(
        pos.validate(&block, &genesis, &stakes),
        Err(ConsensusError::InvalidStakeSnapshot)
    );
}
