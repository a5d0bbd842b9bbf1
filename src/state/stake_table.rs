/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The stake table used by proof-of-stake forger selection.

use std::collections::BTreeMap;

use crate::types::data_types::{Stake, TotalStake, VerifyingKeyBytes};

/// Stores the identities of stakers and their stakes.
///
/// ## Ordering of stakers
///
/// `StakeTable` keeps stakers in ascending order of their identity bytes. Forger selection walks
/// stakers in this order, so every node computes the same cumulative stake ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StakeTable {
    stakes: BTreeMap<VerifyingKeyBytes, Stake>,
}

impl StakeTable {
    /// Create an empty stake table.
    pub fn new() -> StakeTable {
        StakeTable {
            stakes: BTreeMap::new(),
        }
    }

    /// Add `amount` to `staker`'s entry, creating it if it does not exist.
    pub fn add(&mut self, staker: VerifyingKeyBytes, amount: Stake) {
        let entry = self.stakes.entry(staker).or_insert(Stake::new(0));
        *entry = *entry + amount;
    }

    /// Get the stake of `staker`, if it has staked anything.
    pub fn stake(&self, staker: &VerifyingKeyBytes) -> Option<Stake> {
        self.stakes.get(staker).copied()
    }

    /// Get the sum of the stakes of every staker.
    pub fn total_stake(&self) -> TotalStake {
        let mut total = TotalStake::new(0);
        for stake in self.stakes.values() {
            total += *stake;
        }
        total
    }

    /// Get an iterator through stakers and their stakes, in ascending order of identity.
    pub fn iter(&self) -> impl Iterator<Item = (&VerifyingKeyBytes, &Stake)> {
        self.stakes.iter()
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    /// The snapshot recorded in proof-of-stake blocks.
    pub fn snapshot(&self) -> BTreeMap<VerifyingKeyBytes, Stake> {
        self.stakes.clone()
    }

    /// Check whether this table equals a snapshot recorded in a block.
    pub fn matches(&self, snapshot: &BTreeMap<VerifyingKeyBytes, Stake>) -> bool {
        &self.stakes == snapshot
    }
}

impl From<BTreeMap<VerifyingKeyBytes, Stake>> for StakeTable {
    fn from(stakes: BTreeMap<VerifyingKeyBytes, Stake>) -> Self {
        StakeTable { stakes }
    }
}
