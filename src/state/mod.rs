//! The materialized state of a node: the state database, the rule tree stored inside it, and the stake
//! table.
//!
//! A [`WorldState`] only ever changes by replaying blocks. Replaying the same chain from genesis on any
//! node produces an identical `WorldState`, byte for byte.

pub mod database;

pub mod rules;

pub mod stake_table;

use crate::types::{
    block::Block,
    data_types::{Stake, VerifyingKeyBytes},
    path::Path,
    transaction::{Operation, Transaction},
    value::Value,
};

use self::{
    database::{IncreaseError, StateDatabase},
    rules::{RulePolicy, RuleTree},
    stake_table::StakeTable,
};

/// The deterministic fold of every transaction in a chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldState {
    database: StateDatabase,
    stakes: StakeTable,
}

impl WorldState {
    /// An empty state, before the genesis block is applied.
    pub fn new() -> WorldState {
        WorldState {
            database: StateDatabase::new(),
            stakes: StakeTable::new(),
        }
    }

    /// Build a fresh state by applying every block of `chain` in order.
    pub fn replay(chain: &[Block]) -> WorldState {
        let mut state = WorldState::new();
        for block in chain {
            state.apply_block(block);
        }
        state
    }

    /// Apply every transaction in `block`, in order.
    pub fn apply_block(&mut self, block: &Block) {
        for transaction in &block.data {
            if let TransactionOutcome::Increase(outcomes) = self.apply_transaction(transaction) {
                for (path, outcome) in outcomes {
                    if let Err(err) = outcome {
                        log::debug!(
                            "Increase of {} in block {} had no effect: {:?}",
                            path,
                            block.height,
                            err
                        );
                    }
                }
            }
        }
    }

    /// Apply a single transaction.
    ///
    /// Rules are not consulted here: a transaction in a block is part of history, and was authorized
    /// (or not) when it was admitted.
    pub fn apply_transaction(&mut self, transaction: &Transaction) -> TransactionOutcome {
        match &transaction.operation {
            Operation::Set { reference, value } => {
                self.database.set(reference, value.clone());
                TransactionOutcome::Set
            }
            Operation::Increase { diff } => TransactionOutcome::Increase(
                diff.iter()
                    .map(|(path, delta)| (path.clone(), self.database.increase(path, *delta)))
                    .collect(),
            ),
            Operation::Stake { amount } => {
                self.stakes.add(transaction.signer, Stake::new(*amount));
                TransactionOutcome::Stake {
                    staker: transaction.signer,
                    stake: self.stakes.stake(&transaction.signer).unwrap_or(Stake::new(0)),
                }
            }
        }
    }

    /// Get a copy of the subtree at `path`.
    pub fn read(&self, path: &Path) -> Option<Value> {
        self.database.read(path)
    }

    pub fn database(&self) -> &StateDatabase {
        &self.database
    }

    pub fn stakes(&self) -> &StakeTable {
        &self.stakes
    }

    /// Get a view of the rule tree currently stored in the state database.
    pub fn rule_tree<'a>(&'a self, policy: &'a RulePolicy) -> RuleTree<'a> {
        RuleTree::new(&self.database, policy)
    }
}

/// What applying a transaction did.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactionOutcome {
    Set,

    /// The outcome of each path of an Increase. Failed paths leave the database unchanged at that path,
    /// while the others still apply.
    Increase(Vec<(Path, Result<f64, IncreaseError>)>),

    /// The staker's stake after the transaction.
    Stake {
        staker: VerifyingKeyBytes,
        stake: Stake,
    },
}
