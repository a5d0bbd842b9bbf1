/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pool of admitted transactions that have not been committed yet.
//!
//! ## Admission
//!
//! A transaction enters the mempool only through [`Mempool::admit`], which checks, in order:
//! 1. That the transaction's id is not already pending or committed.
//! 2. That the transaction is [structurally valid](Transaction::validate).
//! 3. That, if it is a Stake transaction, the node runs proof-of-stake.
//! 4. That the [rule tree](crate::state::rules) allows a write to every path the transaction touches,
//!    including, for a Set, everything below the path it replaces.
//!
//! ## Ordering
//!
//! Pending transactions are kept, and [drained](Mempool::drain) into blocks, in admission order.
//! Draining does not remove transactions: they leave the mempool only when a block containing them is
//! appended to the chain ([`Mempool::reconcile`]).

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt::{self, Display, Formatter},
};

use crate::{
    state::{
        rules::{Authorization, RulePolicy},
        WorldState,
    },
    types::{
        block::Block,
        data_types::TransactionID,
        path::Path,
        transaction::{MalformedTransaction, Operation, Transaction},
    },
};

#[derive(Clone, Debug, Default)]
pub struct Mempool {
    order: VecDeque<TransactionID>,
    pending: HashMap<TransactionID, Transaction>,
    committed: HashSet<TransactionID>,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool {
            order: VecDeque::new(),
            pending: HashMap::new(),
            committed: HashSet::new(),
        }
    }

    /// Create a mempool for a node whose chain is `chain`. Every transaction in `chain` counts as
    /// committed.
    pub fn for_chain(chain: &[Block]) -> Mempool {
        let mut mempool = Mempool::new();
        for block in chain {
            mempool.reconcile(block);
        }
        mempool
    }

    /// Check `transaction` and, if it passes every check, add it to the back of the mempool.
    pub fn admit(
        &mut self,
        transaction: Transaction,
        state: &WorldState,
        policy: &RulePolicy,
        stake_allowed: bool,
    ) -> Result<(), Rejected> {
        if self.contains(&transaction.id) || self.is_committed(&transaction.id) {
            return Err(Rejected::Duplicate);
        }

        transaction.validate()?;

        if transaction.operation.is_stake() && !stake_allowed {
            return Err(Rejected::Unsupported);
        }

        Self::authorize(&transaction, state, policy)?;

        self.order.push_back(transaction.id);
        self.pending.insert(transaction.id, transaction);
        Ok(())
    }

    /// Get up to `max_count` pending transactions in admission order, without removing them.
    pub fn drain(&self, max_count: usize) -> Vec<Transaction> {
        self.order
            .iter()
            .filter_map(|id| self.pending.get(id))
            .take(max_count)
            .cloned()
            .collect()
    }

    /// Remove every transaction in `block` from the pending set and remember their ids as committed.
    pub fn reconcile(&mut self, block: &Block) {
        for transaction in &block.data {
            self.pending.remove(&transaction.id);
            self.committed.insert(transaction.id);
        }
        let pending = &self.pending;
        self.order.retain(|id| pending.contains_key(id));
    }

    /// Rebuild the committed set from `chain` after the chain has been replaced, dropping any pending
    /// transaction that the new chain commits, and add back `orphaned` transactions that the new chain
    /// does not contain. `state` must be the state after replaying `chain`.
    ///
    /// Orphaned transactions are put in front of the transactions that were already pending, in the order
    /// given, since they were admitted before them.
    pub fn reset(
        &mut self,
        chain: &[Block],
        orphaned: Vec<Transaction>,
        state: &WorldState,
        policy: &RulePolicy,
    ) {
        self.committed.clear();
        for block in chain {
            for transaction in &block.data {
                self.committed.insert(transaction.id);
            }
        }

        let committed = &self.committed;
        self.pending.retain(|id, _| !committed.contains(id));
        self.order.retain(|id| !committed.contains(id));

        self.reinstate(orphaned, state, policy);
    }

    /// Put transactions from blocks that were orphaned by a chain replacement back in front of the
    /// mempool. Transactions that are committed or already pending are skipped.
    ///
    /// Orphaned blocks may have come from peers, whose transactions never passed this node's admission
    /// checks. Each one is authorized against `state` like a new transaction, and dropped if denied.
    pub fn reinstate(&mut self, orphaned: Vec<Transaction>, state: &WorldState, policy: &RulePolicy) {
        for transaction in orphaned.into_iter().rev() {
            if self.is_committed(&transaction.id) || self.contains(&transaction.id) {
                continue;
            }
            if let Err(reason) = Self::authorize(&transaction, state, policy) {
                log::debug!(
                    "Dropping orphaned transaction {:?}: {}",
                    transaction.id,
                    reason
                );
                continue;
            }
            self.order.push_front(transaction.id);
            self.pending.insert(transaction.id, transaction);
        }
    }

    /// Check that the rule tree in `state` allows a write to every path `transaction` touches.
    fn authorize(
        transaction: &Transaction,
        state: &WorldState,
        policy: &RulePolicy,
    ) -> Result<(), Rejected> {
        let rules = state.rule_tree(policy);
        let replaces_subtree = matches!(transaction.operation, Operation::Set { .. });
        for path in transaction.operation.written_paths() {
            let authorization = if replaces_subtree {
                rules.check_subtree_authorization(path)
            } else {
                rules.check_authorization(path)
            };
            if authorization == Authorization::Deny {
                return Err(Rejected::Unauthorized { path: path.clone() });
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: &TransactionID) -> bool {
        self.pending.contains_key(id)
    }

    pub fn is_committed(&self, id: &TransactionID) -> bool {
        self.committed.contains(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Reasons why a transaction was not admitted into the mempool.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejected {
    Malformed(MalformedTransaction),

    /// The rule tree denies writes to `path`.
    Unauthorized { path: Path },

    /// A transaction with the same id is already pending or committed.
    Duplicate,

    /// The operation is not available under the node's consensus strategy.
    Unsupported,
}

/// How a transport should report a [`Rejected`] transaction to its client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionClass {
    Forbidden,
    BadRequest,
}

impl Rejected {
    pub fn class(&self) -> RejectionClass {
        match self {
            Rejected::Unauthorized { .. } => RejectionClass::Forbidden,
            _ => RejectionClass::BadRequest,
        }
    }
}

impl From<MalformedTransaction> for Rejected {
    fn from(value: MalformedTransaction) -> Self {
        Rejected::Malformed(value)
    }
}

impl Display for Rejected {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::Malformed(reason) => write!(f, "malformed transaction: {}", reason),
            Rejected::Unauthorized { path } => write!(f, "not authorized to write to {}", path),
            Rejected::Duplicate => write!(f, "duplicate transaction"),
            Rejected::Unsupported => write!(f, "operation not supported by this node"),
        }
    }
}
