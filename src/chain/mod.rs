/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The local chain of blocks and everything derived from it.
//!
//! # The Ledger
//!
//! A node's chain, its [world state](crate::state::WorldState), its [mempool](crate::mempool::Mempool),
//! and the registration of the block proposal it is currently working on change together, so they are
//! kept together in one `Ledger` behind one lock. The [`ChainManager`] is a cheaply clonable handle to
//! this ledger that is shared between the node's threads.
//!
//! The lock is held only to read or swap the ledger's contents. Validating a block or a candidate chain,
//! replaying a candidate chain, and mining all happen outside of it.
//!
//! # Changing the chain
//!
//! The chain changes in exactly two ways:
//! 1. [`ChainManager::try_append`]: a block extending the tip is validated and appended. The world
//!    state is updated incrementally, which gives the same result as replaying the whole chain.
//! 2. [`ChainManager::try_replace`]: a competing chain is validated from genesis, and replaces the local
//!    chain if and only if it is strictly heavier. Ties keep the chain that was seen first.
//!
//! In both cases, a block proposal that the node had in progress at an affected height is
//! [preempted](crate::consensus::CancellationToken).

pub mod pluggables;

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    sync::{mpsc::Sender, Arc, Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use crate::{
    consensus::{CancellationToken, Consensus, ConsensusError},
    events::{
        AdmitTransactionEvent, Event, InsertBlockEvent, PreemptProposalEvent, RejectBlockEvent,
        RejectChainEvent, RejectTransactionEvent, ReplaceChainEvent,
    },
    mempool::{Mempool, Rejected},
    state::{rules::RulePolicy, stake_table::StakeTable, WorldState},
    types::{
        block::{Block, LinkageError},
        data_types::{BlockHeight, ChainWeight, CryptoHash, TransactionID},
        path::Path,
        transaction::{MalformedTransaction, Transaction},
        value::Value,
    },
};

use self::pluggables::BlockStore;

#[derive(Clone)]
pub struct ChainManager<S: BlockStore> {
    ledger: Arc<Mutex<Ledger<S>>>,
    consensus: Consensus,
    policy: RulePolicy,
    event_publisher: Option<Sender<Event>>,
}

struct Ledger<S: BlockStore> {
    /// Never empty: the first block is always the genesis block.
    chain: Vec<Block>,
    state: WorldState,
    weight: ChainWeight,
    mempool: Mempool,
    store: S,
    proposal: Option<Proposal>,
}

struct Proposal {
    height: BlockHeight,
    cancellation: CancellationToken,
}

impl<S: BlockStore> Ledger<S> {
    fn tip(&self) -> &Block {
        // Safety: the chain always contains at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    fn contains(&self, block: &Block) -> bool {
        self.chain
            .get(block.height.int() as usize)
            .is_some_and(|known| known.hash == block.hash)
    }

    /// Cancel the registered proposal if it is at or below `height`, returning its height.
    fn preempt_proposal(&mut self, height: BlockHeight) -> Option<BlockHeight> {
        if self
            .proposal
            .as_ref()
            .is_some_and(|proposal| proposal.height <= height)
        {
            return self.proposal.take().map(|proposal| {
                proposal.cancellation.cancel();
                proposal.height
            });
        }
        None
    }
}

/// Everything a proposer needs to build a block on top of the current tip.
pub struct ProposalContext {
    pub previous: Block,
    pub transactions: Vec<Transaction>,
    pub stakes: StakeTable,
    pub cancellation: CancellationToken,
}

impl<S: BlockStore> ChainManager<S> {
    /// Create a chain manager over the chain persisted in `store`.
    ///
    /// If `store` holds no chain, or a chain that does not validate, the chain manager starts from the
    /// genesis block alone, and persists it.
    pub fn load(
        mut store: S,
        consensus: Consensus,
        policy: RulePolicy,
        event_publisher: Option<Sender<Event>>,
    ) -> ChainManager<S> {
        let persisted = store.load_chain();
        let (chain, state, weight) = match validate_chain(&consensus, &persisted) {
            Ok((state, weight)) => (persisted, state, weight),
            Err(err) => {
                if !persisted.is_empty() {
                    log::warn!("Persisted chain is invalid ({}), starting from genesis", err);
                }
                let chain = vec![Block::genesis()];
                store.persist_chain(&chain);
                let state = WorldState::replay(&chain);
                (chain, state, ChainWeight::default())
            }
        };
        let mempool = Mempool::for_chain(&chain);

        ChainManager {
            ledger: Arc::new(Mutex::new(Ledger {
                chain,
                state,
                weight,
                mempool,
                store,
                proposal: None,
            })),
            consensus,
            policy,
            event_publisher,
        }
    }

    /// Validate `block` against the current tip and, if it is valid, append it.
    pub fn try_append(&self, block: Block) -> Result<(), InvalidBlock> {
        loop {
            let (tip, stakes) = {
                let ledger = self.ledger();
                if ledger.contains(&block) {
                    return Err(InvalidBlock::AlreadyKnown);
                }
                (ledger.tip().clone(), ledger.state.stakes().clone())
            };

            if let Err(reason) = validate_block(&block, &tip, &self.consensus, &stakes) {
                Event::publish(
                    &self.event_publisher,
                    Event::RejectBlock(RejectBlockEvent {
                        timestamp: SystemTime::now(),
                        block: block.hash,
                        height: block.height,
                        reason: reason.clone(),
                    }),
                );
                return Err(reason);
            }

            let mut ledger = self.ledger();
            if ledger.tip().hash != tip.hash {
                // The tip moved while we were validating. Try again against the new tip.
                continue;
            }
            let replayed =
                check_not_committed(&block, |transaction| ledger.mempool.is_committed(transaction));
            if let Err(reason) = replayed {
                drop(ledger);
                Event::publish(
                    &self.event_publisher,
                    Event::RejectBlock(RejectBlockEvent {
                        timestamp: SystemTime::now(),
                        block: block.hash,
                        height: block.height,
                        reason: reason.clone(),
                    }),
                );
                return Err(reason);
            }

            ledger.store.persist_block(&block);
            ledger.state.apply_block(&block);
            ledger.weight += self.consensus.block_weight(&block);
            ledger.mempool.reconcile(&block);
            let preempted = ledger.preempt_proposal(block.height);
            ledger.chain.push(block.clone());
            drop(ledger);

            if let Some(height) = preempted {
                Event::publish(
                    &self.event_publisher,
                    Event::PreemptProposal(PreemptProposalEvent {
                        timestamp: SystemTime::now(),
                        height,
                    }),
                );
            }
            Event::publish(
                &self.event_publisher,
                Event::InsertBlock(InsertBlockEvent {
                    timestamp: SystemTime::now(),
                    block,
                }),
            );
            return Ok(());
        }
    }

    /// Validate `candidate` from genesis and, if it is strictly heavier than the local chain, replace the
    /// local chain with it.
    ///
    /// On replacement, transactions from local blocks that `candidate` does not contain go back into the
    /// mempool, if the rule tree of the new chain still allows them.
    pub fn try_replace(&self, candidate: Vec<Block>) -> Result<(), ChainRejected> {
        let (state, weight) = match validate_chain(&self.consensus, &candidate) {
            Ok(validated) => validated,
            Err(reason) => {
                self.publish_reject_chain(candidate.len(), &reason);
                return Err(reason);
            }
        };

        let mut ledger = self.ledger();
        if weight <= ledger.weight {
            let reason = ChainRejected::NotHeavier {
                local: ledger.weight,
                candidate: weight,
            };
            drop(ledger);
            self.publish_reject_chain(candidate.len(), &reason);
            return Err(reason);
        }

        let candidate_ids: HashSet<TransactionID> = candidate
            .iter()
            .flat_map(|block| block.data.iter().map(|transaction| transaction.id))
            .collect();
        let orphaned: Vec<Transaction> = ledger
            .chain
            .iter()
            .flat_map(|block| block.data.iter())
            .filter(|transaction| !candidate_ids.contains(&transaction.id))
            .cloned()
            .collect();

        let old_height = ledger.tip().height;
        ledger.store.persist_chain(&candidate);
        ledger.mempool.reset(&candidate, orphaned, &state, &self.policy);
        ledger.state = state;
        ledger.weight = weight;
        ledger.chain = candidate;
        let preempted = ledger.preempt_proposal(BlockHeight::new(u64::MAX));
        let new_tip = ledger.tip().hash;
        let new_height = ledger.tip().height;
        drop(ledger);

        log::info!(
            "Replaced chain: height {} -> {}, weight {}",
            old_height,
            new_height,
            weight
        );
        if let Some(height) = preempted {
            Event::publish(
                &self.event_publisher,
                Event::PreemptProposal(PreemptProposalEvent {
                    timestamp: SystemTime::now(),
                    height,
                }),
            );
        }
        Event::publish(
            &self.event_publisher,
            Event::ReplaceChain(ReplaceChainEvent {
                timestamp: SystemTime::now(),
                old_height,
                new_height,
                new_tip,
                new_weight: weight,
            }),
        );
        Ok(())
    }

    /// Try to admit `transaction` into the mempool.
    pub fn admit(&self, transaction: Transaction) -> Result<(), Rejected> {
        let id = transaction.id;
        let operation = transaction.operation.name();
        let result = {
            let mut guard = self.ledger();
            let ledger = &mut *guard;
            ledger.mempool.admit(
                transaction,
                &ledger.state,
                &self.policy,
                self.consensus.supports_stake(),
            )
        };

        match &result {
            Ok(()) => Event::publish(
                &self.event_publisher,
                Event::AdmitTransaction(AdmitTransactionEvent {
                    timestamp: SystemTime::now(),
                    transaction: id,
                    operation,
                }),
            ),
            Err(reason) => Event::publish(
                &self.event_publisher,
                Event::RejectTransaction(RejectTransactionEvent {
                    timestamp: SystemTime::now(),
                    transaction: id,
                    reason: reason.clone(),
                }),
            ),
        }
        result
    }

    /// Register a new block proposal on top of the current tip, cancelling any proposal that was
    /// registered before, and get what is needed to build it.
    pub fn begin_proposal(&self, max_transactions: usize) -> ProposalContext {
        let mut ledger = self.ledger();
        if let Some(previous) = ledger.proposal.take() {
            previous.cancellation.cancel();
        }

        let cancellation = CancellationToken::new();
        let previous = ledger.tip().clone();
        ledger.proposal = Some(Proposal {
            height: previous.height + 1,
            cancellation: cancellation.clone(),
        });

        ProposalContext {
            transactions: ledger.mempool.drain(max_transactions),
            stakes: ledger.state.stakes().clone(),
            previous,
            cancellation,
        }
    }

    /// Cancel the registered proposal, if any.
    pub fn cancel_proposal(&self) {
        if let Some(proposal) = self.ledger().proposal.take() {
            proposal.cancellation.cancel();
        }
    }

    /// Get a copy of the whole chain, from genesis to tip.
    pub fn snapshot(&self) -> Vec<Block> {
        self.ledger().chain.clone()
    }

    /// Get a copy of the subtree of the state database at `path`.
    pub fn read(&self, path: &Path) -> Option<Value> {
        self.ledger().state.read(path)
    }

    pub fn tip(&self) -> Block {
        self.ledger().tip().clone()
    }

    pub fn height(&self) -> BlockHeight {
        self.ledger().tip().height
    }

    pub fn stakes(&self) -> StakeTable {
        self.ledger().state.stakes().clone()
    }

    /// The sum of the weights of every block in the chain.
    pub fn total_weight(&self) -> ChainWeight {
        self.ledger().weight
    }

    /// The digest of the state database. Nodes with the same chain have the same digest.
    pub fn state_digest(&self) -> CryptoHash {
        self.ledger().state.database().digest()
    }

    pub fn pending_transactions(&self) -> usize {
        self.ledger().mempool.len()
    }

    pub fn is_pending(&self, transaction: &TransactionID) -> bool {
        self.ledger().mempool.contains(transaction)
    }

    pub fn is_committed(&self, transaction: &TransactionID) -> bool {
        self.ledger().mempool.is_committed(transaction)
    }

    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    pub fn policy(&self) -> &RulePolicy {
        &self.policy
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger<S>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_reject_chain(&self, length: usize, reason: &ChainRejected) {
        log::debug!("Rejected chain of length {}: {}", length, reason);
        Event::publish(
            &self.event_publisher,
            Event::RejectChain(RejectChainEvent {
                timestamp: SystemTime::now(),
                length,
                reason: reason.clone(),
            }),
        );
    }
}

/// Check that `block` is a valid successor of `previous`. `stakes` must be the stake table after
/// replaying `previous`.
pub fn validate_block(
    block: &Block,
    previous: &Block,
    consensus: &Consensus,
    stakes: &StakeTable,
) -> Result<(), InvalidBlock> {
    block.check_linkage(previous)?;

    if !block.is_hash_correct() {
        return Err(InvalidBlock::IncorrectHash);
    }

    let mut ids = HashSet::new();
    for transaction in &block.data {
        if !ids.insert(transaction.id) {
            return Err(InvalidBlock::DuplicateTransaction {
                transaction: transaction.id,
            });
        }
        if let Err(reason) = transaction.validate() {
            return Err(InvalidBlock::MalformedTransaction {
                transaction: transaction.id,
                reason,
            });
        }
        if transaction.operation.is_stake() && !consensus.supports_stake() {
            return Err(InvalidBlock::UnsupportedOperation {
                transaction: transaction.id,
            });
        }
    }

    consensus.validate_consensus_field(block, previous, stakes)?;

    Ok(())
}

/// Check that no transaction in `block` is already committed on the chain it extends.
///
/// Transaction ids are committed at most once per chain, so a signed Increase or Stake cannot be applied
/// twice by including it in a second block.
pub fn check_not_committed(
    block: &Block,
    is_committed: impl Fn(&TransactionID) -> bool,
) -> Result<(), InvalidBlock> {
    match block
        .data
        .iter()
        .find(|transaction| is_committed(&transaction.id))
    {
        Some(transaction) => Err(InvalidBlock::AlreadyCommitted {
            transaction: transaction.id,
        }),
        None => Ok(()),
    }
}

/// Validate `candidate` from genesis, replaying it as it goes. Returns the resulting state and the weight
/// of the chain.
pub fn validate_chain(
    consensus: &Consensus,
    candidate: &[Block],
) -> Result<(WorldState, ChainWeight), ChainRejected> {
    let Some((genesis, rest)) = candidate.split_first() else {
        return Err(ChainRejected::Empty);
    };
    if *genesis != Block::genesis() {
        return Err(ChainRejected::GenesisMismatch);
    }

    let mut state = WorldState::replay(std::slice::from_ref(genesis));
    let mut weight = ChainWeight::default();
    let mut committed: HashSet<TransactionID> =
        genesis.data.iter().map(|transaction| transaction.id).collect();
    let mut previous = genesis;
    for block in rest {
        validate_block(block, previous, consensus, state.stakes())
            .and_then(|()| check_not_committed(block, |transaction| committed.contains(transaction)))
            .map_err(|reason| ChainRejected::InvalidBlock {
                height: block.height,
                reason,
            })?;
        committed.extend(block.data.iter().map(|transaction| transaction.id));
        state.apply_block(block);
        weight += consensus.block_weight(block);
        previous = block;
    }

    Ok((state, weight))
}

/// Reasons why a block cannot be appended to the chain.
#[derive(Clone, Debug, PartialEq)]
pub enum InvalidBlock {
    /// The block is already in the chain.
    AlreadyKnown,

    /// The block does not extend the tip.
    Linkage(LinkageError),

    IncorrectHash,

    MalformedTransaction {
        transaction: TransactionID,
        reason: MalformedTransaction,
    },

    /// The same transaction appears twice in the block.
    DuplicateTransaction { transaction: TransactionID },

    /// The transaction was already committed by an earlier block of the chain.
    AlreadyCommitted { transaction: TransactionID },

    /// The block contains an operation that the node's consensus strategy does not support.
    UnsupportedOperation { transaction: TransactionID },

    Consensus(ConsensusError),
}

impl InvalidBlock {
    /// Whether the block failed because it does not extend the tip, which may mean that the sender is on
    /// a different chain.
    pub fn is_linkage(&self) -> bool {
        matches!(self, InvalidBlock::Linkage(_))
    }
}

impl From<LinkageError> for InvalidBlock {
    fn from(value: LinkageError) -> Self {
        InvalidBlock::Linkage(value)
    }
}

impl From<ConsensusError> for InvalidBlock {
    fn from(value: ConsensusError) -> Self {
        InvalidBlock::Consensus(value)
    }
}

impl Display for InvalidBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvalidBlock::AlreadyKnown => write!(f, "block already known"),
            InvalidBlock::Linkage(err) => write!(f, "block does not extend the tip: {:?}", err),
            InvalidBlock::IncorrectHash => write!(f, "incorrect block hash"),
            InvalidBlock::MalformedTransaction {
                transaction,
                reason,
            } => write!(f, "transaction {:?} is malformed: {}", transaction, reason),
            InvalidBlock::DuplicateTransaction { transaction } => {
                write!(f, "transaction {:?} appears twice", transaction)
            }
            InvalidBlock::AlreadyCommitted { transaction } => {
                write!(f, "transaction {:?} is already committed", transaction)
            }
            InvalidBlock::UnsupportedOperation { transaction } => {
                write!(f, "transaction {:?} is not supported", transaction)
            }
            InvalidBlock::Consensus(err) => write!(f, "{}", err),
        }
    }
}

/// Reasons why a candidate chain does not replace the local chain.
#[derive(Clone, Debug, PartialEq)]
pub enum ChainRejected {
    Empty,

    /// The candidate does not start with the genesis block.
    GenesisMismatch,

    InvalidBlock {
        height: BlockHeight,
        reason: InvalidBlock,
    },

    /// The candidate is valid, but not strictly heavier than the local chain.
    NotHeavier {
        local: ChainWeight,
        candidate: ChainWeight,
    },
}

impl Display for ChainRejected {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainRejected::Empty => write!(f, "empty chain"),
            ChainRejected::GenesisMismatch => write!(f, "genesis mismatch"),
            ChainRejected::InvalidBlock { height, reason } => {
                write!(f, "invalid block at height {}: {}", height, reason)
            }
            ChainRejected::NotHeavier { local, candidate } => write!(
                f,
                "candidate weight {} is not heavier than local weight {}",
                candidate, local
            ),
        }
    }
}
