//! Helpers for driving a [`ChainManager`] directly, without the node's threads.

use std::time::Duration;

use chaindb::{
    chain::ChainManager,
    consensus::{pow::ProofOfWork, CancellationToken, Consensus, ProposeError},
    state::rules::RulePolicy,
    types::{
        block::{Block, ConsensusField},
        crypto_primitives::Keypair,
        data_types::{Difficulty, Timestamp},
        path::Path,
        transaction::{Operation, Transaction},
        value::Value,
    },
};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use super::mem_store::MemBlockStore;

pub(crate) fn keypair() -> Keypair {
    Keypair::new(SigningKey::generate(&mut OsRng))
}

/// Proof-of-work whose difficulty stays at 6.
pub(crate) fn fixed_pow() -> ProofOfWork {
    ProofOfWork::new(Difficulty::new(6), Difficulty::new(6), Duration::ZERO)
}

/// Proof-of-work whose difficulty starts at 4 and moves with the spacing of block timestamps around a
/// one minute target.
pub(crate) fn adjusting_pow() -> ProofOfWork {
    ProofOfWork::new(Difficulty::new(4), Difficulty::new(1), Duration::from_secs(60))
}

pub(crate) fn chain_manager(consensus: Consensus) -> ChainManager<MemBlockStore> {
    ChainManager::load(MemBlockStore::new(), consensus, RulePolicy::default(), None)
}

/// Build a block on the manager's tip from its mempool, and append it.
pub(crate) fn propose(chain: &ChainManager<MemBlockStore>) -> Result<Block, ProposeError> {
    let context = chain.begin_proposal(100);
    let block = chain.consensus().propose_block(
        &context.previous,
        context.transactions,
        &context.stakes,
        &context.cancellation,
    )?;
    chain.try_append(block.clone())?;
    Ok(block)
}

/// Mine a chain on top of genesis with one block per timestamp, each containing the given transactions.
pub(crate) fn mine_chain(pow: &ProofOfWork, blocks: Vec<(Timestamp, Vec<Transaction>)>) -> Vec<Block> {
    let mut chain = vec![Block::genesis()];
    for (timestamp, transactions) in blocks {
        let previous = chain.last().unwrap();
        let block = pow
            .mine_at(previous, transactions, timestamp, &CancellationToken::new())
            .unwrap();
        chain.push(block);
    }
    chain
}

/// Mine a block extending `previous` with an arbitrary recorded `difficulty`.
pub(crate) fn mine_with_difficulty(
    previous: &Block,
    timestamp: Timestamp,
    difficulty: Difficulty,
) -> Block {
    (0..u64::MAX)
        .map(|nonce| {
            Block::new(
                previous.height + 1,
                timestamp,
                previous.hash,
                Vec::new(),
                ConsensusField::ProofOfWork { nonce, difficulty },
            )
        })
        .find(|block| block.hash.leading_zero_bits() >= difficulty.int())
        .unwrap()
}

pub(crate) fn set_transaction(keypair: &Keypair, reference: &str, value: impl Into<Value>) -> Transaction {
    Transaction::new(
        keypair,
        Operation::set(Path::parse(reference).unwrap(), value),
    )
}

pub(crate) fn increase_transaction(keypair: &Keypair, diff: &[(&str, f64)]) -> Transaction {
    Transaction::new(
        keypair,
        Operation::increase(
            diff.iter()
                .map(|(reference, delta)| (Path::parse(reference).unwrap(), *delta)),
        ),
    )
}
