//! Trait for pluggable chain persistence.
//!
//! The crate does not decide how blocks are written to disk. Library users provide a type implementing
//! [`BlockStore`], and the [`ChainManager`](super::ChainManager) calls it every time the chain changes.

use crate::types::block::Block;

pub trait BlockStore: Clone + Send + 'static {
    /// Load the persisted chain, starting from genesis. Returns an empty vector if nothing has been
    /// persisted yet.
    fn load_chain(&self) -> Vec<Block>;

    /// Persist `block`, which has just been appended to the tip of the chain.
    fn persist_block(&mut self, block: &Block);

    /// Persist `chain` as a whole, replacing whatever was persisted before.
    fn persist_chain(&mut self, chain: &[Block]);
}
