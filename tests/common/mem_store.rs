//! A simple, volatile, in-memory implementation of [`BlockStore`].

use std::sync::{Arc, Mutex};

use chaindb::{chain::pluggables::BlockStore, types::block::Block};

/// An in-memory implementation of [`BlockStore`]. Clones share the same storage, so a test can keep a
/// clone to inspect what a node persisted.
#[derive(Clone)]
pub(crate) struct MemBlockStore(Arc<Mutex<Vec<Block>>>);

impl MemBlockStore {
    /// Create a new, empty `MemBlockStore`.
    pub(crate) fn new() -> MemBlockStore {
        MemBlockStore(Arc::new(Mutex::new(Vec::new())))
    }

    /// Create a `MemBlockStore` that already holds `chain`.
    pub(crate) fn with_chain(chain: Vec<Block>) -> MemBlockStore {
        MemBlockStore(Arc::new(Mutex::new(chain)))
    }

    pub(crate) fn chain(&self) -> Vec<Block> {
        self.0.lock().unwrap().clone()
    }
}

impl BlockStore for MemBlockStore {
    fn load_chain(&self) -> Vec<Block> {
        self.0.lock().unwrap().clone()
    }

    fn persist_block(&mut self, block: &Block) {
        self.0.lock().unwrap().push(block.clone());
    }

    fn persist_chain(&mut self, chain: &[Block]) {
        *self.0.lock().unwrap() = chain.to_vec();
    }
}
