/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A peer-to-peer replicated database whose write history is committed into a hash-linked chain of
//! blocks.
//!
//! Every node keeps:
//! 1. The canonical [chain](chain) of blocks, starting from a fixed [genesis block](types::block::Block::genesis).
//! 2. A hierarchical [state database](state) which is, at all times, the deterministic fold of every
//!    transaction in the chain.
//! 3. A [rule tree](state::rules) stored inside the state database that gates which paths may be written.
//! 4. A [peer set](peer_sync::peer_set) used to broadcast new blocks and transactions and to bootstrap
//!    newcomers.
//!
//! Nodes agree on one chain through a [consensus](consensus) strategy chosen at start-up: proof-of-work
//! mining or stake-weighted proof-of-stake forging. Competing chains are resolved by the "heaviest valid
//! chain wins" rule implemented in [`chain::ChainManager::try_replace`].
//!
//! To run a node, build a [`node::NodeSpec`] and call `start`. Library users provide the three pluggable
//! collaborators: a [`networking::network::Network`], a [`peer_sync::rendezvous::Rendezvous`], and a
//! [`chain::pluggables::BlockStore`].

pub mod types;

pub mod state;

pub mod mempool;

pub mod consensus;

pub mod chain;

pub mod networking;

pub mod peer_sync;

pub mod events;

pub mod node;

pub(crate) mod proposer;

pub(crate) mod event_bus;

pub(crate) mod logging;
