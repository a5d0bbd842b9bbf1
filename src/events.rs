//! Definitions of the events a node publishes for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Every event carries the
//! [`SystemTime`] at which it happened.
//!
//! Handlers for these events are registered through [`NodeSpec`](crate::node::NodeSpec), and are fired in
//! a dedicated thread by the event bus.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    chain::{ChainRejected, InvalidBlock},
    mempool::Rejected,
    types::{
        block::Block,
        data_types::{BlockHeight, ChainWeight, CryptoHash, PeerAddress, TransactionID},
    },
};

pub enum Event {
    // Events that change the chain or the state.
    InsertBlock(InsertBlockEvent),
    ReplaceChain(ReplaceChainEvent),
    RejectBlock(RejectBlockEvent),
    RejectChain(RejectChainEvent),
    // Events that change the mempool.
    AdmitTransaction(AdmitTransactionEvent),
    RejectTransaction(RejectTransactionEvent),
    // Events emitted by the proposer.
    Propose(ProposeEvent),
    PreemptProposal(PreemptProposalEvent),
    // Events that involve peers.
    ReceiveBlock(ReceiveBlockEvent),
    ReceiveChainRequest(ReceiveChainRequestEvent),
    SendChainResponse(SendChainResponseEvent),
    UpdatePeers(UpdatePeersEvent),
}

impl Event {
    /// Publish `event` if there is an event bus listening. Events published after the event bus has shut
    /// down are dropped.
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

/// A block was appended to the tip of the chain.
pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
}

/// The local chain was replaced by a heavier one.
pub struct ReplaceChainEvent {
    pub timestamp: SystemTime,
    pub old_height: BlockHeight,
    pub new_height: BlockHeight,
    pub new_tip: CryptoHash,
    pub new_weight: ChainWeight,
}

pub struct RejectBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub reason: InvalidBlock,
}

pub struct RejectChainEvent {
    pub timestamp: SystemTime,
    pub length: usize,
    pub reason: ChainRejected,
}

pub struct AdmitTransactionEvent {
    pub timestamp: SystemTime,
    pub transaction: TransactionID,
    pub operation: &'static str,
}

pub struct RejectTransactionEvent {
    pub timestamp: SystemTime,
    pub transaction: TransactionID,
    pub reason: Rejected,
}

/// This node built a block.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub block: Block,
}

/// A proposal in progress was abandoned because a block at its height was accepted from elsewhere.
pub struct PreemptProposalEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
}

pub struct ReceiveBlockEvent {
    pub timestamp: SystemTime,
    pub origin: PeerAddress,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

pub struct ReceiveChainRequestEvent {
    pub timestamp: SystemTime,
    pub peer: PeerAddress,
}

pub struct SendChainResponseEvent {
    pub timestamp: SystemTime,
    pub peer: PeerAddress,
    pub length: usize,
}

pub struct UpdatePeersEvent {
    pub timestamp: SystemTime,
    pub peers: Vec<PeerAddress>,
}
