//! Implements the [`PeerSyncClient`], which processes blocks, transactions, and chains received from
//! peers.
//!
//! ## Gossip
//!
//! Blocks and transactions spread by gossip: a node that appends a block or admits a transaction
//! broadcasts it, and every node that receives one and accepts it broadcasts it again. A node that
//! already knows a block or transaction does not relay it, so gossip dies out once everyone has it.
//!
//! ## Fork resolution
//!
//! A received block that is not in the local chain and does not extend the local tip is evidence that
//! the sender is on a different chain. Its height says nothing about its weight: under proof-of-work a
//! shorter chain may hold more work. So the client requests the sender's whole chain whatever the
//! block's height. When the chain arrives, the [chain manager](crate::chain::ChainManager::try_replace)
//! adopts it if it is valid and strictly heavier. Otherwise the local chain stays, so the first-seen
//! block at a height wins ties.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::SystemTime,
};

use crate::{
    chain::{pluggables::BlockStore, ChainManager, InvalidBlock},
    events::{Event, ReceiveBlockEvent},
    mempool::Rejected,
    networking::{
        messages::{ChainRequest, ChainResponse, GossipMessage, NewBlock, NewTransaction},
        network::Network,
        receiving::{PeerSyncClientStub, PeerSyncReceiveError},
        sending::SenderHandle,
    },
    types::{block::Block, data_types::PeerAddress, transaction::Transaction},
};

pub(crate) struct PeerSyncClient<N: Network + 'static, S: BlockStore> {
    chain: ChainManager<S>,
    receiver: PeerSyncClientStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, S: BlockStore> PeerSyncClient<N, S> {
    pub(crate) fn new(
        chain: ChainManager<S>,
        gossip: Receiver<(PeerAddress, GossipMessage)>,
        responses: Receiver<(PeerAddress, ChainResponse)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            chain,
            receiver: PeerSyncClientStub::new(gossip, responses),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Peer sync client thread disconnected from main thread")
                }
            }

            let mut idle = true;

            match self.receiver.recv_gossip() {
                Ok((origin, GossipMessage::NewBlock(NewBlock { block }))) => {
                    idle = false;
                    self.on_receive_block(origin, block)
                }
                Ok((origin, GossipMessage::NewTransaction(NewTransaction { transaction }))) => {
                    idle = false;
                    self.on_receive_transaction(origin, transaction)
                }
                Err(PeerSyncReceiveError::NotAvailable) => (),
                Err(PeerSyncReceiveError::Disconnected) => {
                    panic!("Peer sync client thread disconnected from the poller")
                }
            }

            match self.receiver.recv_response() {
                Ok((origin, ChainResponse { chain })) => {
                    idle = false;
                    self.on_receive_chain(origin, chain)
                }
                Err(PeerSyncReceiveError::NotAvailable) => (),
                Err(PeerSyncReceiveError::Disconnected) => {
                    panic!("Peer sync client thread disconnected from the poller")
                }
            }

            if idle {
                thread::yield_now();
            }
        })
    }

    fn on_receive_block(&mut self, origin: PeerAddress, block: Block) {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveBlock(ReceiveBlockEvent {
                timestamp: SystemTime::now(),
                origin: origin.clone(),
                block: block.hash,
                height: block.height,
            }),
        );

        let height = block.height;
        match self.chain.try_append(block.clone()) {
            Ok(()) => self.sender.broadcast(NewBlock { block }),
            Err(InvalidBlock::AlreadyKnown) => (),
            Err(err) if err.is_linkage() => {
                log::debug!(
                    "Block at height {} from {} does not extend our tip ({}), requesting its chain",
                    height,
                    origin,
                    err
                );
                self.sender.send(
                    origin,
                    ChainRequest {
                        known_height: self.chain.height(),
                    },
                );
            }
            Err(err) => log::debug!("Ignoring block at height {} from {}: {}", height, origin, err),
        }
    }

    fn on_receive_transaction(
        &mut self,
        origin: PeerAddress,
        transaction: Transaction,
    ) {
        match self.chain.admit(transaction.clone()) {
            Ok(()) => self.sender.broadcast(NewTransaction { transaction }),
            Err(Rejected::Duplicate) => (),
            Err(reason) => log::debug!("Ignoring transaction from {}: {}", origin, reason),
        }
    }

    fn on_receive_chain(&mut self, origin: PeerAddress, chain: Vec<Block>) {
        match self.chain.try_replace(chain) {
            Ok(()) => {
                // Let peers that are still on the old chain know that there is a heavier one.
                self.sender.broadcast(NewBlock {
                    block: self.chain.tip(),
                });
            }
            Err(reason) => log::debug!("Kept our chain over the one from {}: {}", origin, reason),
        }
    }
}
