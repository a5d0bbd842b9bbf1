/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that turns mempool contents into blocks.
//!
//! The proposer builds a block when:
//! 1. A client asks it to, through [`Node::mine_now`](crate::node::Node::mine_now), or
//! 2. The configured proposal interval has elapsed and the mempool is not empty.
//!
//! Each proposal is [registered](crate::chain::ChainManager::begin_proposal) with the chain manager
//! before it starts. If a block at the proposal's height is accepted from a peer in the meantime, the
//! proposal is cancelled, and a client request is retried against the new tip.
//!
//! Under proof-of-stake, the proposer never forges two blocks at the same height.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    chain::{pluggables::BlockStore, ChainManager},
    consensus::ProposeError,
    events::{Event, ProposeEvent},
    networking::{messages::NewBlock, network::Network, sending::SenderHandle},
    types::{block::Block, data_types::BlockHeight},
};

/// A client request for a block, with the channel its result should be sent back on.
pub(crate) type ProposeRequest = Sender<Result<Block, ProposeError>>;

/// How many times a client request is retried after being preempted.
const MAX_PROPOSAL_ATTEMPTS: usize = 3;

/// How long the proposer waits for a client request before checking its interval and shutdown signal.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct Proposer<N: Network + 'static, S: BlockStore> {
    config: ProposerConfiguration,
    chain: ChainManager<S>,
    sender: SenderHandle<N>,
    requests: Receiver<ProposeRequest>,
    last_attempt: Instant,
    last_forged: Option<BlockHeight>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, S: BlockStore> Proposer<N, S> {
    pub(crate) fn new(
        config: ProposerConfiguration,
        chain: ChainManager<S>,
        network: N,
        requests: Receiver<ProposeRequest>,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            chain,
            sender: SenderHandle::new(network),
            requests,
            last_attempt: Instant::now(),
            last_forged: None,
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(std::sync::mpsc::TryRecvError::Empty) => (),
                Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    panic!("Proposer thread disconnected from main thread")
                }
            }

            match self.requests.recv_timeout(POLL_INTERVAL) {
                Ok(reply) => {
                    let result = self.propose_with_retries();
                    let _ = reply.send(result);
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => (),
                // The node handle is gone, but the shutdown signal will follow.
                Err(RecvTimeoutError::Disconnected) => thread::yield_now(),
            }

            if let Some(interval) = self.config.interval {
                if Instant::now() - self.last_attempt >= interval {
                    self.last_attempt = Instant::now();
                    if self.chain.pending_transactions() > 0 {
                        if let Err(err) = self.propose() {
                            log::debug!("Did not propose a block: {}", err);
                        }
                    }
                }
            }
        })
    }

    /// Propose a block, starting over against the new tip if the proposal is preempted.
    fn propose_with_retries(&mut self) -> Result<Block, ProposeError> {
        let mut result = self.propose();
        for _ in 1..MAX_PROPOSAL_ATTEMPTS {
            match result {
                Err(ProposeError::Preempted(_)) | Err(ProposeError::Rejected(_)) => {
                    result = self.propose()
                }
                _ => break,
            }
        }
        result
    }

    /// Build a block on top of the current tip, append it to the local chain, and broadcast it.
    fn propose(&mut self) -> Result<Block, ProposeError> {
        let context = self.chain.begin_proposal(self.config.max_block_transactions);
        let height = context.previous.height + 1;
        let forging = self.chain.consensus().supports_stake();
        if forging && self.last_forged == Some(height) {
            return Err(ProposeError::AlreadyForged { height });
        }

        let block = self.chain.consensus().propose_block(
            &context.previous,
            context.transactions,
            &context.stakes,
            &context.cancellation,
        )?;
        if forging {
            self.last_forged = Some(height);
        }

        Event::publish(
            &self.event_publisher,
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                block: block.clone(),
            }),
        );

        self.chain.try_append(block.clone())?;
        self.sender.broadcast(NewBlock {
            block: block.clone(),
        });
        Ok(block)
    }
}

/// Immutable parameters that define the behaviour of the [`Proposer`].
pub(crate) struct ProposerConfiguration {
    pub(crate) max_block_transactions: usize,
    /// How often to propose a block when the mempool is not empty. `None` means only on request.
    pub(crate) interval: Option<Duration>,
}
