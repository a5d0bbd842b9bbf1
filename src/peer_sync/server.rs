/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`PeerSyncServer`], which keeps the node's peer set up to date and answers chain
//! requests from other nodes.
//!
//! The server's responsibility is to:
//! 1. Bootstrap the node when it starts: register with the [`Rendezvous`] service, learn the current
//!    peers, introduce itself to them with a `Hello`, and request their chains. The responses are
//!    processed by the [client](super::client), which adopts the heaviest valid one.
//! 2. Respond to every chain request with the node's whole chain.
//! 3. Periodically ask the rendezvous service for the current peers, adding new ones and pruning the
//!    ones that are no longer listed.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    chain::{pluggables::BlockStore, ChainManager},
    events::{Event, ReceiveChainRequestEvent, SendChainResponseEvent, UpdatePeersEvent},
    networking::{
        messages::{ChainRequest, ChainResponse, Hello},
        network::{Network, PeerUpdateHandle},
        receiving::{PeerSyncReceiveError, PeerSyncServerStub, ServerMessage},
        sending::SenderHandle,
    },
    types::data_types::{PeerAddress, VerifyingKeyBytes},
};

use super::{peer_set::PeerSet, rendezvous::Rendezvous};

pub(crate) struct PeerSyncServer<N: Network + 'static, R: Rendezvous, S: BlockStore> {
    config: PeerSyncServerConfiguration,
    chain: ChainManager<S>,
    rendezvous: R,
    peers: PeerSet,
    last_refresh: Instant,
    receiver: PeerSyncServerStub,
    sender: SenderHandle<N>,
    peer_update_handle: PeerUpdateHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, R: Rendezvous, S: BlockStore> PeerSyncServer<N, R, S> {
    pub(crate) fn new(
        config: PeerSyncServerConfiguration,
        chain: ChainManager<S>,
        rendezvous: R,
        requests: Receiver<(PeerAddress, ServerMessage)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            peers: PeerSet::new(config.me.clone()),
            config,
            chain,
            rendezvous,
            last_refresh: Instant::now(),
            receiver: PeerSyncServerStub::new(requests),
            sender: SenderHandle::new(network.clone()),
            peer_update_handle: PeerUpdateHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            self.bootstrap();

            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("Peer sync server thread disconnected from main thread")
                    }
                }

                // 1. Respond to chain requests and hellos.
                match self.receiver.recv_request() {
                    Ok((origin, ServerMessage::ChainRequest(request))) => {
                        self.on_receive_chain_request(origin, request)
                    }
                    Ok((origin, ServerMessage::Hello(hello))) => self.on_receive_hello(origin, hello),
                    Err(PeerSyncReceiveError::NotAvailable) => (),
                    // Safety: the poller thread (the sender side of this channel) shuts down after this
                    // thread, so this only happens if the poller panicked.
                    Err(PeerSyncReceiveError::Disconnected) => {
                        panic!("Peer sync server thread disconnected from the poller")
                    }
                }

                // 2. Refresh the peer set if it is time to.
                if Instant::now() - self.last_refresh >= self.config.peer_refresh_interval {
                    self.refresh_peers();
                }

                thread::yield_now();
            }
        })
    }

    /// Join the network: register, discover peers, say hello, and ask for their chains.
    fn bootstrap(&mut self) {
        self.rendezvous.register(self.config.me.clone());
        self.refresh_peers();

        self.sender.broadcast(Hello {
            address: self.config.me.clone(),
            identity: self.config.identity,
        });

        let known_height = self.chain.height();
        for peer in self.peers.addresses() {
            log::debug!("Requesting chain from {}", peer);
            self.sender.send(peer, ChainRequest { known_height });
        }
    }

    fn on_receive_chain_request(&mut self, origin: PeerAddress, request: ChainRequest) {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveChainRequest(ReceiveChainRequestEvent {
                timestamp: SystemTime::now(),
                peer: origin.clone(),
            }),
        );
        log::debug!(
            "{} requested our chain, its height is {}",
            origin,
            request.known_height
        );

        let chain = self.chain.snapshot();
        let length = chain.len();
        self.sender.send(origin.clone(), ChainResponse { chain });

        Event::publish(
            &self.event_publisher,
            Event::SendChainResponse(SendChainResponseEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                length,
            }),
        );
    }

    fn on_receive_hello(&mut self, origin: PeerAddress, hello: Hello) {
        if origin != hello.address {
            log::debug!(
                "Ignoring hello from {} claiming to be {}",
                origin,
                hello.address
            );
            return;
        }

        if self.peers.introduce(hello.address, hello.identity) {
            self.publish_peers();
        }
    }

    fn refresh_peers(&mut self) {
        if self.peers.refresh(self.rendezvous.peers()) {
            self.publish_peers();
        }
        self.last_refresh = Instant::now();
    }

    fn publish_peers(&mut self) {
        let peers = self.peers.addresses();
        self.peer_update_handle.update_peers(peers.clone());
        Event::publish(
            &self.event_publisher,
            Event::UpdatePeers(UpdatePeersEvent {
                timestamp: SystemTime::now(),
                peers,
            }),
        );
    }
}

/// Immutable parameters that define the behaviour of the [`PeerSyncServer`].
pub(crate) struct PeerSyncServerConfiguration {
    pub(crate) me: PeerAddress,
    pub(crate) identity: VerifyingKeyBytes,
    pub(crate) peer_refresh_interval: Duration,
}
