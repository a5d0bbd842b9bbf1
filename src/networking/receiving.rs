//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::types::data_types::PeerAddress;

use super::{
    messages::{ChainRequest, ChainResponse, ChainSyncMessage, GossipMessage, Hello, Message},
    network::Network,
};

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into receiver
/// handles.
///
/// The kinds of messages that the poller distributes are:
/// 1. Gossip messages (processed by the [peer sync client](crate::peer_sync::client)),
/// 2. Chain responses (also processed by the peer sync client), and
/// 3. Chain requests and hellos (processed by the [peer sync server](crate::peer_sync::server)).
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(PeerAddress, GossipMessage)>,
    Receiver<(PeerAddress, ChainResponse)>,
    Receiver<(PeerAddress, ServerMessage)>,
) {
    let (to_gossip_receiver, gossip_receiver) = mpsc::channel();
    let (to_response_receiver, response_receiver) = mpsc::channel();
    let (to_server_receiver, server_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::GossipMessage(g_msg) => {
                    let _ = to_gossip_receiver.send((origin, g_msg));
                }
                Message::ChainSyncMessage(s_msg) => match s_msg {
                    ChainSyncMessage::ChainResponse(response) => {
                        let _ = to_response_receiver.send((origin, response));
                    }
                    ChainSyncMessage::ChainRequest(request) => {
                        let _ = to_server_receiver.send((origin, ServerMessage::ChainRequest(request)));
                    }
                    ChainSyncMessage::Hello(hello) => {
                        let _ = to_server_receiver.send((origin, ServerMessage::Hello(hello)));
                    }
                },
            }
        } else {
            thread::yield_now()
        }
    });
    (
        poller_thread,
        gossip_receiver,
        response_receiver,
        server_receiver,
    )
}

/// Messages addressed to the peer sync server.
pub(crate) enum ServerMessage {
    ChainRequest(ChainRequest),
    Hello(Hello),
}

/// A receiving end for the messages processed by the peer sync client.
pub(crate) struct PeerSyncClientStub {
    gossip: Receiver<(PeerAddress, GossipMessage)>,
    responses: Receiver<(PeerAddress, ChainResponse)>,
}

impl PeerSyncClientStub {
    pub(crate) fn new(
        gossip: Receiver<(PeerAddress, GossipMessage)>,
        responses: Receiver<(PeerAddress, ChainResponse)>,
    ) -> PeerSyncClientStub {
        PeerSyncClientStub { gossip, responses }
    }

    /// Receive a [`GossipMessage`] if one is available.
    pub(crate) fn recv_gossip(
        &self,
    ) -> Result<(PeerAddress, GossipMessage), PeerSyncReceiveError> {
        self.gossip.try_recv().map_err(PeerSyncReceiveError::from)
    }

    /// Receive a [`ChainResponse`] if one is available.
    pub(crate) fn recv_response(
        &self,
    ) -> Result<(PeerAddress, ChainResponse), PeerSyncReceiveError> {
        self.responses.try_recv().map_err(PeerSyncReceiveError::from)
    }
}

/// A receiving end for the messages processed by the peer sync server.
pub(crate) struct PeerSyncServerStub {
    requests: Receiver<(PeerAddress, ServerMessage)>,
}

impl PeerSyncServerStub {
    pub(crate) fn new(requests: Receiver<(PeerAddress, ServerMessage)>) -> PeerSyncServerStub {
        PeerSyncServerStub { requests }
    }

    /// Receive a [`ServerMessage`] if one is available.
    pub(crate) fn recv_request(
        &self,
    ) -> Result<(PeerAddress, ServerMessage), PeerSyncReceiveError> {
        self.requests.try_recv().map_err(PeerSyncReceiveError::from)
    }
}

#[derive(Debug)]
pub enum PeerSyncReceiveError {
    Disconnected,
    NotAvailable,
}

impl From<TryRecvError> for PeerSyncReceiveError {
    fn from(value: TryRecvError) -> Self {
        match value {
            TryRecvError::Empty => PeerSyncReceiveError::NotAvailable,
            TryRecvError::Disconnected => PeerSyncReceiveError::Disconnected,
        }
    }
}
