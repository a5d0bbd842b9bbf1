//! A scripted peer that takes part in the mock network without running a node.

use std::{
    thread,
    time::{Duration, Instant},
};

use chaindb::{
    networking::{
        messages::{ChainResponse, ChainSyncMessage, Message, NewBlock},
        network::Network,
    },
    types::{block::Block, data_types::PeerAddress},
};

use super::network::NetworkStub;

/// A peer whose every message is sent by the test. It is not registered with any rendezvous service, so
/// nodes only talk to it when answering it.
pub(crate) struct PeerStub {
    network: NetworkStub,
}

impl PeerStub {
    pub(crate) fn new(network: NetworkStub) -> PeerStub {
        PeerStub { network }
    }

    /// Announce `block` to the node at `to` alone.
    pub(crate) fn send_block(&mut self, to: &PeerAddress, block: Block) {
        self.network.send(to.clone(), NewBlock { block }.into());
    }

    /// Wait for a chain request and answer it with `chain`. Returns the address of the requester, or
    /// None if no request arrived within `timeout`. Other messages are discarded.
    pub(crate) fn answer_chain_request(
        &mut self,
        chain: &[Block],
        timeout: Duration,
    ) -> Option<PeerAddress> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.network.recv() {
                Some((origin, Message::ChainSyncMessage(ChainSyncMessage::ChainRequest(_)))) => {
                    self.network.send(
                        origin.clone(),
                        ChainResponse {
                            chain: chain.to_vec(),
                        }
                        .into(),
                    );
                    return Some(origin);
                }
                Some(_) => (),
                None => thread::sleep(Duration::from_millis(10)),
            }
        }
        None
    }
}
