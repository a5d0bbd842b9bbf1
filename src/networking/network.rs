use crate::types::data_types::PeerAddress;

use super::messages::Message;

pub trait Network: Clone + Send {
    /// Inform the network provider of the current set of peers. Peers that are no longer in `peers`
    /// should not be broadcast to anymore.
    fn update_peers(&mut self, peers: Vec<PeerAddress>);

    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking. Messages to unreachable peers are dropped.
    fn send(&mut self, peer: PeerAddress, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(PeerAddress, Message)>;
}

/// Handle for informing the network provider about changes to the peer set.
///
/// The network provider needs to know the peer set so that broadcasts reach newly discovered peers and
/// stop going to peers that have left.
#[derive(Clone)]
pub(crate) struct PeerUpdateHandle<N: Network> {
    network: N,
}

impl<N: Network> PeerUpdateHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn update_peers(&mut self, peers: Vec<PeerAddress>) {
        self.network.update_peers(peers)
    }
}
