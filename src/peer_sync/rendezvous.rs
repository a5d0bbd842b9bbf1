use crate::types::data_types::PeerAddress;

/// A peer discovery service (a "tracker").
///
/// Nodes register their own address when they start, and periodically ask the service for the addresses
/// of every registered node.
pub trait Rendezvous: Clone + Send + 'static {
    /// Announce that a node is reachable at `address`.
    fn register(&mut self, address: PeerAddress);

    /// Get the addresses of every node currently registered, possibly including the caller's own.
    fn peers(&self) -> Vec<PeerAddress>;
}
