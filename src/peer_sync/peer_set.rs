//! The set of peers a node broadcasts to.

use std::collections::BTreeMap;

use crate::types::data_types::{PeerAddress, VerifyingKeyBytes};

/// Maps the address of every known peer to its identity, if it has introduced itself with a
/// [`Hello`](crate::networking::messages::Hello).
///
/// The peer set never contains the node's own address. It lives only in memory.
#[derive(Clone, Debug)]
pub struct PeerSet {
    me: PeerAddress,
    peers: BTreeMap<PeerAddress, Option<VerifyingKeyBytes>>,
}

impl PeerSet {
    pub fn new(me: PeerAddress) -> PeerSet {
        PeerSet {
            me,
            peers: BTreeMap::new(),
        }
    }

    /// Make the peer set contain exactly the addresses in `listed` (other than the node's own), keeping
    /// the identities of peers that stay. Returns whether the set of addresses changed.
    pub fn refresh(&mut self, listed: Vec<PeerAddress>) -> bool {
        let mut refreshed = BTreeMap::new();
        for address in listed {
            if address == self.me {
                continue;
            }
            let identity = self.peers.get(&address).copied().flatten();
            refreshed.insert(address, identity);
        }

        let changed = !refreshed.keys().eq(self.peers.keys());
        self.peers = refreshed;
        changed
    }

    /// Record that the node at `address` has identity `identity`. Returns whether `address` is new.
    pub fn introduce(&mut self, address: PeerAddress, identity: VerifyingKeyBytes) -> bool {
        if address == self.me {
            return false;
        }
        self.peers.insert(address, Some(identity)).is_none()
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.contains_key(address)
    }

    pub fn identity(&self, address: &PeerAddress) -> Option<VerifyingKeyBytes> {
        self.peers.get(address).copied().flatten()
    }

    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[test]
fn refresh_prunes_unlisted_peers_test() {
    let me = PeerAddress::new("node-0");
    let mut peers = PeerSet::new(me.clone());

    assert!(peers.refresh(vec![
        me.clone(),
        PeerAddress::new("node-1"),
        PeerAddress::new("node-2")
    ]));
    assert!(!peers.contains(&me));
    assert!(!peers.introduce(PeerAddress::new("node-1"), VerifyingKeyBytes::zero()));

    assert!(peers.refresh(vec![PeerAddress::new("node-1")]));
    assert_eq!(peers.addresses(), vec![PeerAddress::new("node-1")]);
    assert_eq!(
        peers.identity(&PeerAddress::new("node-1")),
        Some(VerifyingKeyBytes::zero())
    );
    assert!(!peers.refresh(vec![PeerAddress::new("node-1")]));
}
