//! A shared, in-memory implementation of [`Rendezvous`].

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chaindb::{peer_sync::rendezvous::Rendezvous, types::data_types::PeerAddress};

#[derive(Clone)]
pub(crate) struct RendezvousStub {
    registered: Arc<Mutex<BTreeSet<PeerAddress>>>,
    listing: Arc<AtomicBool>,
}

impl RendezvousStub {
    pub(crate) fn new() -> RendezvousStub {
        RendezvousStub {
            registered: Arc::new(Mutex::new(BTreeSet::new())),
            listing: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A rendezvous service that accepts registrations but lists no peers until [`reveal`](Self::reveal)
    /// is called, so that nodes started with it stay isolated from each other.
    pub(crate) fn hidden() -> RendezvousStub {
        let rendezvous = RendezvousStub::new();
        rendezvous.listing.store(false, Ordering::SeqCst);
        rendezvous
    }

    /// Start listing every registered node.
    pub(crate) fn reveal(&self) {
        self.listing.store(true, Ordering::SeqCst);
    }

    /// Stop listing `address`, as if the node at that address went away.
    pub(crate) fn deregister(&self, address: &PeerAddress) {
        self.registered.lock().unwrap().remove(address);
    }
}

impl Rendezvous for RendezvousStub {
    fn register(&mut self, address: PeerAddress) {
        self.registered.lock().unwrap().insert(address);
    }

    fn peers(&self) -> Vec<PeerAddress> {
        if !self.listing.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.registered.lock().unwrap().iter().cloned().collect()
    }
}
