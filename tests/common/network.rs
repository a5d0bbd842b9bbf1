use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use chaindb::{
    networking::{messages::Message, network::Network},
    types::data_types::PeerAddress,
};

type Inboxes = Arc<Mutex<HashMap<PeerAddress, Sender<(PeerAddress, Message)>>>>;

/// A mock network stub which passes messages from and to threads using channels.
///
/// Every stub created from the same [`mock_network`] can reach every other one by address. Broadcasts
/// only go to the peers most recently passed to [`update_peers`](Network::update_peers), like a real
/// network provider would.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_address: PeerAddress,
    all_inboxes: Inboxes,
    peers: Arc<Mutex<BTreeSet<PeerAddress>>>,
    inbox: Arc<Mutex<Receiver<(PeerAddress, Message)>>>,
}

impl NetworkStub {
    /// Attach a new node at `address` to the same mock network as this stub.
    pub(crate) fn join(&self, address: PeerAddress) -> NetworkStub {
        let (sender, receiver) = mpsc::channel();
        self.all_inboxes
            .lock()
            .unwrap()
            .insert(address.clone(), sender);

        NetworkStub {
            my_address: address,
            all_inboxes: self.all_inboxes.clone(),
            peers: Arc::new(Mutex::new(BTreeSet::new())),
            inbox: Arc::new(Mutex::new(receiver)),
        }
    }
}

impl Network for NetworkStub {
    fn update_peers(&mut self, peers: Vec<PeerAddress>) {
        *self.peers.lock().unwrap() = peers.into_iter().collect();
    }

    fn broadcast(&mut self, message: Message) {
        let peers = self.peers.lock().unwrap().clone();
        let inboxes = self.all_inboxes.lock().unwrap();
        for peer in peers {
            if let Some(inbox) = inboxes.get(&peer) {
                let _ = inbox.send((self.my_address.clone(), message.clone()));
            }
        }
    }

    fn send(&mut self, peer: PeerAddress, message: Message) {
        if let Some(inbox) = self.all_inboxes.lock().unwrap().get(&peer) {
            let _ = inbox.send((self.my_address.clone(), message));
        }
    }

    fn recv(&mut self) -> Option<(PeerAddress, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(addresses: impl Iterator<Item = PeerAddress>) -> Vec<NetworkStub> {
    let all_inboxes: Inboxes = Arc::new(Mutex::new(HashMap::new()));
    let stub_and_inboxes: Vec<(PeerAddress, Receiver<(PeerAddress, Message)>)> = addresses
        .map(|address| {
            let (sender, receiver) = mpsc::channel();
            all_inboxes.lock().unwrap().insert(address.clone(), sender);

            (address, receiver)
        })
        .collect();

    stub_and_inboxes
        .into_iter()
        .map(|(my_address, inbox)| NetworkStub {
            my_address,
            all_inboxes: all_inboxes.clone(),
            peers: Arc::new(Mutex::new(BTreeSet::new())),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
