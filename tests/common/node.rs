//! Helpers for starting test nodes on the mock network, and for waiting on them.

use std::{
    thread,
    time::{Duration, Instant},
};

use chaindb::{
    events::{InsertBlockEvent, ReplaceChainEvent},
    node::{Configuration, ConsensusKind, Node, NodeSpec, ProofOfWorkConfiguration},
    types::data_types::{Difficulty, PeerAddress},
};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use super::{
    logging::{first_seven_base64_chars, log_with_context},
    mem_store::MemBlockStore,
    network::NetworkStub,
    rendezvous::RendezvousStub,
};

pub(crate) type TestNode = Node<NetworkStub, MemBlockStore>;

/// Mining at a fixed, low difficulty: blocks always arrive "late" against a zero target interval, so
/// the difficulty never rises above the minimum.
pub(crate) fn low_difficulty_pow() -> ConsensusKind {
    ConsensusKind::ProofOfWork(ProofOfWorkConfiguration {
        initial_difficulty: Difficulty::new(6),
        min_difficulty: Difficulty::new(6),
        target_block_interval: Duration::ZERO,
    })
}

pub(crate) fn address(index: usize) -> PeerAddress {
    PeerAddress::new(format!("node-{}", index))
}

pub(crate) fn addresses(count: usize) -> Vec<PeerAddress> {
    (0..count).map(address).collect()
}

pub(crate) fn start_node(
    consensus: ConsensusKind,
    network: NetworkStub,
    rendezvous: RendezvousStub,
    block_store: MemBlockStore,
    address: PeerAddress,
) -> TestNode {
    let keypair = SigningKey::generate(&mut OsRng);
    let configuration = Configuration::builder()
        .me(keypair)
        .address(address.clone())
        .consensus(consensus)
        .forging_interval(Duration::from_millis(100))
        .peer_refresh_interval(Duration::from_millis(200))
        .log_events(true)
        .build();

    NodeSpec::builder()
        .network(network)
        .rendezvous(rendezvous)
        .block_store(block_store)
        .configuration(configuration)
        .on_insert_block(insert_block_handler(address.clone()))
        .on_replace_chain(replace_chain_handler(address))
        .build()
        .start()
}

/// Poll `condition` until it holds or `timeout` elapses. Returns whether it held.
pub(crate) fn poll_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
    true
}

/// Poll `condition` until it holds, panicking with `what` if it does not within `timeout`.
pub(crate) fn wait_until(timeout: Duration, what: &str, condition: impl FnMut() -> bool) {
    if !poll_until(timeout, condition) {
        panic!("Timed out waiting until {}", what);
    }
}

fn insert_block_handler(address: PeerAddress) -> impl Fn(&InsertBlockEvent) + Send + 'static {
    move |insert_block_event| {
        log_with_context(
            &address,
            &format!(
                "Inserted Block, block hash: {}, height: {}",
                first_seven_base64_chars(&insert_block_event.block.hash.bytes()),
                insert_block_event.block.height
            ),
        );
    }
}

fn replace_chain_handler(address: PeerAddress) -> impl Fn(&ReplaceChainEvent) + Send + 'static {
    move |replace_chain_event| {
        log_with_context(
            &address,
            &format!(
                "Replaced Chain, new tip: {}, height: {} -> {}",
                first_seven_base64_chars(&replace_chain_event.new_tip.bytes()),
                replace_chain_event.old_height,
                replace_chain_event.new_height
            ),
        );
    }
}
