//! Tests that nodes on the mock network converge on one chain: through gossip of transactions and
//! blocks, through fork resolution when two nodes mine at the same height or a peer announces a heavier
//! fork, and through bootstrap when a new node joins.
//!
//! These tests poll the nodes every 50 milliseconds and should each complete in a few seconds.

use std::{thread, time::Duration};

use chaindb::types::{
    block::Block,
    data_types::{Difficulty, Timestamp},
    value::Value,
};
use log::LevelFilter;

mod common;

use crate::common::{
    chain::mine_with_difficulty,
    logging::setup_logger,
    mem_store::MemBlockStore,
    network::mock_network,
    node::{
        address, addresses, low_difficulty_pow, poll_until, start_node, wait_until, TestNode,
    },
    peer::PeerStub,
    rendezvous::RendezvousStub,
};

const TIMEOUT: Duration = Duration::from_secs(30);

fn start_cluster(count: usize, rendezvous: &RendezvousStub) -> Vec<TestNode> {
    let networks = mock_network(addresses(count).into_iter());
    networks
        .into_iter()
        .enumerate()
        .map(|(index, network)| {
            start_node(
                low_difficulty_pow(),
                network,
                rendezvous.clone(),
                MemBlockStore::new(),
                address(index),
            )
        })
        .collect()
}

fn same_chain(nodes: &[TestNode]) -> bool {
    let first = nodes[0].blocks();
    nodes[1..].iter().all(|node| node.blocks() == first)
}

#[test]
fn broadcast_convergence_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start 4 nodes and give them time to discover each other.
    let rendezvous = RendezvousStub::new();
    let nodes = start_cluster(4, &rendezvous);
    thread::sleep(Duration::from_millis(500));

    // 2. Every node writes its own key. The writes are gossiped to node 0's mempool.
    let transactions: Vec<_> = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| node.set(&format!("test/node-{}", index), index as i64).unwrap())
        .collect();
    wait_until(TIMEOUT, "node 0 has every write pending", || {
        transactions
            .iter()
            .all(|tx| nodes[0].chain_manager().is_pending(&tx.id))
    });

    // 3. Node 0 mines them, and every node appends the block.
    let block = nodes[0].mine_now().unwrap();
    assert_eq!(block.data.len(), 4);
    wait_until(TIMEOUT, "every node has the same chain", || same_chain(&nodes));

    // 4. Every node reads the same state.
    for node in &nodes {
        for index in 0..4 {
            assert_eq!(
                node.get(&format!("test/node-{}", index)).unwrap(),
                Some(Value::Number(index as f64))
            );
        }
        assert_eq!(
            node.chain_manager().state_digest(),
            nodes[0].chain_manager().state_digest()
        );
        assert_eq!(node.chain_manager().pending_transactions(), 0);
    }
}

#[test]
fn competing_blocks_at_the_same_height_converge_test() {
    setup_logger(LevelFilter::Debug);

    let rendezvous = RendezvousStub::new();
    let nodes = start_cluster(3, &rendezvous);
    thread::sleep(Duration::from_millis(500));

    // 1. Nodes 0 and 1 mine a block at height 1 at the same time.
    thread::scope(|scope| {
        scope.spawn(|| nodes[0].mine_now().unwrap());
        scope.spawn(|| nodes[1].mine_now().unwrap());
    });

    // 2. Whichever block each node saw first, node 0 extending its own chain makes it strictly heavier
    //    than the competitor, and every node adopts it. If node 0 happened to mine at the same height
    //    as a retried proposal of node 1, it tries again.
    for _ in 0..5 {
        let tip = nodes[0].mine_now().unwrap();
        if poll_until(Duration::from_secs(5), || {
            same_chain(&nodes) && nodes[2].chain_manager().tip() == tip
        }) {
            return;
        }
    }
    panic!("Nodes did not converge on one chain");
}

#[test]
fn heavier_fork_at_the_same_height_is_adopted_test() {
    setup_logger(LevelFilter::Debug);

    let mut networks = mock_network([address(0)].into_iter());
    let network = networks.remove(0);
    let mut rival = PeerStub::new(network.join(address(9)));
    let node = start_node(
        low_difficulty_pow(),
        network,
        RendezvousStub::new(),
        MemBlockStore::new(),
        address(0),
    );

    // 1. The node mines height 1 at difficulty 6.
    let local = node.mine_now().unwrap();
    assert_eq!(local.difficulty(), Some(Difficulty::new(6)));

    // 2. A peer announces its own height 1 block, at difficulty 7. It is no taller, but has twice the
    //    work.
    let genesis = Block::genesis();
    let heavier = mine_with_difficulty(&genesis, Timestamp::now(), Difficulty::new(7));
    rival.send_block(&address(0), heavier.clone());

    // 3. The node asks for the peer's chain, and adopts it.
    assert_eq!(
        rival.answer_chain_request(&[genesis, heavier.clone()], TIMEOUT),
        Some(address(0))
    );
    wait_until(TIMEOUT, "the node adopts the heavier fork", || {
        node.chain_manager().tip() == heavier
    });
    assert_eq!(node.blocks().len(), 2);
}

#[test]
fn tie_holds_until_one_side_is_extended_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Two nodes that cannot see each other yet, and a peer that feeds them competing blocks.
    let rendezvous = RendezvousStub::hidden();
    let networks = mock_network(addresses(2).into_iter());
    let mut feeder = PeerStub::new(networks[0].join(address(9)));
    let nodes: Vec<TestNode> = networks
        .into_iter()
        .enumerate()
        .map(|(index, network)| {
            start_node(
                low_difficulty_pow(),
                network,
                rendezvous.clone(),
                MemBlockStore::new(),
                address(index),
            )
        })
        .collect();

    let genesis = Block::genesis();
    let now = Timestamp::now();
    let left = mine_with_difficulty(&genesis, now, Difficulty::new(6));
    let right = mine_with_difficulty(
        &genesis,
        Timestamp::new(now.millis() + 1),
        Difficulty::new(6),
    );

    // 2. Node 0 sees the left block first, node 1 the right one.
    feeder.send_block(&address(0), left.clone());
    feeder.send_block(&address(1), right.clone());
    wait_until(TIMEOUT, "each node appends the block it saw first", || {
        nodes[0].chain_manager().tip() == left && nodes[1].chain_manager().tip() == right
    });

    // 3. Each node then sees the other block and fetches its chain. The forks weigh the same, so both
    //    keep the block they saw first.
    feeder.send_block(&address(0), right.clone());
    assert_eq!(
        feeder.answer_chain_request(&[genesis.clone(), right.clone()], TIMEOUT),
        Some(address(0))
    );
    feeder.send_block(&address(1), left.clone());
    assert_eq!(
        feeder.answer_chain_request(&[genesis, left.clone()], TIMEOUT),
        Some(address(1))
    );
    thread::sleep(Duration::from_millis(500));
    assert_eq!(nodes[0].chain_manager().tip(), left);
    assert_eq!(nodes[1].chain_manager().tip(), right);

    // 4. Once the nodes can see each other, node 1 extends its side, and node 0 switches to it.
    rendezvous.reveal();
    thread::sleep(Duration::from_millis(500));
    let extended = nodes[1].mine_now().unwrap();
    assert_eq!(extended.last_hash, right.hash);
    wait_until(TIMEOUT, "node 0 switches to the extended fork", || {
        nodes[0].chain_manager().tip() == extended
    });
    assert!(same_chain(&nodes));
}

#[test]
fn new_node_bootstraps_from_peers_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Build a chain of 3 blocks on a cluster of 2.
    let rendezvous = RendezvousStub::new();
    let networks = mock_network(addresses(2).into_iter());
    let late_network = networks[0].join(address(2));
    let nodes: Vec<TestNode> = networks
        .into_iter()
        .enumerate()
        .map(|(index, network)| {
            start_node(
                low_difficulty_pow(),
                network,
                rendezvous.clone(),
                MemBlockStore::new(),
                address(index),
            )
        })
        .collect();
    thread::sleep(Duration::from_millis(500));

    nodes[0].set("test/before", "joining").unwrap();
    for _ in 0..3 {
        nodes[0].mine_now().unwrap();
    }
    wait_until(TIMEOUT, "both nodes have the chain", || same_chain(&nodes));

    // 2. A new node joins, and downloads the chain from its peers.
    let newcomer = start_node(
        low_difficulty_pow(),
        late_network,
        rendezvous.clone(),
        MemBlockStore::new(),
        address(2),
    );
    wait_until(TIMEOUT, "the newcomer has the chain", || {
        newcomer.blocks() == nodes[0].blocks()
    });
    assert_eq!(
        newcomer.get("test/before").unwrap(),
        Some(Value::from("joining"))
    );

    // 3. The newcomer takes part in gossip from then on.
    let tip = newcomer.mine_now().unwrap();
    wait_until(TIMEOUT, "the old nodes append the newcomer's block", || {
        nodes.iter().all(|node| node.chain_manager().tip() == tip)
    });
}

#[test]
fn pruned_peer_stops_receiving_blocks_test() {
    setup_logger(LevelFilter::Debug);

    let rendezvous = RendezvousStub::new();
    let nodes = start_cluster(2, &rendezvous);
    thread::sleep(Duration::from_millis(500));

    // Node 1 is no longer listed, so node 0 stops broadcasting to it at its next refresh.
    rendezvous.deregister(&address(1));
    thread::sleep(Duration::from_millis(500));

    nodes[0].mine_now().unwrap();
    thread::sleep(Duration::from_millis(500));
    assert_eq!(nodes[0].blocks().len(), 2);
    assert_eq!(nodes[1].blocks().len(), 1);
}
