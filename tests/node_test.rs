//! Tests the client operations of a single node.

use std::time::Duration;

use chaindb::{
    mempool::{Rejected, RejectionClass},
    node::{ClientError, ConsensusKind},
    types::{path::PathError, transaction::MalformedTransaction, value::Value},
};
use log::LevelFilter;

mod common;

use crate::common::{
    logging::setup_logger,
    mem_store::MemBlockStore,
    network::mock_network,
    node::{address, low_difficulty_pow, start_node, wait_until},
    rendezvous::RendezvousStub,
};

#[test]
fn set_mine_get_test() {
    setup_logger(LevelFilter::Debug);

    let network = mock_network([address(0)].into_iter()).remove(0);
    let store = MemBlockStore::new();
    let node = start_node(
        low_difficulty_pow(),
        network,
        RendezvousStub::new(),
        store.clone(),
        address(0),
    );

    // 1. Writes are pending until a block is mined.
    let set = node.set("test/comeonnnnnnn", "testme").unwrap();
    let increase = node
        .increase([("test/increase/first", 10.0), ("test/increase/second", 2.0)])
        .unwrap();
    assert!(node.chain_manager().is_pending(&set.id));
    assert_eq!(node.get("test/comeonnnnnnn").unwrap(), None);

    // 2. Mining commits them.
    let block = node.mine_now().unwrap();
    assert_eq!(block.data, vec![set, increase]);
    assert_eq!(
        node.get("test/comeonnnnnnn").unwrap(),
        Some(Value::from("testme"))
    );
    assert_eq!(
        node.get("test/increase").unwrap(),
        Some(
            [
                ("first", Value::Number(10.0)),
                ("second", Value::Number(2.0))
            ]
            .into_iter()
            .collect()
        )
    );

    // 3. The chain is persisted as it grows.
    assert_eq!(node.blocks().len(), 2);
    assert_eq!(store.chain(), node.blocks());
}

#[test]
fn client_errors_test() {
    setup_logger(LevelFilter::Debug);

    let network = mock_network([address(0)].into_iter()).remove(0);
    let node = start_node(
        low_difficulty_pow(),
        network,
        RendezvousStub::new(),
        MemBlockStore::new(),
        address(0),
    );

    let Err(ClientError::Rejected(rejected)) = node.set("restricted/anything", 1.0) else {
        panic!("Writes under restricted must be rejected");
    };
    assert_eq!(rejected.class(), RejectionClass::Forbidden);

    assert_eq!(
        node.set("a//b", 1.0),
        Err(ClientError::Path(PathError::EmptySegment {
            reference: "a//b".to_string()
        }))
    );
    assert_eq!(
        node.set("/", 1.0),
        Err(ClientError::Rejected(Rejected::Malformed(
            MalformedTransaction::RootReference
        )))
    );
    assert_eq!(
        node.increase([("test/x", f64::NAN)]),
        Err(ClientError::NonFiniteNumber)
    );
    assert_eq!(node.stake(10), Err(ClientError::Unsupported));
}

#[test]
fn pos_node_forges_after_staking_test() {
    setup_logger(LevelFilter::Debug);

    let network = mock_network([address(0)].into_iter()).remove(0);
    let node = start_node(
        ConsensusKind::ProofOfStake,
        network,
        RendezvousStub::new(),
        MemBlockStore::new(),
        address(0),
    );

    assert_eq!(node.mine_now(), Err(ClientError::Unsupported));

    node.stake(25).unwrap();
    wait_until(Duration::from_secs(10), "the stake is committed", || {
        node.chain_manager().stakes().stake(&node.identity()).is_some()
    });

    node.set("test/forged", true).unwrap();
    wait_until(Duration::from_secs(10), "the write is committed", || {
        node.get("test/forged").unwrap() == Some(Value::Boolean(true))
    });
}
