//! Tests that the state database is a deterministic fold of the chain, and the semantics of its
//! operations.

use chaindb::{
    consensus::Consensus,
    state::{
        database::{IncreaseError, StateDatabase},
        TransactionOutcome, WorldState,
    },
    types::{data_types::Timestamp, path::Path, value::Value},
};

mod common;

use crate::common::chain::{
    chain_manager, fixed_pow, increase_transaction, keypair, mine_chain, set_transaction,
};

fn path(reference: &str) -> Path {
    Path::parse(reference).unwrap()
}

#[test]
fn replay_is_deterministic_test() {
    let alice = keypair();
    let bob = keypair();
    let chain = mine_chain(
        &fixed_pow(),
        vec![
            (
                Timestamp::new(1_000),
                vec![
                    set_transaction(&alice, "test/a", 1.0),
                    set_transaction(&bob, "test/b", "hello"),
                ],
            ),
            (
                Timestamp::new(2_000),
                vec![increase_transaction(&alice, &[("test/a", 2.5), ("test/c", 1.0)])],
            ),
            (
                Timestamp::new(3_000),
                vec![set_transaction(&bob, "test/b/nested", true)],
            ),
        ],
    );

    // 1. Replaying the same chain twice gives identical states, down to the bytes.
    let first = WorldState::replay(&chain);
    let second = WorldState::replay(&chain);
    assert_eq!(first, second);
    assert_eq!(first.database().digest(), second.database().digest());
    assert_eq!(first.database().to_bytes(), second.database().to_bytes());

    // 2. Appending the blocks one by one gives the same state as replaying them from genesis.
    let manager = chain_manager(Consensus::ProofOfWork(fixed_pow()));
    for block in &chain[1..] {
        manager.try_append(block.clone()).unwrap();
    }
    assert_eq!(manager.state_digest(), first.database().digest());

    // 3. The fold is what the operations say it is.
    assert_eq!(first.read(&path("test/a")), Some(Value::Number(3.5)));
    assert_eq!(first.read(&path("test/c")), Some(Value::Number(1.0)));
    assert_eq!(
        first.read(&path("test/b")),
        Some([("nested", Value::Boolean(true))].into_iter().collect())
    );
}

#[test]
fn increase_partial_failure_test() {
    let alice = keypair();
    let mut state = WorldState::replay(&mine_chain(
        &fixed_pow(),
        vec![(
            Timestamp::new(1_000),
            vec![
                set_transaction(&alice, "test/text", "not a number"),
                set_transaction(&alice, "test/scalar", 5.0),
            ],
        )],
    ));

    let outcome = state.apply_transaction(&increase_transaction(
        &alice,
        &[
            ("test/text", 1.0),
            ("test/scalar/child", 1.0),
            ("test/fresh", 2.0),
            ("test/scalar", 0.5),
        ],
    ));

    // Every path of the diff has an outcome, and only the failing ones failed.
    let TransactionOutcome::Increase(outcomes) = outcome else {
        panic!("Expected increase outcomes, got {:?}", outcome);
    };
    assert_eq!(outcomes.len(), 4);
    for (written, result) in &outcomes {
        if *written == path("test/text") {
            assert!(matches!(result, Err(IncreaseError::NotANumber { .. })));
        } else if *written == path("test/scalar/child") {
            assert!(matches!(result, Err(IncreaseError::BlockedByScalar { .. })));
        } else if *written == path("test/fresh") {
            assert_eq!(result, &Ok(2.0));
        } else if *written == path("test/scalar") {
            assert_eq!(result, &Ok(5.5));
        } else {
            panic!("Unexpected path {}", written);
        }
    }

    assert_eq!(
        state.read(&path("test/text")),
        Some(Value::from("not a number"))
    );
    assert_eq!(state.read(&path("test/scalar")), Some(Value::Number(5.5)));
    assert_eq!(state.read(&path("test/fresh")), Some(Value::Number(2.0)));
}

#[test]
fn increase_skips_a_string_and_applies_the_rest_test() {
    let alice = keypair();
    let mut state = WorldState::replay(&mine_chain(
        &fixed_pow(),
        vec![(
            Timestamp::new(1_000),
            vec![
                set_transaction(&alice, "a/b", "text"),
                set_transaction(&alice, "a/c", 10.0),
            ],
        )],
    ));

    state.apply_transaction(&increase_transaction(&alice, &[("a/b", 5.0), ("a/c", 3.0)]));

    assert_eq!(state.read(&path("a/b")), Some(Value::from("text")));
    assert_eq!(state.read(&path("a/c")), Some(Value::Number(13.0)));
}

#[test]
fn increase_treats_null_as_zero_test() {
    let mut db = StateDatabase::new();
    db.set(&path("counter"), Value::Null);

    assert_eq!(db.increase(&path("counter"), 3.0), Ok(3.0));
    assert_eq!(db.increase(&path("counter"), -1.0), Ok(2.0));
    assert_eq!(
        db.increase(&path("counter"), f64::MAX),
        Ok(2.0 + f64::MAX)
    );
    assert!(matches!(
        db.increase(&path("counter"), f64::MAX),
        Err(IncreaseError::NotFinite { .. })
    ));
}

#[test]
fn read_root_returns_whole_tree_test() {
    let state = WorldState::replay(&mine_chain(&fixed_pow(), Vec::new()));

    // The genesis block seeds the rule tree.
    let Some(Value::Mapping(root)) = state.read(&Path::root()) else {
        panic!("The root of the state database is always a mapping");
    };
    assert!(root.contains_key("rules"));
    assert_eq!(state.read(&path("missing/path")), None);
}
