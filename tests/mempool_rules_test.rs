//! Tests admission into the mempool: rule enforcement, duplicates, structural validity, and
//! reconciliation with mined blocks.

use chaindb::{
    chain::ChainManager,
    consensus::Consensus,
    mempool::{Rejected, RejectionClass},
    state::rules::RulePolicy,
    types::{
        data_types::Timestamp,
        path::Path,
        transaction::{MalformedTransaction, Operation, Transaction},
        value::{Value, MAX_NESTING_DEPTH},
    },
};

mod common;

use crate::common::{
    chain::{adjusting_pow, chain_manager, fixed_pow, keypair, mine_chain, propose, set_transaction},
    mem_store::MemBlockStore,
};

#[test]
fn restricted_write_is_forbidden_and_never_mined_test() {
    let chain = chain_manager(Consensus::ProofOfWork(fixed_pow()));
    let alice = keypair();

    // 1. A write under the restricted prefix is rejected as forbidden.
    let forbidden = set_transaction(&alice, "restricted/secret", "value");
    let rejected = chain.admit(forbidden.clone()).unwrap_err();
    assert_eq!(
        rejected,
        Rejected::Unauthorized {
            path: Path::parse("restricted/secret").unwrap()
        }
    );
    assert_eq!(rejected.class(), RejectionClass::Forbidden);

    // 2. So is a write to the rule tree itself.
    let rule_change = set_transaction(&alice, "rules/restricted/.write", true);
    assert_eq!(
        chain.admit(rule_change).unwrap_err().class(),
        RejectionClass::Forbidden
    );

    // 3. An allowed write in the same block makes it, the forbidden one does not.
    let allowed = set_transaction(&alice, "test/open", 1.0);
    chain.admit(allowed.clone()).unwrap();
    let block = propose(&chain).unwrap();

    assert!(block.data.iter().any(|tx| tx.id == allowed.id));
    assert!(block.data.iter().all(|tx| tx.id != forbidden.id));
    assert_eq!(
        chain.read(&Path::parse("restricted/secret").unwrap()),
        None
    );
    assert_eq!(
        chain.read(&Path::parse("test/open").unwrap()),
        Some(Value::Number(1.0))
    );
}

#[test]
fn explicit_rule_overrides_default_test() {
    // Only `restricted` is write-protected by default, so the rule tree can be edited.
    let chain = ChainManager::load(
        MemBlockStore::new(),
        Consensus::ProofOfWork(fixed_pow()),
        RulePolicy::new(vec![Path::parse("restricted").unwrap()]),
        None,
    );
    let alice = keypair();

    chain
        .admit(set_transaction(&alice, "rules/restricted/public/.write", true))
        .unwrap();
    propose(&chain).unwrap();

    // The most specific rule wins: `restricted/public` is open, the rest of `restricted` is not.
    chain
        .admit(set_transaction(&alice, "restricted/public/notice", "hi"))
        .unwrap();
    assert_eq!(
        chain
            .admit(set_transaction(&alice, "restricted/private", "hi"))
            .unwrap_err()
            .class(),
        RejectionClass::Forbidden
    );
}

#[test]
fn duplicate_and_malformed_transactions_are_bad_requests_test() {
    let chain = chain_manager(Consensus::ProofOfWork(fixed_pow()));
    let alice = keypair();

    // 1. The same transaction cannot be admitted twice, while pending or after being committed.
    let transaction = set_transaction(&alice, "test/a", 1.0);
    chain.admit(transaction.clone()).unwrap();
    assert_eq!(chain.admit(transaction.clone()), Err(Rejected::Duplicate));
    propose(&chain).unwrap();
    assert!(chain.is_committed(&transaction.id));
    assert_eq!(chain.admit(transaction), Err(Rejected::Duplicate));

    // 2. Tampering with a signed transaction breaks its signature.
    let mut tampered = set_transaction(&alice, "test/b", 1.0);
    tampered.timestamp = Timestamp::new(tampered.timestamp.millis() + 1);
    let rejected = chain.admit(tampered).unwrap_err();
    assert_eq!(
        rejected,
        Rejected::Malformed(MalformedTransaction::InvalidSignature)
    );
    assert_eq!(rejected.class(), RejectionClass::BadRequest);

    // 3. Increases must name at least one path.
    let empty = Transaction::new(&alice, Operation::increase(Vec::new()));
    assert_eq!(
        chain.admit(empty),
        Err(Rejected::Malformed(MalformedTransaction::EmptyPayload))
    );

    // 4. Staking is not available under proof-of-work.
    let stake = Transaction::new(&alice, Operation::stake(10));
    assert_eq!(chain.admit(stake), Err(Rejected::Unsupported));

    // 5. Values nested deeper than peers will decode.
    let mut deep = Value::Null;
    for _ in 0..=MAX_NESTING_DEPTH {
        deep = Value::List(vec![deep]);
    }
    assert_eq!(
        chain.admit(set_transaction(&alice, "test/deep", deep)),
        Err(Rejected::Malformed(MalformedTransaction::NestedTooDeeply))
    );
}

#[test]
fn set_cannot_overwrite_a_denied_subtree_test() {
    let chain = ChainManager::load(
        MemBlockStore::new(),
        Consensus::ProofOfWork(fixed_pow()),
        RulePolicy::new(vec![Path::parse("restricted").unwrap()]),
        None,
    );
    let alice = keypair();
    chain
        .admit(set_transaction(&alice, "rules/a/b/.write", false))
        .unwrap();
    propose(&chain).unwrap();

    // 1. Replacing `a` as a whole would overwrite `a/b`.
    assert_eq!(
        chain.admit(set_transaction(&alice, "a", Value::mapping())),
        Err(Rejected::Unauthorized {
            path: Path::parse("a").unwrap()
        })
    );
    assert_eq!(
        chain
            .admit(set_transaction(&alice, "a/b", 1.0))
            .unwrap_err()
            .class(),
        RejectionClass::Forbidden
    );

    // 2. Writes beside the denied subtree are unaffected.
    chain.admit(set_transaction(&alice, "a/c", 1.0)).unwrap();
}

#[test]
fn orphaned_restricted_write_is_not_reinstated_test() {
    let alice = keypair();
    let restricted = set_transaction(&alice, "restricted/path", "smuggled");
    let open = set_transaction(&alice, "test/open", 1.0);

    // 1. A peer's block carries a restricted write. Rules are not checked on replay, so the node
    //    appends it.
    let peer_chain = mine_chain(
        &adjusting_pow(),
        vec![(
            Timestamp::new(2 * 60_000),
            vec![restricted.clone(), open.clone()],
        )],
    );
    let chain = chain_manager(Consensus::ProofOfWork(adjusting_pow()));
    chain.try_append(peer_chain[1].clone()).unwrap();
    assert!(chain.is_committed(&restricted.id));

    // 2. A heavier chain without either transaction replaces it. Only the write that this node would
    //    have admitted goes back into the mempool.
    let heavier = mine_chain(
        &adjusting_pow(),
        vec![
            (Timestamp::new(1_000), Vec::new()),
            (Timestamp::new(2_000), Vec::new()),
        ],
    );
    chain.try_replace(heavier).unwrap();
    assert!(chain.is_pending(&open.id));
    assert!(!chain.is_pending(&restricted.id));
    assert!(!chain.is_committed(&restricted.id));

    // 3. The next block mined locally carries the allowed write only.
    let block = propose(&chain).unwrap();
    assert_eq!(block.data, vec![open]);
    assert_eq!(
        chain.read(&Path::parse("restricted/path").unwrap()),
        None
    );
}

#[test]
fn mined_transactions_leave_the_mempool_test() {
    let chain = chain_manager(Consensus::ProofOfWork(fixed_pow()));
    let alice = keypair();

    let transactions: Vec<Transaction> = (0..5)
        .map(|i| set_transaction(&alice, &format!("test/{}", i), i as i64))
        .collect();
    for transaction in &transactions {
        chain.admit(transaction.clone()).unwrap();
    }
    assert_eq!(chain.pending_transactions(), 5);

    let block = propose(&chain).unwrap();

    // Transactions are mined in admission order, and none is left pending.
    assert_eq!(block.data, transactions);
    assert_eq!(chain.pending_transactions(), 0);
    for transaction in &transactions {
        assert!(!chain.is_pending(&transaction.id));
        assert!(chain.is_committed(&transaction.id));
    }
}
