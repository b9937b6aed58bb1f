mod common;

use common::{config, payment, Harness, ALICE, BOB};
use utxoindex_bitcoin::SyncOutcome;
use utxoindex_core::{
    IndexEvent, IndexerConfig, IndexerError, IndexerState, LedgerStore, UndoKind,
};

async fn snapshot(h: &Harness) -> (usize, Option<String>, usize, usize, Vec<u64>) {
    (
        h.ledger.header_count().await,
        h.ledger.tip().await.unwrap().map(|t| t.hash),
        h.ledger.all_transactions().await.len(),
        h.ledger.all_utxos().await.len(),
        h.ledger.undo_heights().await,
    )
}

#[tokio::test]
async fn reorg_at_100_unwinds_to_ancestor_98() {
    let mut h = Harness::new(config(95));
    let alice = h.ledger.insert_address(1, ALICE).await.unwrap();
    h.chain.mine_empty(0, 95..=98);
    h.chain.mine(0, 99, vec![payment("a99", None, &[(ALICE, 1_000)])]);
    h.chain.mine(0, 100, vec![payment("a100", None, &[(ALICE, 2_000)])]);
    h.sync_all().await;
    assert_eq!(h.ledger.utxos_by_address(alice.id).await.unwrap().len(), 2);

    h.chain.mine(1, 99, vec![payment("b99", None, &[(ALICE, 7_000)])]);
    h.chain.mine_empty(1, 100..=100);

    let outcome = h.indexer.sync_next_block().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Reorged { ancestor: Some(98), depth: 2 });
    assert_eq!(h.indexer.current_tip().await.unwrap(), Some(98));
    assert_eq!(h.indexer.state(), IndexerState::Idle);
    assert!(h.ledger.utxos_by_address(alice.id).await.unwrap().is_empty());
    assert!(h.ledger.all_transactions().await.is_empty());
    assert!(h.indexer.undo_log().get(99).is_empty());
    assert!(h.indexer.undo_log().get(100).is_empty());

    let events = h.observer.events();
    assert!(events.iter().any(|e| matches!(e, IndexEvent::ReorgDetected { height: 100, .. })));
    let rolled: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            IndexEvent::BlockRolledBack { height, .. } => Some(*height),
            _ => None,
        })
        .collect();
    assert_eq!(rolled, vec![100, 99]);
    assert!(events.contains(&IndexEvent::ReorgResolved { ancestor: Some(98), depth: 2 }));

    h.sync_all().await;
    assert_eq!(
        h.ledger.tip().await.unwrap().unwrap().hash,
        h.chain.header_at(100).unwrap().hash
    );
    let utxos = h.ledger.utxos_by_address(alice.id).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].txid, "b99");
    assert_eq!(utxos[0].amount, 7_000);
}

#[tokio::test]
async fn reorg_restores_spent_outputs() {
    let mut h = Harness::new(config(99));
    let alice = h.ledger.insert_address(1, ALICE).await.unwrap();
    let bob = h.ledger.insert_address(2, BOB).await.unwrap();
    h.chain.mine(0, 99, vec![payment("t1", None, &[(ALICE, 5_000)])]);
    h.chain.mine(0, 100, vec![payment("t2", Some(("t1", 0)), &[(BOB, 4_500)])]);
    h.sync_all().await;
    assert!(h.ledger.utxos_by_address(alice.id).await.unwrap()[0].is_spent);

    h.chain.mine_empty(1, 100..=100);
    let outcome = h.indexer.sync_next_block().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Reorged { ancestor: Some(99), depth: 1 });

    let alice_utxos = h.ledger.utxos_by_address(alice.id).await.unwrap();
    assert_eq!(alice_utxos.len(), 1);
    assert!(!alice_utxos[0].is_spent);
    assert_eq!(alice_utxos[0].spent_height, None);
    assert!(h.ledger.utxos_by_address(bob.id).await.unwrap().is_empty());
    assert!(h.ledger.transactions_by_address(bob.id).await.unwrap().is_empty());

    let remaining: Vec<_> = h
        .ledger
        .all_transactions()
        .await
        .into_iter()
        .map(|t| t.txid)
        .collect();
    assert_eq!(remaining, vec!["t1".to_string()]);
}

#[tokio::test]
async fn shorter_chain_on_the_node_triggers_rollback() {
    let mut h = Harness::new(config(95));
    h.chain.mine_empty(0, 95..=100);
    h.sync_all().await;

    h.chain.truncate_above(98);
    let outcome = h.indexer.sync_next_block().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Reorged { ancestor: Some(98), depth: 2 });
    assert_eq!(h.indexer.current_tip().await.unwrap(), Some(98));

    let outcome = h.indexer.sync_next_block().await.unwrap();
    assert_eq!(outcome, SyncOutcome::UpToDate { tip: Some(98) });
}

#[tokio::test]
async fn reorg_deeper_than_the_bound_changes_nothing() {
    let cfg = IndexerConfig {
        start_height: 95,
        max_reorg_depth: 2,
        verify_merkle_proofs: false,
        ..IndexerConfig::default()
    };
    let mut h = Harness::new(cfg);
    h.ledger.insert_address(1, ALICE).await.unwrap();
    h.chain.mine_empty(0, 95..=97);
    for height in 98..=100 {
        h.chain.mine(
            0,
            height,
            vec![payment(&format!("t{height}"), None, &[(ALICE, 1_000)])],
        );
    }
    h.sync_all().await;
    let before = snapshot(&h).await;

    h.chain.mine_empty(1, 97..=100);
    let err = h.indexer.sync_next_block().await.unwrap_err();
    assert!(matches!(
        err,
        IndexerError::ReorgDepthExceeded { tip: 100, max_depth: 2 }
    ));
    assert!(!err.is_retryable());
    assert_eq!(h.indexer.state(), IndexerState::Degraded);
    assert_eq!(snapshot(&h).await, before);
    assert!(!h
        .observer
        .events()
        .iter()
        .any(|e| matches!(e, IndexEvent::BlockRolledBack { .. })));

    h.indexer.tick().await;
    assert_eq!(h.indexer.state(), IndexerState::Degraded);
    assert!(matches!(
        h.observer.events().last(),
        Some(IndexEvent::TickFailed { retryable: false, .. })
    ));
    assert_eq!(snapshot(&h).await, before);
}

#[tokio::test]
async fn reorg_of_the_start_block_clears_and_resyncs() {
    let mut h = Harness::new(config(100));
    let alice = h.ledger.insert_address(1, ALICE).await.unwrap();
    h.chain.mine(0, 100, vec![payment("a100", None, &[(ALICE, 5_000)])]);
    h.sync_all().await;

    h.chain.mine(1, 100, vec![payment("b100", None, &[(ALICE, 6_000)])]);
    assert_eq!(h.indexer.find_common_ancestor(100).await.unwrap(), None);

    let outcome = h.indexer.sync_next_block().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Reorged { ancestor: None, depth: 1 });
    assert_eq!(h.indexer.state(), IndexerState::Idle);
    assert_eq!(h.indexer.current_tip().await.unwrap(), None);
    assert!(h.ledger.all_utxos().await.is_empty());
    assert!(h.ledger.all_transactions().await.is_empty());
    assert!(h.ledger.undo_heights().await.is_empty());
    assert!(h
        .observer
        .events()
        .contains(&IndexEvent::ReorgResolved { ancestor: None, depth: 1 }));

    h.sync_all().await;
    assert_eq!(
        h.ledger.tip().await.unwrap().unwrap().hash,
        h.chain.header_at(100).unwrap().hash
    );
    let utxos = h.ledger.utxos_by_address(alice.id).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].txid, "b100");
}

#[tokio::test]
async fn orphaned_chain_inside_the_bound_is_unwound_to_the_start() {
    let mut h = Harness::new(config(98));
    h.chain.mine_empty(0, 98..=100);
    h.sync_all().await;

    h.chain.mine_empty(1, 98..=101);
    let outcome = h.indexer.sync_next_block().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Reorged { ancestor: None, depth: 3 });
    assert_eq!(h.ledger.header_count().await, 0);

    h.sync_all().await;
    assert_eq!(h.indexer.current_tip().await.unwrap(), Some(101));
    assert_eq!(
        h.ledger.header_by_height(98).await.unwrap().unwrap().hash,
        h.chain.header_at(98).unwrap().hash
    );
}

#[tokio::test]
async fn common_ancestor_of_an_unchanged_chain_is_the_tip() {
    let mut h = Harness::new(config(95));
    h.chain.mine_empty(0, 95..=100);
    h.sync_all().await;

    assert_eq!(h.indexer.find_common_ancestor(100).await.unwrap(), Some(100));
}

#[tokio::test]
async fn ancestor_search_propagates_source_failures() {
    let mut h = Harness::new(config(95));
    h.chain.mine_empty(0, 95..=100);
    h.sync_all().await;

    h.chain.set_offline(true);
    let err = h.indexer.find_common_ancestor(100).await.unwrap_err();
    assert!(err.is_chain_source());
}

#[tokio::test]
async fn accept_then_roll_back_restores_the_ledger() {
    let mut h = Harness::new(config(100));
    h.ledger.insert_address(1, ALICE).await.unwrap();
    h.ledger.insert_address(2, BOB).await.unwrap();
    h.chain.mine(0, 100, vec![payment("t1", None, &[(ALICE, 5_000)])]);
    h.chain.mine(0, 101, vec![payment("t2", None, &[(ALICE, 6_000)])]);
    h.sync_all().await;
    let before = snapshot(&h).await;
    let utxos_before = h.ledger.all_utxos().await;
    let txs_before = h.ledger.all_transactions().await;

    h.chain.mine(0, 102, vec![payment("t3", Some(("t1", 0)), &[(BOB, 4_000)])]);
    h.chain.mine(
        0,
        103,
        vec![payment("t4", Some(("t2", 0)), &[(ALICE, 3_000), (BOB, 2_000)])],
    );
    h.chain.mine(0, 104, vec![payment("t5", Some(("t3", 0)), &[(ALICE, 3_500)])]);
    h.sync_all().await;
    assert_eq!(h.indexer.current_tip().await.unwrap(), Some(104));

    for height in (102..=104).rev() {
        h.indexer.rollback_block(height).await.unwrap();
    }

    assert_eq!(snapshot(&h).await, before);
    assert_eq!(h.ledger.all_utxos().await, utxos_before);
    assert_eq!(h.ledger.all_transactions().await, txs_before);
    assert!(h.indexer.undo_log().get(102).is_empty());
}

#[tokio::test]
async fn rollback_is_only_allowed_at_the_tip() {
    let mut h = Harness::new(config(95));
    h.chain.mine_empty(0, 95..=100);
    h.sync_all().await;

    let err = h.indexer.rollback_block(99).await.unwrap_err();
    assert!(matches!(err, IndexerError::OutOfOrder { expected: 100, actual: 99 }));
    assert_eq!(h.indexer.current_tip().await.unwrap(), Some(100));

    let err = h.indexer.rollback_block(0).await.unwrap_err();
    assert!(matches!(err, IndexerError::Other(_)));
}

#[tokio::test]
async fn rollback_after_restart_uses_the_persisted_journal() {
    let mut h = Harness::new(config(99));
    let alice = h.ledger.insert_address(1, ALICE).await.unwrap();
    h.chain.mine(0, 99, vec![payment("t1", None, &[(ALICE, 5_000)])]);
    h.chain.mine(
        0,
        100,
        vec![payment("t2", Some(("t1", 0)), &[(ALICE, 4_000)])],
    );
    h.sync_all().await;

    h.restart();
    assert!(h.indexer.undo_log().is_empty());

    h.chain.mine_empty(1, 100..=100);
    h.indexer.sync_next_block().await.unwrap();

    let utxos = h.ledger.utxos_by_address(alice.id).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].txid, "t1");
    assert!(!utxos[0].is_spent);
    assert_eq!(h.ledger.undo_heights().await, vec![99]);

    assert!(h
        .observer
        .events()
        .contains(&IndexEvent::BlockRolledBack { height: 100, actions: 2 }));
}

#[tokio::test]
async fn undo_bucket_records_actions_in_application_order() {
    let mut h = Harness::new(config(100));
    h.ledger.insert_address(1, ALICE).await.unwrap();
    h.chain.mine(0, 100, vec![payment("t1", None, &[(ALICE, 5_000)])]);
    h.chain.mine(
        0,
        101,
        vec![payment("t2", Some(("t1", 0)), &[(ALICE, 1_000), (ALICE, 3_000)])],
    );
    h.sync_all().await;

    let bucket = h.indexer.undo_log().get(101);
    let shape: Vec<_> = bucket.iter().map(|a| (a.kind, a.txid.as_str(), a.vout)).collect();
    assert_eq!(
        shape,
        vec![
            (UndoKind::SpendUtxo, "t1", 0),
            (UndoKind::CreateUtxo, "t2", 0),
            (UndoKind::CreateUtxo, "t2", 1),
        ]
    );
}
