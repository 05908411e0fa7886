#![cfg(test)]
// crates/plexus-core/src/plugin_system/tests/transaction_tests.rs

use std::sync::{Arc, Mutex};

use crate::plugin_system::error::{ErrorKind, PluginSystemError};
use crate::plugin_system::transaction::Transaction;

type Journal = Arc<Mutex<Vec<String>>>;

fn step(transaction: &mut Transaction, journal: &Journal, name: &'static str, fail: bool) {
    let forward_log = Arc::clone(journal);
    let compensate_log = Arc::clone(journal);
    transaction.add_operation(
        name,
        move || async move {
            forward_log.lock().unwrap().push(format!("do {}", name));
            if fail {
                Err(PluginSystemError::execution_failed(name, "step failed"))
            } else {
                Ok(())
            }
        },
        move || async move {
            compensate_log.lock().unwrap().push(format!("undo {}", name));
            Ok(())
        },
    );
}

#[tokio::test]
async fn commit_runs_operations_in_order() {
    let journal: Journal = Arc::default();
    let mut transaction = Transaction::new();
    step(&mut transaction, &journal, "a", false);
    step(&mut transaction, &journal, "b", false);
    assert_eq!(transaction.len(), 2);

    transaction.commit().await.unwrap();
    assert!(transaction.is_committed());
    assert_eq!(transaction.completed_operations(), 2);
    assert_eq!(*journal.lock().unwrap(), vec!["do a", "do b"]);
}

#[tokio::test]
async fn failure_compensates_completed_steps_in_reverse() {
    let journal: Journal = Arc::default();
    let mut transaction = Transaction::new();
    step(&mut transaction, &journal, "a", false);
    step(&mut transaction, &journal, "b", false);
    step(&mut transaction, &journal, "c", true);
    step(&mut transaction, &journal, "d", false);

    let err = transaction.commit().await.unwrap_err();
    assert_eq!(err.plugin_id(), Some("c"));
    assert!(transaction.is_rolled_back());
    assert!(!transaction.is_committed());
    assert_eq!(transaction.completed_operations(), 2);
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["do a", "do b", "do c", "undo b", "undo a"]
    );
}

#[tokio::test]
async fn finished_transactions_are_inert() {
    let journal: Journal = Arc::default();
    let mut transaction = Transaction::new();
    step(&mut transaction, &journal, "a", false);
    transaction.commit().await.unwrap();

    assert_eq!(transaction.commit().await.unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(transaction.rollback().await.unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(*journal.lock().unwrap(), vec!["do a"]);
}

#[tokio::test]
async fn manual_rollback_before_commit_compensates_nothing() {
    let journal: Journal = Arc::default();
    let mut transaction = Transaction::new();
    step(&mut transaction, &journal, "a", false);

    transaction.rollback().await.unwrap();
    assert!(transaction.is_rolled_back());
    assert!(journal.lock().unwrap().is_empty());
    assert_eq!(transaction.commit().await.unwrap_err().kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn compensation_failures_do_not_stop_rollback() {
    let journal: Journal = Arc::default();
    let mut transaction = Transaction::new();
    step(&mut transaction, &journal, "a", false);

    let log = Arc::clone(&journal);
    transaction.add_operation(
        "stubborn",
        move || async move {
            log.lock().unwrap().push("do stubborn".to_string());
            Ok(())
        },
        || async { Err(PluginSystemError::execution_failed("stubborn", "cannot undo")) },
    );
    step(&mut transaction, &journal, "boom", true);

    let err = transaction.commit().await.unwrap_err();
    assert_eq!(err.plugin_id(), Some("boom"));
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["do a", "do stubborn", "do boom", "undo a"]
    );
}

#[tokio::test]
async fn empty_transaction_commits() {
    let mut transaction = Transaction::default();
    assert!(transaction.is_empty());
    transaction.commit().await.unwrap();
    assert!(transaction.is_committed());
}
