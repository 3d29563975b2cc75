use anyhow::Result;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use altaidb::common::types::Rid;
use altaidb::transaction::concurrency::lock_manager::{AbortReason, LockManager};
use altaidb::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

mod common;
use common::create_test_transaction_manager;

fn txn(id: u32, isolation: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, isolation))
}

#[test]
fn test_shared_locks_are_compatible() {
    let lock_manager = LockManager::new();
    let rid = Rid::new(1, 1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();
    lock_manager.lock_shared(&t2, rid).unwrap();

    assert!(t1.is_shared_locked(&rid));
    assert!(t2.is_shared_locked(&rid));

    assert!(lock_manager.unlock(&t1, rid));
    assert!(lock_manager.unlock(&t2, rid));
}

#[test]
fn test_unlock_without_lock_returns_false() {
    let lock_manager = LockManager::new();
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    assert!(!lock_manager.unlock(&t1, Rid::new(1, 1)));
}

#[test]
fn test_lock_shared_on_read_uncommitted_aborts() {
    let lock_manager = LockManager::new();
    let t1 = txn(1, IsolationLevel::ReadUncommitted);

    let err = lock_manager.lock_shared(&t1, Rid::new(1, 1)).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
    assert_eq!(t1.state(), TransactionState::Aborted);
}

// An exclusive request from a younger transaction blocks behind a granted
// shared lock and is admitted once the share is released.
#[test]
fn test_exclusive_waits_for_shared_release() {
    let lock_manager = Arc::new(LockManager::new());
    let rid = Rid::new(2, 3);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();

    let waiter = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t2, rid))
    };

    // Give the writer time to park.
    thread::sleep(Duration::from_millis(50));
    assert!(!t2.is_exclusive_locked(&rid));

    assert!(lock_manager.unlock(&t1, rid));
    waiter.join().unwrap().unwrap();
    assert!(t2.is_exclusive_locked(&rid));
    assert!(lock_manager.unlock(&t2, rid));
}

// A shared request must not overtake a queued exclusive request: with S(T1)
// granted and X(T2) waiting, a later S(T3) parks until T2 is done.
#[test]
fn test_shared_does_not_starve_queued_exclusive() {
    let lock_manager = Arc::new(LockManager::new());
    let rid = Rid::new(2, 4);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);
    let t3 = txn(3, IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();

    let writer = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t2, rid))
    };
    thread::sleep(Duration::from_millis(50));

    let reader = {
        let lock_manager = lock_manager.clone();
        let t3 = t3.clone();
        thread::spawn(move || lock_manager.lock_shared(&t3, rid))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!t3.is_shared_locked(&rid), "late reader overtook the writer");

    assert!(lock_manager.unlock(&t1, rid));
    writer.join().unwrap().unwrap();
    assert!(t2.is_exclusive_locked(&rid));

    assert!(lock_manager.unlock(&t2, rid));
    reader.join().unwrap().unwrap();
    assert!(t3.is_shared_locked(&rid));
    assert!(lock_manager.unlock(&t3, rid));
}

#[test]
fn test_upgrade_converts_shared_to_exclusive() {
    let lock_manager = LockManager::new();
    let rid = Rid::new(3, 1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&t1, rid).unwrap();
    lock_manager.lock_upgrade(&t1, rid).unwrap();

    assert!(!t1.is_shared_locked(&rid));
    assert!(t1.is_exclusive_locked(&rid));
    assert!(lock_manager.unlock(&t1, rid));
}

// Scenario S5: T1 (id 1) holds S; T2 (id 2) waits for X; T0 (id 0, oldest)
// requests X, wounds both, and takes the lock.
#[test]
fn test_wound_wait_older_aborts_younger() {
    let lock_manager = Arc::new(LockManager::new());
    let rid = Rid::new(4, 2);

    let t0 = txn(0, IsolationLevel::RepeatableRead);
    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();

    let younger_writer = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t2, rid))
    };
    thread::sleep(Duration::from_millis(50));

    lock_manager.lock_exclusive(&t0, rid).unwrap();
    assert!(t0.is_exclusive_locked(&rid));

    // T1 was wounded while holding its share; T2 was wounded while parked
    // and its call surfaces DEADLOCK.
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert!(!t1.is_shared_locked(&rid));
    let err = younger_writer.join().unwrap().unwrap_err();
    assert_eq!(err.reason, AbortReason::Deadlock);
    assert_eq!(t2.state(), TransactionState::Aborted);

    assert!(lock_manager.unlock(&t0, rid));
}

// A younger requester never wounds an older holder; it waits.
#[test]
fn test_younger_requester_waits_for_older_holder() {
    let lock_manager = Arc::new(LockManager::new());
    let rid = Rid::new(4, 3);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    lock_manager.lock_shared(&t1, rid).unwrap();

    let younger = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t2, rid))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(t1.state(), TransactionState::Growing);

    assert!(lock_manager.unlock(&t1, rid));
    younger.join().unwrap().unwrap();
    assert!(lock_manager.unlock(&t2, rid));
}

// Scenario S6 under REPEATABLE_READ: the first unlock starts the shrinking
// phase and later lock calls abort.
#[test]
fn test_2pl_shrinking_under_repeatable_read() {
    let lock_manager = LockManager::new();
    let r1 = Rid::new(5, 1);
    let r2 = Rid::new(5, 2);
    let r3 = Rid::new(5, 3);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&t1, r1).unwrap();
    lock_manager.lock_shared(&t1, r2).unwrap();

    assert!(lock_manager.unlock(&t1, r1));
    assert_eq!(t1.state(), TransactionState::Shrinking);

    let err = lock_manager.lock_shared(&t1, r3).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    assert_eq!(t1.state(), TransactionState::Aborted);
}

// Scenario S6 under READ_COMMITTED: releasing a shared lock early keeps the
// transaction growing.
#[test]
fn test_read_committed_shared_release_stays_growing() {
    let lock_manager = LockManager::new();
    let r1 = Rid::new(6, 1);
    let r2 = Rid::new(6, 2);
    let r3 = Rid::new(6, 3);

    let t1 = txn(1, IsolationLevel::ReadCommitted);
    lock_manager.lock_shared(&t1, r1).unwrap();
    lock_manager.lock_shared(&t1, r2).unwrap();

    assert!(lock_manager.unlock(&t1, r1));
    assert_eq!(t1.state(), TransactionState::Growing);

    lock_manager.lock_shared(&t1, r3).unwrap();
    assert_eq!(t1.state(), TransactionState::Growing);

    // Releasing an exclusive lock shrinks even under read committed.
    let r4 = Rid::new(6, 4);
    lock_manager.lock_exclusive(&t1, r4).unwrap();
    assert!(lock_manager.unlock(&t1, r4));
    assert_eq!(t1.state(), TransactionState::Shrinking);
}

// Safety: a second exclusive request parks until the first holder lets go.
#[test]
fn test_exclusive_blocks_exclusive() {
    let lock_manager = Arc::new(LockManager::new());
    let rid = Rid::new(7, 1);

    let t1 = txn(1, IsolationLevel::RepeatableRead);
    let t2 = txn(2, IsolationLevel::RepeatableRead);

    lock_manager.lock_exclusive(&t1, rid).unwrap();

    let waiter = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&t2, rid))
    };
    thread::sleep(Duration::from_millis(50));
    // Younger writer waits; at no point are both granted.
    assert!(!t2.is_exclusive_locked(&rid));
    assert!(t1.is_exclusive_locked(&rid));

    assert!(lock_manager.unlock(&t1, rid));
    waiter.join().unwrap().unwrap();
    assert!(t2.is_exclusive_locked(&rid));
    assert!(lock_manager.unlock(&t2, rid));
}

#[test]
fn test_transaction_manager_releases_locks_on_commit() -> Result<()> {
    let (txn_manager, lock_manager, _log_file) = create_test_transaction_manager()?;
    let rid = Rid::new(8, 1);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    lock_manager.lock_exclusive(&t1, rid).unwrap();
    assert_eq!(txn_manager.active_count(), 1);

    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead)?;
    let waiter = {
        let lock_manager = lock_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || lock_manager.lock_shared(&t2, rid))
    };
    thread::sleep(Duration::from_millis(50));

    // Commit releases T1's exclusive lock and unblocks the reader.
    txn_manager.commit(&t1)?;
    assert_eq!(t1.state(), TransactionState::Committed);
    waiter.join().unwrap().unwrap();
    assert!(t2.is_shared_locked(&rid));

    txn_manager.commit(&t2)?;
    assert_eq!(txn_manager.active_count(), 0);

    // Finished transactions cannot commit again.
    assert!(txn_manager.commit(&t1).is_err());

    Ok(())
}

#[test]
fn test_transaction_manager_abort_releases_locks() -> Result<()> {
    let (txn_manager, lock_manager, _log_file) = create_test_transaction_manager()?;
    let rid = Rid::new(8, 2);

    let t1 = txn_manager.begin(IsolationLevel::ReadCommitted)?;
    lock_manager.lock_exclusive(&t1, rid).unwrap();

    txn_manager.abort(&t1)?;
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert!(!t1.is_exclusive_locked(&rid));

    // The rid is free again.
    let t2 = txn_manager.begin(IsolationLevel::ReadCommitted)?;
    lock_manager.lock_exclusive(&t2, rid).unwrap();
    txn_manager.commit(&t2)?;

    Ok(())
}
