use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking state machine. A transaction moves from Growing to
/// Shrinking at its first lock release (with the read-committed shared-lock
/// exception) and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors from transaction lifecycle management
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Failed to write to WAL: {0}")]
    LogError(String),

    #[error("Internal transaction error: {0}")]
    InternalError(String),
}

/// An active database transaction.
///
/// Shared across threads behind an `Arc`: the lock manager flips the state
/// of other transactions when it wounds them, so state and the owned-lock
/// sets sit behind their own locks.
pub struct Transaction {
    id: TxnId,
    state: Mutex<TransactionState>,
    isolation_level: IsolationLevel,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    prev_lsn: AtomicU64,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            state: Mutex::new(TransactionState::Growing),
            isolation_level,
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            prev_lsn: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn is_shared_locked(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: &Rid) {
        self.shared_lock_set.lock().remove(rid);
    }

    pub fn remove_exclusive_lock(&self, rid: &Rid) {
        self.exclusive_lock_set.lock().remove(rid);
    }

    /// Snapshot of every rid this transaction holds a lock on
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    /// Last LSN written for this transaction
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
        assert_eq!(txn.prev_lsn(), 0);
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        let rid = Rid::new(4, 7);

        txn.add_shared_lock(rid);
        assert!(txn.is_shared_locked(&rid));
        assert!(!txn.is_exclusive_locked(&rid));

        txn.remove_shared_lock(&rid);
        txn.add_exclusive_lock(rid);
        assert!(txn.is_exclusive_locked(&rid));
        assert_eq!(txn.locked_rids(), vec![rid]);
    }
}
