use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecordType;

/// Creates and tracks transactions, writes their lifecycle log records, and
/// returns their locks on commit or abort.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            log_manager,
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level
    pub fn begin(
        &self,
        isolation_level: IsolationLevel,
    ) -> Result<Arc<Transaction>, TransactionError> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        let lsn = self
            .log_manager
            .append_record(txn_id, 0, LogRecordType::Begin)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_prev_lsn(lsn);

        self.active_transactions.lock().insert(txn_id, txn.clone());
        Ok(txn)
    }

    /// Commit: log, force the log to disk, release every lock
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        let txn_id = txn.id();
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            _ => return Err(TransactionError::InvalidState(txn_id)),
        }

        let lsn = self
            .log_manager
            .append_record(txn_id, txn.prev_lsn(), LogRecordType::Commit)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_prev_lsn(lsn);
        self.log_manager
            .flush()
            .map_err(|e| TransactionError::LogError(e.to_string()))?;

        txn.set_state(TransactionState::Committed);
        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn_id);
        Ok(())
    }

    /// Abort: log, release every lock. Also the way a wounded transaction
    /// is wound down once its thread observes the abortion.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        let txn_id = txn.id();
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn_id));
        }

        let lsn = self
            .log_manager
            .append_record(txn_id, txn.prev_lsn(), LogRecordType::Abort)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_prev_lsn(lsn);

        txn.set_state(TransactionState::Aborted);
        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn_id);
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.active_transactions.lock().len()
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
