use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Why a lock call aborted its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::LockOnShrinking => "lock acquired while shrinking",
            AbortReason::LockSharedOnReadUncommitted => "shared lock under read uncommitted",
            AbortReason::UpgradeConflict => "another upgrade is in progress",
            AbortReason::Deadlock => "wounded by an older transaction",
        };
        write!(f, "{}", text)
    }
}

/// Structured failure of a lock call. The transaction's state is already
/// ABORTED when this is raised.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbortError {
    fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: false,
        }
    }
}

/// Per-rid request queue. `refcount` counts granted shared holders,
/// `waiting` is true while an exclusive lock is granted, `upgrading` admits
/// at most one in-flight upgrade. Waiters park on `cv` under the manager's
/// latch.
#[derive(Default)]
struct LockRequestQueue {
    queue: VecDeque<LockRequest>,
    refcount: u32,
    waiting: bool,
    upgrading: bool,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn find_mut(&mut self, txn_id: TxnId) -> Option<&mut LockRequest> {
        self.queue.iter_mut().find(|request| request.txn_id == txn_id)
    }

    /// Erase this transaction's request, returning it. A miss is reported,
    /// not papered over.
    fn remove(&mut self, txn_id: TxnId) -> Option<LockRequest> {
        let position = self.queue.iter().position(|request| request.txn_id == txn_id)?;
        self.queue.remove(position)
    }
}

struct LockTables {
    queues: HashMap<Rid, LockRequestQueue>,
    /// Live transactions by id, for cross-transaction wounding
    txns: HashMap<TxnId, Arc<Transaction>>,
}

/// Two-phase-locking lock manager over rid-granular shared/exclusive locks.
///
/// One latch serializes the tables and doubles as the condition-variable
/// mutex. Deadlocks are prevented with wound-wait: an older transaction
/// aborts every younger one whose request on the rid conflicts with its
/// own; a younger requester waits.
pub struct LockManager {
    latch: Mutex<LockTables>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(LockTables {
                queues: HashMap::new(),
                txns: HashMap::new(),
            }),
        }
    }

    /// Acquire a shared lock on `rid`, blocking while an exclusive lock is
    /// granted or queued ahead
    pub fn lock_shared(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let txn_id = txn.id();
        let mut tables = self.latch.lock();
        tables.txns.insert(txn_id, txn.clone());

        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn_id,
                AbortReason::LockSharedOnReadUncommitted,
            ));
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(txn_id, AbortReason::LockOnShrinking));
        }

        {
            let LockTables { queues, txns } = &mut *tables;
            let queue = queues.entry(rid).or_default();
            queue.queue.push_back(LockRequest::new(txn_id, LockMode::Shared));
            if Self::wound_younger(queue, txns, &rid, txn_id, LockMode::Shared) {
                queue.cv.notify_all();
            }
        }

        let cv = self.queue_cv(&mut tables, &rid);
        loop {
            let aborted = txn.state() == TransactionState::Aborted;
            {
                let queue = Self::queue_mut(&mut tables, &rid);
                if aborted {
                    queue.remove(txn_id);
                    // Our request may have been the one blocking others.
                    queue.cv.notify_all();
                    return Err(TransactionAbortError::new(txn_id, AbortReason::Deadlock));
                }
                if Self::shared_admissible(queue, txn_id) {
                    queue.refcount += 1;
                    if let Some(request) = queue.find_mut(txn_id) {
                        request.granted = true;
                    }
                    txn.add_shared_lock(rid);
                    return Ok(());
                }
            }
            cv.wait(&mut tables);
        }
    }

    /// Acquire an exclusive lock on `rid`, blocking while any lock is
    /// granted or any older request is queued ahead
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let txn_id = txn.id();
        let mut tables = self.latch.lock();
        tables.txns.insert(txn_id, txn.clone());

        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(txn_id, AbortReason::LockOnShrinking));
        }

        {
            let LockTables { queues, txns } = &mut *tables;
            let queue = queues.entry(rid).or_default();
            queue.queue.push_back(LockRequest::new(txn_id, LockMode::Exclusive));
            if Self::wound_younger(queue, txns, &rid, txn_id, LockMode::Exclusive) {
                queue.cv.notify_all();
            }
        }

        let cv = self.queue_cv(&mut tables, &rid);
        loop {
            let aborted = txn.state() == TransactionState::Aborted;
            {
                let queue = Self::queue_mut(&mut tables, &rid);
                if aborted {
                    queue.remove(txn_id);
                    queue.cv.notify_all();
                    return Err(TransactionAbortError::new(txn_id, AbortReason::Deadlock));
                }
                if Self::exclusive_admissible(queue, txn_id) {
                    queue.waiting = true;
                    if let Some(request) = queue.find_mut(txn_id) {
                        request.granted = true;
                    }
                    txn.add_exclusive_lock(rid);
                    return Ok(());
                }
            }
            cv.wait(&mut tables);
        }
    }

    /// Convert this transaction's granted shared lock into an exclusive
    /// one. At most one upgrade may be in flight per rid.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let txn_id = txn.id();
        let mut tables = self.latch.lock();
        tables.txns.insert(txn_id, txn.clone());

        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(txn_id, AbortReason::LockOnShrinking));
        }
        assert!(
            txn.is_shared_locked(&rid),
            "transaction {} upgrading rid it holds no shared lock on",
            txn_id
        );

        {
            let LockTables { queues, txns } = &mut *tables;
            let queue = Self::queue_mut_of(queues, &rid);
            if queue.upgrading {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionAbortError::new(txn_id, AbortReason::UpgradeConflict));
            }

            // Our own shared grant steps aside before we look at the rest.
            txn.remove_shared_lock(&rid);
            queue.refcount -= 1;
            if let Some(request) = queue.find_mut(txn_id) {
                request.mode = LockMode::Exclusive;
                request.granted = false;
            }
            queue.upgrading = true;

            if Self::wound_younger(queue, txns, &rid, txn_id, LockMode::Exclusive) {
                queue.cv.notify_all();
            }
        }

        let cv = self.queue_cv(&mut tables, &rid);
        loop {
            let aborted = txn.state() == TransactionState::Aborted;
            {
                let queue = Self::queue_mut(&mut tables, &rid);
                if aborted {
                    queue.remove(txn_id);
                    queue.upgrading = false;
                    queue.cv.notify_all();
                    return Err(TransactionAbortError::new(txn_id, AbortReason::Deadlock));
                }
                // The upgrade jumps the queue: it only needs the rid free.
                if !queue.waiting && queue.refcount == 0 {
                    queue.upgrading = false;
                    queue.waiting = true;
                    if let Some(request) = queue.find_mut(txn_id) {
                        request.granted = true;
                    }
                    txn.add_exclusive_lock(rid);
                    return Ok(());
                }
            }
            cv.wait(&mut tables);
        }
    }

    /// Release this transaction's granted lock on `rid`. Returns false when
    /// no granted request matches.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let txn_id = txn.id();
        let mut tables = self.latch.lock();

        let queue = match tables.queues.get_mut(&rid) {
            Some(queue) => queue,
            None => return false,
        };

        let granted = queue
            .queue
            .iter()
            .any(|request| request.txn_id == txn_id && request.granted);
        if !granted {
            return false;
        }
        let request = match queue.remove(txn_id) {
            Some(request) => request,
            None => return false,
        };

        txn.remove_shared_lock(&rid);
        txn.remove_exclusive_lock(&rid);

        // 2PL transition; shared locks under read committed release early
        // without starting the shrinking phase.
        if txn.state() == TransactionState::Growing
            && !(request.mode == LockMode::Shared
                && txn.isolation_level() == IsolationLevel::ReadCommitted)
        {
            txn.set_state(TransactionState::Shrinking);
        }

        match request.mode {
            LockMode::Shared => {
                queue.refcount -= 1;
                if queue.refcount == 0 {
                    queue.cv.notify_all();
                }
            }
            LockMode::Exclusive => {
                queue.waiting = false;
                queue.cv.notify_all();
            }
        }

        true
    }

    /// Wound-wait: abort every younger transaction whose request on this
    /// rid conflicts with `mode`. Granted victims have their grant undone
    /// and their entry released here; parked victims are woken to remove
    /// themselves and raise DEADLOCK.
    fn wound_younger(
        queue: &mut LockRequestQueue,
        txns: &HashMap<TxnId, Arc<Transaction>>,
        rid: &Rid,
        requester: TxnId,
        mode: LockMode,
    ) -> bool {
        let mut wounded = false;
        let mut kept = VecDeque::with_capacity(queue.queue.len());

        for request in std::mem::take(&mut queue.queue) {
            let conflicts = request.txn_id > requester
                && (mode == LockMode::Exclusive || request.mode == LockMode::Exclusive);
            if !conflicts {
                kept.push_back(request);
                continue;
            }

            let victim = match txns.get(&request.txn_id) {
                Some(victim) => victim,
                None => {
                    kept.push_back(request);
                    continue;
                }
            };

            debug!(
                "txn {} wounds txn {} on rid {:?}",
                requester, request.txn_id, rid
            );
            victim.set_state(TransactionState::Aborted);
            wounded = true;

            if request.granted {
                match request.mode {
                    LockMode::Shared => {
                        queue.refcount -= 1;
                        victim.remove_shared_lock(rid);
                    }
                    LockMode::Exclusive => {
                        queue.waiting = false;
                        victim.remove_exclusive_lock(rid);
                    }
                }
                // The wounder releases a granted victim's entry.
                continue;
            }
            kept.push_back(request);
        }

        queue.queue = kept;
        wounded
    }

    /// A shared request may proceed when no exclusive lock is granted and
    /// no exclusive request sits ahead of it still ungranted
    fn shared_admissible(queue: &LockRequestQueue, txn_id: TxnId) -> bool {
        if queue.waiting {
            return false;
        }
        for request in &queue.queue {
            if request.txn_id == txn_id {
                return true;
            }
            if request.mode == LockMode::Exclusive && !request.granted {
                return false;
            }
        }
        true
    }

    /// An exclusive request may proceed when the rid is free and it is the
    /// first request still waiting its turn
    fn exclusive_admissible(queue: &LockRequestQueue, txn_id: TxnId) -> bool {
        if queue.waiting || queue.refcount > 0 {
            return false;
        }
        for request in &queue.queue {
            if request.txn_id == txn_id {
                return true;
            }
            if !request.granted {
                return false;
            }
        }
        true
    }

    fn queue_mut<'a>(tables: &'a mut LockTables, rid: &Rid) -> &'a mut LockRequestQueue {
        Self::queue_mut_of(&mut tables.queues, rid)
    }

    fn queue_mut_of<'a>(
        queues: &'a mut HashMap<Rid, LockRequestQueue>,
        rid: &Rid,
    ) -> &'a mut LockRequestQueue {
        queues
            .get_mut(rid)
            .expect("lock request queue exists while a request is outstanding")
    }

    fn queue_cv(&self, tables: &mut LockTables, rid: &Rid) -> Arc<Condvar> {
        Self::queue_mut_of(&mut tables.queues, rid).cv.clone()
    }
}
