use serde::{Deserialize, Serialize};

use crate::common::types::{Lsn, TxnId};

/// Kinds of transaction lifecycle records the log carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
}

/// One write-ahead log record. Records of a transaction are chained through
/// `prev_lsn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
}

impl LogRecord {
    pub fn new(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType) -> Self {
        Self {
            lsn,
            txn_id,
            prev_lsn,
            record_type,
        }
    }
}
