use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, TxnId};
use crate::transaction::wal::log_record::{LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to encode log record: {0}")]
    EncodeError(String),
}

struct LogState {
    log_file: File,
    buffer: Vec<u8>,
    next_lsn: Lsn,
    flushed_lsn: Lsn,
}

/// Append-only write-ahead log.
///
/// Records accumulate in an in-memory buffer; `flush` pushes them to disk.
/// The buffer pool calls `flush_till_lsn` before writing back a dirty page
/// so no page version reaches disk ahead of the log that describes it.
/// There is no recovery pass; the log is the durability hook only.
pub struct LogManager {
    state: Mutex<LogState>,
}

impl LogManager {
    pub fn new(log_path: impl AsRef<Path>) -> Result<Self, LogManagerError> {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            state: Mutex::new(LogState {
                log_file,
                buffer: Vec::new(),
                next_lsn: 1,
                flushed_lsn: 0,
            }),
        })
    }

    /// Append one record and return its LSN. Records are length-prefixed in
    /// the buffer.
    pub fn append_record(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
    ) -> Result<Lsn, LogManagerError> {
        let mut state = self.state.lock();

        let lsn = state.next_lsn;
        state.next_lsn += 1;

        let record = LogRecord::new(lsn, txn_id, prev_lsn, record_type);
        let encoded = bincode::serialize(&record)
            .map_err(|e| LogManagerError::EncodeError(e.to_string()))?;

        let mut length_prefix = [0u8; 4];
        LittleEndian::write_u32(&mut length_prefix, encoded.len() as u32);
        state.buffer.extend_from_slice(&length_prefix);
        state.buffer.extend_from_slice(&encoded);

        Ok(lsn)
    }

    /// Write the buffered records to the log file and sync
    pub fn flush(&self) -> Result<(), LogManagerError> {
        let mut state = self.state.lock();
        Self::flush_locked(&mut state)
    }

    /// Ensure every record up to `lsn` is on disk
    pub fn flush_till_lsn(&self, lsn: Lsn) -> Result<(), LogManagerError> {
        let mut state = self.state.lock();
        if state.flushed_lsn >= lsn {
            return Ok(());
        }
        Self::flush_locked(&mut state)
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.state.lock().flushed_lsn
    }

    fn flush_locked(state: &mut LogState) -> Result<(), LogManagerError> {
        if state.buffer.is_empty() {
            state.flushed_lsn = state.next_lsn - 1;
            return Ok(());
        }

        let buffer = std::mem::take(&mut state.buffer);
        state.log_file.write_all(&buffer)?;
        state.log_file.sync_data()?;
        state.flushed_lsn = state.next_lsn - 1;
        Ok(())
    }
}
