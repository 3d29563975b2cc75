use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use altaidb::storage::buffer::{BufferPoolManager, ParallelBufferPoolManager};
use altaidb::transaction::concurrency::lock_manager::LockManager;
use altaidb::transaction::concurrency::transaction::{IsolationLevel, Transaction};
use altaidb::transaction::concurrency::transaction_manager::TransactionManager;
use altaidb::transaction::wal::log_manager::LogManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a parallel buffer pool sharing one temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: u32,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let pool = Arc::new(ParallelBufferPoolManager::new(num_instances, pool_size, path)?);
    Ok((pool, file))
}

// A transaction with no manager behind it, for exercising storage and index
// paths directly
#[allow(dead_code)]
pub fn create_test_transaction(txn_id: u32) -> Arc<Transaction> {
    Arc::new(Transaction::new(txn_id, IsolationLevel::RepeatableRead))
}

// Lock manager plus transaction manager over a temporary log file
#[allow(dead_code)]
pub fn create_test_transaction_manager(
) -> Result<(Arc<TransactionManager>, Arc<LockManager>, NamedTempFile)> {
    let log_file = NamedTempFile::new()?;
    let log_manager = Arc::new(LogManager::new(log_file.path())?);
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new(log_manager, lock_manager.clone()));
    Ok((txn_manager, lock_manager, log_file))
}
