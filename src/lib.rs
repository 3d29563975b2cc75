// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::hash::ExtendibleHashIndex;
pub use storage::buffer::{BufferPoolError, BufferPoolManager, ParallelBufferPoolManager};
pub use storage::page::{PageError, PageManager};
pub use transaction::{
    IsolationLevel, LockManager, LogManager, Transaction, TransactionManager,
};
