use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

/// A pool of independent buffer pool instances partitioning the page ID
/// space by `page_id % num_instances`. Each call routes to exactly one
/// instance; there is no cross-instance locking and no shared frames.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    /// Rotating start index so `new_page` spreads load across instances
    next_instance: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    /// Create `num_instances` shards of `pool_size` frames each over one
    /// shared database file
    pub fn new(
        num_instances: u32,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::new_with_disk_manager(num_instances, pool_size, disk_manager, None))
    }

    pub fn new_with_disk_manager(
        num_instances: u32,
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(num_instances > 0, "parallel pool needs at least one instance");

        let instances = (0..num_instances)
            .map(|index| {
                Arc::new(BufferPoolManager::new_instance(
                    pool_size,
                    num_instances,
                    index,
                    disk_manager.clone(),
                    log_manager.clone(),
                ))
            })
            .collect();

        Self {
            instances,
            next_instance: Mutex::new(0),
        }
    }

    /// Frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// Create a new page on some instance. Starts at a rotating cursor and
    /// gives every instance one chance, so one full shard does not fail the
    /// whole pool.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let start = {
            let mut cursor = self.next_instance.lock();
            let start = *cursor;
            *cursor = (*cursor + 1) % self.instances.len();
            start
        };

        for offset in 0..self.instances.len() {
            let instance = &self.instances[(start + offset) % self.instances.len()];
            match instance.new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::BufferPoolFull)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }
}
