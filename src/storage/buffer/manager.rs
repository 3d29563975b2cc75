use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::common::types::{Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_manager::LogManager;

/// Bookkeeping guarded by the pool latch. Every public operation takes this
/// latch for its whole critical section, so a page ID is resident in at most
/// one frame and a fetch miss never exposes a half-read frame.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// One buffer pool instance.
///
/// Owns a fixed set of frames and mediates all access between on-disk pages
/// and in-memory frames. When the instance is one shard of a parallel pool
/// it only allocates page IDs congruent to its index modulo the instance
/// count.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<FramePtr>,
    latch: Mutex<PoolState>,
    replacer: LRUReplacer,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    /// Create a standalone buffer pool over its own database file
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::new_instance(pool_size, 1, 0, disk_manager, None))
    }

    /// Create one instance of a (possibly parallel) buffer pool.
    /// `instance_index` must be below `num_instances`.
    pub fn new_instance(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(num_instances > 0, "buffer pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let frame = Frame::new(frame_id, Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(Arc::new(RwLock::new(frame)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            latch: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index,
            }),
            replacer: LRUReplacer::new(pool_size),
            disk_manager,
            log_manager,
        }
    }

    /// Number of frames in this instance
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a new page and return a pinned view of its zeroed frame.
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.latch.lock();

        // Secure a frame before burning a page ID.
        let frame_id = self.find_free_frame(&mut state)?;
        let page_id = self.allocate_page(&mut state);

        let frame = &self.frames[frame_id as usize];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                page_guard.reset();
                page_guard.page_id = page_id;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }

        state.page_table.insert(page_id, frame_id);

        let page = frame.read().page.clone();
        Ok((page, page_id))
    }

    /// Fetch a page, reading it from disk on a miss. The returned view is
    /// pinned until the caller unpins it.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page ID".to_string(),
            ));
        }

        let mut state = self.latch.lock();

        // Hit: pin and return.
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id as usize];
            {
                let mut frame_guard = frame.write();
                frame_guard.pin_count += 1;
            }
            self.replacer.pin(frame_id);
            let page = frame.read().page.clone();
            return Ok(page);
        }

        // Miss: evict somebody, then read from disk before handing the
        // frame out.
        let frame_id = self.find_free_frame(&mut state)?;

        let frame = &self.frames[frame_id as usize];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                self.disk_manager.read_page(page_id, &mut page_guard)?;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }
        state.page_table.insert(page_id, frame_id);

        let page = frame.read().page.clone();
        Ok(page)
    }

    /// Drop one pin on a page, recording whether the caller modified it.
    /// The dirty bit only rises here; it falls when the page is written back.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let state = self.latch.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();

        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        if is_dirty {
            frame_guard.is_dirty = true;
        }
        frame_guard.pin_count -= 1;

        if frame_guard.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and mark it clean. Does not evict.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let state = self.latch.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        self.write_back(frame_id)?;
        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let state = self.latch.lock();

        let frame_ids: Vec<FrameId> = state.page_table.values().copied().collect();
        for frame_id in frame_ids {
            self.write_back(frame_id)?;
        }
        Ok(())
    }

    /// Delete a page. Fails if the page is pinned; a non-resident page is
    /// deallocated at the disk level and reported as success.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.latch.lock();

        self.disk_manager.deallocate_page(page_id)?;

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id as usize];
        {
            let mut frame_guard = frame.write();
            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            frame_guard.page.write().reset();
            frame_guard.is_dirty = false;
        }

        state.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);

        Ok(())
    }

    /// Next page ID for this shard; stride keeps ids congruent to the
    /// instance index.
    fn allocate_page(&self, state: &mut MutexGuard<'_, PoolState>) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances;
        assert_eq!(
            page_id % self.num_instances,
            self.instance_index,
            "page id {} escaped instance {} of {}",
            page_id,
            self.instance_index,
            self.num_instances
        );
        page_id
    }

    /// Pick a frame for reuse: free list first, then an LRU victim, which is
    /// written back if dirty and unmapped from its old page.
    fn find_free_frame(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
    ) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim_id = match self.replacer.victim() {
            Some(id) => id,
            None => return Err(BufferPoolError::BufferPoolFull),
        };

        let frame = &self.frames[victim_id as usize];
        let old_page_id;
        let dirty;
        {
            let frame_guard = frame.read();
            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::BufferPoolFull);
            }
            old_page_id = frame_guard.page.read().page_id;
            dirty = frame_guard.is_dirty;
        }

        if dirty {
            self.write_back(victim_id)?;
        }

        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }

        Ok(victim_id)
    }

    /// Write one frame's page to disk and clear the dirty bit. The WAL is
    /// flushed up to the page's LSN first, so the log never lags the data it
    /// describes.
    fn write_back(&self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();

        let page_guard = frame_guard.page.read();
        if let Some(log_manager) = &self.log_manager {
            log_manager.flush_till_lsn(page_guard.lsn)?;
        }
        self.disk_manager.write_page(&page_guard)?;
        drop(page_guard);

        frame_guard.is_dirty = false;
        Ok(())
    }
}
