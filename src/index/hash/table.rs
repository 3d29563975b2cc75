use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PagePtr};
use crate::index::hash::bucket::{bucket_array_size, HashBucketPage};
use crate::index::hash::directory::{HashDirectoryPage, MAX_DEPTH};
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::concurrency::transaction::Transaction;

/// Extendible hash index: one directory page fanning out to bucket pages,
/// all served by the buffer pool.
///
/// `C` compares keys for equality; `H` hashes a key to 64 bits, downcast to
/// 32 bits for directory addressing. Search and plain insert/remove run
/// under a read latch; structural changes (split, merge, directory resize)
/// take the table write latch.
pub struct ExtendibleHashIndex<K, V, C, H> {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    comparator: C,
    hash_fn: H,
    table_latch: RwLock<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, H> ExtendibleHashIndex<K, V, C, H>
where
    K: Serialize + DeserializeOwned + Default + Clone,
    V: Serialize + DeserializeOwned + Default + Clone + PartialEq,
    C: Fn(&K, &K) -> bool,
    H: Fn(&K) -> u64,
{
    /// Create an index with two fresh buckets of local depth 1 behind a new
    /// directory page
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
        hash_fn: H,
    ) -> Result<Self, HashIndexError> {
        let (directory_page, directory_page_id) = buffer_pool.new_page()?;
        let (_bucket0_page, bucket0_page_id) = buffer_pool.new_page()?;
        let (_bucket1_page, bucket1_page_id) = buffer_pool.new_page()?;

        let mut directory = HashDirectoryPage::new(directory_page_id);
        directory.set_bucket_page_id(0, bucket0_page_id);
        directory.set_local_depth(0, 1);
        directory.set_bucket_page_id(1, bucket1_page_id);
        directory.set_local_depth(1, 1);
        directory.incr_global_depth();

        {
            let mut page_guard = directory_page.write();
            directory.to_page(&mut page_guard);
        }
        buffer_pool.unpin_page(directory_page_id, true)?;
        // A zeroed page already decodes as an empty bucket.
        buffer_pool.unpin_page(bucket0_page_id, false)?;
        buffer_pool.unpin_page(bucket1_page_id, false)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            comparator,
            hash_fn,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Look up every value stored under `key`
    pub fn get_value(&self, _txn: &Transaction, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _read_latch = self.table_latch.read();

        let directory = self.read_directory()?;
        let bucket_page_id = directory.bucket_page_id(self.key_to_index(key, &directory));
        let bucket = self.read_bucket(bucket_page_id)?;

        Ok(bucket.get_value(key, &self.comparator))
    }

    /// Insert a (key, value) pair, splitting the target bucket as needed.
    /// Returns false for a duplicate pair, and when the pair cannot be
    /// placed because every key in its bucket collides through `MAX_DEPTH`
    /// hash bits.
    pub fn insert(&self, txn: &Transaction, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _read_latch = self.table_latch.read();

            let directory = self.read_directory()?;
            let bucket_page_id = directory.bucket_page_id(self.key_to_index(key, &directory));

            // The page write guard is held across the whole decode-modify-
            // encode so concurrent mutators of one bucket serialize on the
            // page, the way readers and writers of any shared page do.
            let page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut page_guard = page.write();
            let mut bucket = HashBucketPage::<K, V>::from_page(&page_guard)?;

            if !bucket.is_full() {
                let inserted = bucket.insert(key.clone(), value.clone(), &self.comparator);
                if inserted {
                    bucket.to_page(&mut page_guard)?;
                }
                drop(page_guard);
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                return Ok(inserted);
            }

            drop(page_guard);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
        }
        self.split_insert(txn, key, value)
    }

    /// Remove a (key, value) pair; an emptied bucket triggers a merge pass
    pub fn remove(&self, txn: &Transaction, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let emptied = {
            let _read_latch = self.table_latch.read();

            let directory = self.read_directory()?;
            let bucket_page_id = directory.bucket_page_id(self.key_to_index(key, &directory));

            let page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut page_guard = page.write();
            let mut bucket = HashBucketPage::<K, V>::from_page(&page_guard)?;

            let removed = bucket.remove(key, value, &self.comparator);
            if removed {
                bucket.to_page(&mut page_guard)?;
            }
            drop(page_guard);
            self.buffer_pool.unpin_page(bucket_page_id, removed)?;

            if !removed {
                return Ok(false);
            }
            bucket.is_empty()
        };

        if emptied {
            self.merge(txn)?;
        }
        Ok(true)
    }

    pub fn get_global_depth(&self) -> Result<u32, HashIndexError> {
        let _read_latch = self.table_latch.read();
        Ok(self.read_directory()?.global_depth())
    }

    /// Fatal check of the directory's slot-equivalence invariant
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _read_latch = self.table_latch.read();
        self.read_directory()?.verify_integrity();
        Ok(())
    }

    /// Split the target bucket until the incoming pair fits, growing the
    /// directory when the bucket is already at global depth.
    fn split_insert(&self, _txn: &Transaction, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let _write_latch = self.table_latch.write();

        loop {
            let mut directory = self.read_directory()?;
            let idx = self.key_to_index(key, &directory);
            let bucket_page_id = directory.bucket_page_id(idx);
            let mut bucket = self.read_bucket(bucket_page_id)?;

            if !bucket.is_full() {
                let inserted = bucket.insert(key.clone(), value.clone(), &self.comparator);
                if inserted {
                    self.write_bucket(bucket_page_id, &bucket)?;
                }
                return Ok(inserted);
            }

            let old_depth = directory.local_depth(idx) as u32;
            if old_depth >= MAX_DEPTH {
                warn!(
                    "bucket page {} not splittable past depth {}",
                    bucket_page_id, MAX_DEPTH
                );
                return Ok(false);
            }
            if old_depth == directory.global_depth() {
                directory.grow();
            }

            let new_depth = (old_depth + 1) as u8;
            let image_idx = idx ^ (1 << (new_depth - 1));
            let (image_page, image_page_id) = self.buffer_pool.new_page()?;

            // Every slot aliasing the overflowing bucket moves to the new
            // depth; the half on the image side is rebound to the new page.
            let split_bit = 1usize << (new_depth - 1);
            for slot in 0..directory.size() {
                if directory.bucket_page_id(slot) != bucket_page_id {
                    continue;
                }
                directory.set_local_depth(slot, new_depth);
                if slot & split_bit == image_idx & split_bit {
                    directory.set_bucket_page_id(slot, image_page_id);
                }
            }

            // Rebuild both halves with a full scan: tombstones from earlier
            // removals must not stop the walk, and the surviving bucket
            // comes out compacted.
            let mut kept = HashBucketPage::<K, V>::new();
            let mut image = HashBucketPage::<K, V>::new();
            let local_mask = (1u32 << new_depth) - 1;
            let image_bits = image_idx as u32 & local_mask;
            for slot in 0..bucket_array_size::<K, V>() {
                if !bucket.is_readable(slot) {
                    continue;
                }
                let slot_key = bucket.key_at(slot).clone();
                let slot_value = bucket.value_at(slot).clone();
                if self.hash(&slot_key) & local_mask == image_bits {
                    image.insert(slot_key, slot_value, &self.comparator);
                } else {
                    kept.insert(slot_key, slot_value, &self.comparator);
                }
            }

            {
                let mut page_guard = image_page.write();
                image.to_page(&mut page_guard)?;
            }
            self.buffer_pool.unpin_page(image_page_id, true)?;
            self.write_bucket(bucket_page_id, &kept)?;
            self.write_directory(&directory)?;
        }
    }

    /// Fold empty buckets back into their split images, then shrink the
    /// directory while no slot needs its full depth.
    fn merge(&self, _txn: &Transaction) -> Result<(), HashIndexError> {
        let _write_latch = self.table_latch.write();

        loop {
            let mut directory = self.read_directory()?;
            let mut changed = false;

            for idx in 0..directory.size() {
                let local_depth = directory.local_depth(idx);
                if local_depth <= 1 {
                    continue;
                }
                let bucket_page_id = directory.bucket_page_id(idx);
                let image_idx = directory.split_image_index(idx);
                let image_page_id = directory.bucket_page_id(image_idx);
                if image_page_id == bucket_page_id {
                    continue;
                }
                if directory.local_depth(image_idx) != local_depth {
                    continue;
                }
                if !self.read_bucket(bucket_page_id)?.is_empty() {
                    continue;
                }

                let merged_depth = local_depth - 1;
                for slot in 0..directory.size() {
                    let slot_page_id = directory.bucket_page_id(slot);
                    if slot_page_id == bucket_page_id || slot_page_id == image_page_id {
                        directory.set_bucket_page_id(slot, image_page_id);
                        directory.set_local_depth(slot, merged_depth);
                    }
                }
                self.buffer_pool.delete_page(bucket_page_id)?;
                changed = true;
            }

            while directory.can_shrink() {
                directory.shrink();
                changed = true;
            }

            if !changed {
                return Ok(());
            }
            self.write_directory(&directory)?;
        }
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key) as u32
    }

    fn key_to_index(&self, key: &K, directory: &HashDirectoryPage) -> usize {
        (self.hash(key) & directory.global_depth_mask()) as usize
    }

    fn read_directory(&self) -> Result<HashDirectoryPage, HashIndexError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = HashDirectoryPage::from_page(&page.read());
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(directory)
    }

    fn write_directory(&self, directory: &HashDirectoryPage) -> Result<(), HashIndexError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        directory.to_page(&mut page.write());
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        Ok(())
    }

    fn read_bucket(&self, bucket_page_id: PageId) -> Result<HashBucketPage<K, V>, HashIndexError> {
        let page: PagePtr = self.buffer_pool.fetch_page(bucket_page_id)?;
        let bucket = HashBucketPage::from_page(&page.read());
        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        bucket
    }

    fn write_bucket(
        &self,
        bucket_page_id: PageId,
        bucket: &HashBucketPage<K, V>,
    ) -> Result<(), HashIndexError> {
        let page = self.buffer_pool.fetch_page(bucket_page_id)?;
        bucket.to_page(&mut page.write())?;
        self.buffer_pool.unpin_page(bucket_page_id, true)?;
        Ok(())
    }
}
