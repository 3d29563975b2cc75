use std::mem::size_of;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::hash::error::HashIndexError;

/// Slack kept free so the slot array and the trailing bitmaps never collide
/// after rounding.
const BUCKET_RESERVE: usize = 16;

/// Number of (key, value) slots in one bucket page. Each pair costs its own
/// bytes plus two bits, one per bitmap.
pub const fn bucket_array_size<K, V>() -> usize {
    (4 * (PAGE_SIZE - BUCKET_RESERVE)) / (4 * size_of::<(K, V)>() + 1)
}

const fn bitmap_bytes<K, V>() -> usize {
    (bucket_array_size::<K, V>() + 7) / 8
}

/// One bucket of the extendible hash index.
///
/// A slot has two state bits: `occupied` is set the first time a slot is
/// used and survives removal (a tombstone), `readable` marks a live pair.
/// Inserts always fill the lowest unoccupied slot, so scans may stop at the
/// first unoccupied one.
///
/// On-page layout: pairs packed at the head at a fixed stride, the two
/// bitmaps in the trailing bytes (occupied, then readable).
pub struct HashBucketPage<K, V> {
    occupied: Vec<u8>,
    readable: Vec<u8>,
    slots: Vec<(K, V)>,
}

impl<K, V> Default for HashBucketPage<K, V>
where
    K: Serialize + DeserializeOwned + Default + Clone,
    V: Serialize + DeserializeOwned + Default + Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> HashBucketPage<K, V>
where
    K: Serialize + DeserializeOwned + Default + Clone,
    V: Serialize + DeserializeOwned + Default + Clone + PartialEq,
{
    pub fn new() -> Self {
        Self {
            occupied: vec![0; bitmap_bytes::<K, V>()],
            readable: vec![0; bitmap_bytes::<K, V>()],
            slots: vec![(K::default(), V::default()); bucket_array_size::<K, V>()],
        }
    }

    /// Decode a bucket from page bytes. Only occupied slots are decoded;
    /// the rest stay at their defaults.
    pub fn from_page(page: &Page) -> Result<Self, HashIndexError> {
        let capacity = bucket_array_size::<K, V>();
        let stride = size_of::<(K, V)>();
        let bitmap_len = bitmap_bytes::<K, V>();

        let occupied = page.data[PAGE_SIZE - 2 * bitmap_len..PAGE_SIZE - bitmap_len].to_vec();
        let readable = page.data[PAGE_SIZE - bitmap_len..PAGE_SIZE].to_vec();

        let mut slots = vec![(K::default(), V::default()); capacity];
        for i in 0..capacity {
            if occupied[i / 8] & (1 << (i % 8)) == 0 {
                continue;
            }
            let at = i * stride;
            slots[i] = bincode::deserialize(&page.data[at..at + stride])
                .map_err(|e| HashIndexError::DeserializationError(e.to_string()))?;
        }

        Ok(Self {
            occupied,
            readable,
            slots,
        })
    }

    /// Encode the bucket into page bytes
    pub fn to_page(&self, page: &mut Page) -> Result<(), HashIndexError> {
        let stride = size_of::<(K, V)>();
        let bitmap_len = bitmap_bytes::<K, V>();

        for i in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(i) {
                continue;
            }
            let encoded = bincode::serialize(&self.slots[i])
                .map_err(|e| HashIndexError::SerializationError(e.to_string()))?;
            let at = i * stride;
            page.data[at..at + encoded.len()].copy_from_slice(&encoded);
        }

        page.data[PAGE_SIZE - 2 * bitmap_len..PAGE_SIZE - bitmap_len]
            .copy_from_slice(&self.occupied);
        page.data[PAGE_SIZE - bitmap_len..PAGE_SIZE].copy_from_slice(&self.readable);

        Ok(())
    }

    /// Collect the values stored under `key`
    pub fn get_value<C>(&self, key: &K, cmp: &C) -> Vec<V>
    where
        C: Fn(&K, &K) -> bool,
    {
        let mut result = Vec::new();
        for i in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && cmp(&self.slots[i].0, key) {
                result.push(self.slots[i].1.clone());
            }
        }
        result
    }

    /// Insert a pair at the lowest unoccupied slot. Rejects an exact
    /// duplicate pair and fails when no unoccupied slot is left.
    pub fn insert<C>(&mut self, key: K, value: V, cmp: &C) -> bool
    where
        C: Fn(&K, &K) -> bool,
    {
        for i in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && cmp(&self.slots[i].0, &key) && self.slots[i].1 == value {
                return false;
            }
        }

        for i in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(i) {
                self.slots[i] = (key, value);
                self.set_occupied(i);
                self.set_readable(i);
                return true;
            }
        }
        false
    }

    /// Remove a pair by tombstoning its slot. Returns false if absent.
    pub fn remove<C>(&mut self, key: &K, value: &V, cmp: &C) -> bool
    where
        C: Fn(&K, &K) -> bool,
    {
        for i in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && cmp(&self.slots[i].0, key) && &self.slots[i].1 == value {
                self.remove_at(i);
                return true;
            }
        }
        false
    }

    pub fn key_at(&self, idx: usize) -> &K {
        &self.slots[idx].0
    }

    pub fn value_at(&self, idx: usize) -> &V {
        &self.slots[idx].1
    }

    pub fn remove_at(&mut self, idx: usize) {
        self.readable[idx / 8] &= !(1 << (idx % 8));
    }

    pub fn is_occupied(&self, idx: usize) -> bool {
        self.occupied[idx / 8] & (1 << (idx % 8)) != 0
    }

    pub fn is_readable(&self, idx: usize) -> bool {
        self.readable[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_occupied(&mut self, idx: usize) {
        self.occupied[idx / 8] |= 1 << (idx % 8);
    }

    fn set_readable(&mut self, idx: usize) {
        self.readable[idx / 8] |= 1 << (idx % 8);
    }

    /// Number of live pairs
    pub fn num_readable(&self) -> usize {
        self.readable.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    /// A bucket is full when no unoccupied slot remains, live or tombstoned.
    /// Splitting rebuilds the bucket, which is what clears tombstones.
    pub fn is_full(&self) -> bool {
        (0..bucket_array_size::<K, V>()).all(|i| self.is_occupied(i))
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }
}
