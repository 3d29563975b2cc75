use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Tracks the frames that are candidates for eviction, in the order their
/// pin count last dropped to zero. The head of the map is the coldest frame.
pub struct LRUReplacer {
    capacity: usize,
    lru_map: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LRUReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lru_map: Mutex::new(LinkedHashMap::with_capacity(capacity)),
        }
    }

    /// Record that a frame became evictable. Idempotent: a frame already in
    /// the replacer keeps its position. Overflowing the capacity silently
    /// drops the coldest entry.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut lru_map = self.lru_map.lock();
        if lru_map.contains_key(&frame_id) {
            return;
        }
        lru_map.insert(frame_id, ());
        if lru_map.len() > self.capacity {
            lru_map.pop_front();
        }
    }

    /// Remove a frame from the eviction candidates, if present
    pub fn pin(&self, frame_id: FrameId) {
        self.lru_map.lock().remove(&frame_id);
    }

    /// Pop and return the least recently unpinned frame
    pub fn victim(&self) -> Option<FrameId> {
        self.lru_map.lock().pop_front().map(|(frame_id, _)| frame_id)
    }

    /// Number of frames currently tracked
    pub fn size(&self) -> usize {
        self.lru_map.lock().len()
    }
}
