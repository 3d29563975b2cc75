use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::layout::{HEADER_SIZE, SLOT_SIZE};

/// Record-page header.
///
/// The page names itself, so a rid handed in from outside can be checked
/// against the very bytes it points into. Free space is not stored: it is
/// whatever lies between the record-data frontier and the slot directory
/// growing back from the tail, so the two can never disagree.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_id: PageId,
    pub slot_count: u16,
    pub free_space_offset: u16,
    /// Overflow chain; `INVALID_PAGE_ID` ends it.
    pub next_page_id: PageId,
}

impl PageHeader {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            slot_count: 0,
            free_space_offset: HEADER_SIZE as u16,
            next_page_id: INVALID_PAGE_ID,
        }
    }

    /// First byte of the slot directory at the page tail
    pub fn slot_directory_start(&self) -> usize {
        PAGE_SIZE - SLOT_SIZE * self.slot_count as usize
    }

    /// Bytes left between the record data and the slot directory
    pub fn free_space(&self) -> usize {
        self.slot_directory_start() - self.free_space_offset as usize
    }

    pub fn next_page(&self) -> Option<PageId> {
        (self.next_page_id != INVALID_PAGE_ID).then_some(self.next_page_id)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.page_id);
        LittleEndian::write_u16(&mut bytes[4..6], self.slot_count);
        LittleEndian::write_u16(&mut bytes[6..8], self.free_space_offset);
        LittleEndian::write_u32(&mut bytes[8..12], self.next_page_id);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_u32(&bytes[0..4]),
            slot_count: LittleEndian::read_u16(&bytes[4..6]),
            free_space_offset: LittleEndian::read_u16(&bytes[6..8]),
            next_page_id: LittleEndian::read_u32(&bytes[8..12]),
        }
    }
}
