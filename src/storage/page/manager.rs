use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::PageHeader;
use crate::storage::page::layout::{RecordSlot, HEADER_SIZE, SLOT_SIZE};

/// Slotted record pages: record bytes grow from just after the header, the
/// slot directory grows backwards from the page tail. Records are addressed
/// by `Rid { page_id, slot_num }` and every lookup is validated against the
/// page id stamped in the header, so a rid can never silently read another
/// page's bytes. Deleting tombstones the slot, keeping later rids stable.
pub struct PageManager;

impl Default for PageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    pub fn init_page(&self, page: &mut Page) {
        let header = PageHeader::new(page.page_id);
        self.put_header(page, &header);
    }

    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<Rid, PageError> {
        let mut header = self.get_header(page);

        if data.len() + SLOT_SIZE > header.free_space() {
            return Err(PageError::InsufficientSpace);
        }

        let slot_num = header.slot_count as u32;
        let slot = RecordSlot {
            offset: header.free_space_offset,
            length: data.len() as u16,
        };

        let data_start = slot.offset as usize;
        page.data[data_start..data_start + data.len()].copy_from_slice(data);

        header.slot_count += 1;
        header.free_space_offset += data.len() as u16;

        // With the count bumped, the directory start is the new slot's home.
        let slot_pos = header.slot_directory_start();
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
        self.put_header(page, &header);

        Ok(Rid::new(header.page_id, slot_num))
    }

    pub fn get_record(&self, page: &Page, rid: Rid) -> Result<Vec<u8>, PageError> {
        let slot = self.live_slot(page, rid)?;

        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        Ok(page.data[start..end].to_vec())
    }

    /// Rewrite a record in place. A record that outgrows its old span moves
    /// to fresh space at the data frontier; the rid never changes, and the
    /// abandoned span is left for a later page rebuild.
    pub fn update_record(&self, page: &mut Page, rid: Rid, data: &[u8]) -> Result<(), PageError> {
        let slot = self.live_slot(page, rid)?;
        let slot_pos = Self::slot_position(rid.slot_num);

        if data.len() > slot.length as usize {
            let mut header = self.get_header(page);
            if data.len() > header.free_space() {
                return Err(PageError::InsufficientSpace);
            }

            let moved = RecordSlot {
                offset: header.free_space_offset,
                length: data.len() as u16,
            };
            let start = moved.offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&moved.to_bytes());

            header.free_space_offset += data.len() as u16;
            self.put_header(page, &header);
            return Ok(());
        }

        let start = slot.offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);

        if data.len() < slot.length as usize {
            let shrunk = RecordSlot {
                offset: slot.offset,
                length: data.len() as u16,
            };
            page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&shrunk.to_bytes());
        }

        Ok(())
    }

    /// Tombstone a record. Its slot entry stays so later rids keep meaning;
    /// the record bytes are reclaimed lazily.
    pub fn delete_record(&self, page: &mut Page, rid: Rid) -> Result<(), PageError> {
        let mut slot = self.live_slot(page, rid)?;
        let slot_pos = Self::slot_position(rid.slot_num);

        slot.length = 0;
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());

        Ok(())
    }

    pub fn get_header(&self, page: &Page) -> PageHeader {
        PageHeader::from_bytes(&page.data[0..HEADER_SIZE])
    }

    pub fn get_free_space(&self, page: &Page) -> usize {
        self.get_header(page).free_space()
    }

    fn put_header(&self, page: &mut Page, header: &PageHeader) {
        page.data[0..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Look up a rid's slot, rejecting rids for other pages, slots past the
    /// directory, and tombstones.
    fn live_slot(&self, page: &Page, rid: Rid) -> Result<RecordSlot, PageError> {
        let header = self.get_header(page);

        if rid.page_id != header.page_id {
            return Err(PageError::InvalidRecordId);
        }
        if rid.slot_num >= header.slot_count as u32 {
            return Err(PageError::InvalidRecordId);
        }

        let slot_pos = Self::slot_position(rid.slot_num);
        let slot = RecordSlot::from_bytes(&page.data[slot_pos..slot_pos + SLOT_SIZE]);

        if slot.is_dead() {
            return Err(PageError::RecordNotFound);
        }

        Ok(slot)
    }

    fn slot_position(slot_num: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot_num as usize + 1)
    }
}
