//! Slotted page layout for heap relation files.
//!
//! Page layout:
//! ```text
//! +------------------------+ 0
//! | count: u16             |
//! | free_end: u16          |
//! +------------------------+ 4 (HEADER_SIZE)
//! | Slot Array             |
//! | [offset:2, len:2] * n  |  <- grows forward
//! +------------------------+ 4 + 4*n
//! |      Free Space        |
//! +------------------------+ free_end
//! | Record Data            |  <- grows backward from PAGE_SIZE
//! +------------------------+ PAGE_SIZE
//! ```

use lattice_common::{LatticeError, Result, PAGE_SIZE};

/// Operations on a heap page held in a buffer frame.
///
/// All functions work directly on the page buffer so callers can go
/// through a pinned `PageGuard` without copying the page.
pub struct HeapPage;

impl HeapPage {
    /// Size of the page header in bytes.
    pub const HEADER_SIZE: usize = 4;

    /// Size of each slot (offset:2 + len:2).
    const SLOT_SIZE: usize = 4;

    /// Largest record that fits on an empty page.
    pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - Self::HEADER_SIZE - Self::SLOT_SIZE;

    /// Initializes an empty heap page.
    pub fn init(data: &mut [u8]) {
        data[0..2].copy_from_slice(&0u16.to_le_bytes());
        data[2..4].copy_from_slice(&(PAGE_SIZE as u16).to_le_bytes());
    }

    /// Returns the number of records on the page.
    pub fn record_count(data: &[u8]) -> u16 {
        u16::from_le_bytes([data[0], data[1]])
    }

    fn free_end(data: &[u8]) -> usize {
        let raw = u16::from_le_bytes([data[2], data[3]]) as usize;
        // A freshly allocated page is all zeroes and was never initialized.
        if raw == 0 {
            PAGE_SIZE
        } else {
            raw
        }
    }

    /// Returns the amount of free space on the page.
    pub fn free_space(data: &[u8]) -> usize {
        let count = Self::record_count(data) as usize;
        let slot_array_end = Self::HEADER_SIZE + count * Self::SLOT_SIZE;
        Self::free_end(data).saturating_sub(slot_array_end)
    }

    /// Appends a record to the page, returning its slot number.
    pub fn insert_record(data: &mut [u8], record: &[u8]) -> Result<u16> {
        if record.len() > Self::MAX_RECORD_SIZE {
            return Err(LatticeError::RecordTooLarge {
                size: record.len(),
                max: Self::MAX_RECORD_SIZE,
            });
        }

        if Self::free_space(data) < record.len() + Self::SLOT_SIZE {
            return Err(LatticeError::PageFull);
        }

        let count = Self::record_count(data) as usize;
        let new_end = Self::free_end(data) - record.len();
        data[new_end..new_end + record.len()].copy_from_slice(record);

        let slot_offset = Self::HEADER_SIZE + count * Self::SLOT_SIZE;
        data[slot_offset..slot_offset + 2].copy_from_slice(&(new_end as u16).to_le_bytes());
        data[slot_offset + 2..slot_offset + 4]
            .copy_from_slice(&(record.len() as u16).to_le_bytes());

        data[0..2].copy_from_slice(&((count + 1) as u16).to_le_bytes());
        data[2..4].copy_from_slice(&(new_end as u16).to_le_bytes());

        Ok(count as u16)
    }

    /// Returns the bytes of the record in the given slot.
    pub fn record_at(data: &[u8], slot_no: u16) -> Option<&[u8]> {
        if slot_no >= Self::record_count(data) {
            return None;
        }

        let slot_offset = Self::HEADER_SIZE + slot_no as usize * Self::SLOT_SIZE;
        let offset = u16::from_le_bytes([data[slot_offset], data[slot_offset + 1]]) as usize;
        let len = u16::from_le_bytes([data[slot_offset + 2], data[slot_offset + 3]]) as usize;

        if offset + len > PAGE_SIZE {
            return None;
        }
        Some(&data[offset..offset + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_page() -> Box<[u8; PAGE_SIZE]> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        HeapPage::init(&mut *data);
        data
    }

    #[test]
    fn test_init() {
        let data = empty_page();
        assert_eq!(HeapPage::record_count(&*data), 0);
        assert_eq!(
            HeapPage::free_space(&*data),
            PAGE_SIZE - HeapPage::HEADER_SIZE
        );
    }

    #[test]
    fn test_insert_and_read() {
        let mut data = empty_page();

        let slot = HeapPage::insert_record(&mut *data, b"hello").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(HeapPage::record_count(&*data), 1);
        assert_eq!(HeapPage::record_at(&*data, 0), Some(&b"hello"[..]));
    }

    #[test]
    fn test_insert_multiple() {
        let mut data = empty_page();

        for i in 0..10u8 {
            let slot = HeapPage::insert_record(&mut *data, &[i; 16]).unwrap();
            assert_eq!(slot, i as u16);
        }

        for i in 0..10u8 {
            assert_eq!(HeapPage::record_at(&*data, i as u16), Some(&[i; 16][..]));
        }
    }

    #[test]
    fn test_insert_on_uninitialized_page() {
        // A freshly allocated page is all zeroes; insert must cope.
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let slot = HeapPage::insert_record(&mut *data, b"raw").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(HeapPage::record_at(&*data, 0), Some(&b"raw"[..]));
    }

    #[test]
    fn test_record_at_invalid_slot() {
        let data = empty_page();
        assert_eq!(HeapPage::record_at(&*data, 0), None);
        assert_eq!(HeapPage::record_at(&*data, 99), None);
    }

    #[test]
    fn test_page_full() {
        let mut data = empty_page();
        let record = [0xAAu8; 128];

        let mut inserted = 0;
        loop {
            match HeapPage::insert_record(&mut *data, &record) {
                Ok(_) => inserted += 1,
                Err(LatticeError::PageFull) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        // 128-byte records + 4-byte slots into a 4092-byte data area.
        assert_eq!(inserted, (PAGE_SIZE - HeapPage::HEADER_SIZE) / (128 + 4));
        assert_eq!(HeapPage::record_count(&*data), inserted as u16);
    }

    #[test]
    fn test_record_too_large() {
        let mut data = empty_page();
        let record = vec![0u8; PAGE_SIZE];
        let result = HeapPage::insert_record(&mut *data, &record);
        assert!(matches!(result, Err(LatticeError::RecordTooLarge { .. })));
    }

    #[test]
    fn test_free_space_shrinks() {
        let mut data = empty_page();
        let before = HeapPage::free_space(&*data);

        HeapPage::insert_record(&mut *data, &[0u8; 100]).unwrap();
        assert_eq!(HeapPage::free_space(&*data), before - 100 - 4);
    }
}
