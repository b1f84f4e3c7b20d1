//! Heap relation files with buffer pool integration.
//!
//! A heap file is an append-only sequence of slotted record pages. All
//! page I/O is routed through the buffer pool; pages are pinned while
//! in use and unpinned through their guards.

use crate::file::PagedFile;
use crate::heap::page::HeapPage;
use crate::record::RecordId;
use bytes::Bytes;
use lattice_buffer::{BufferPool, PageGuard};
use lattice_common::{LatticeError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A relation stored as a heap of records.
pub struct HeapFile {
    /// Relation name (also the file name).
    name: String,
    /// Directory holding the relation and its index files.
    dir: PathBuf,
    /// Backing paged file.
    file: Arc<PagedFile>,
    /// Buffer pool for page caching.
    pool: BufferPool,
}

impl HeapFile {
    /// Creates a new heap relation file.
    pub fn create(pool: BufferPool, dir: &Path, name: &str) -> Result<Self> {
        let file = PagedFile::create(&dir.join(name))?;
        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            file,
            pool,
        })
    }

    /// Opens an existing heap relation file.
    pub fn open(pool: BufferPool, dir: &Path, name: &str) -> Result<Self> {
        let file = PagedFile::open(&dir.join(name))?;
        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            file,
            pool,
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directory holding the relation.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the backing paged file.
    pub fn file(&self) -> &Arc<PagedFile> {
        &self.file
    }

    /// Appends a record, returning its record id.
    ///
    /// Tries the last page first; allocates a new page when the record
    /// does not fit.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        let num_pages = self.file.num_pages();

        if num_pages > 0 {
            let last = num_pages - 1;
            let mut guard = self.pool.read_page(&self.file, last)?;
            match HeapPage::insert_record(&mut guard.data_mut()[..], record) {
                Ok(slot_no) => return Ok(RecordId::new(last, slot_no)),
                Err(LatticeError::PageFull) => {}
                Err(e) => return Err(e),
            };
        }

        let (page_no, mut guard) = self.pool.alloc_page(&self.file)?;
        {
            let mut data = guard.data_mut();
            HeapPage::init(&mut data[..]);
            let slot_no = HeapPage::insert_record(&mut data[..], record)?;
            Ok(RecordId::new(page_no, slot_no))
        }
    }

    /// Returns the bytes of the record with the given id.
    pub fn record(&self, rid: RecordId) -> Result<Bytes> {
        let guard = self.pool.read_page(&self.file, rid.page_no)?;
        let data = guard.data();
        let record = HeapPage::record_at(&data[..], rid.slot_no).ok_or_else(|| {
            LatticeError::Internal(format!("no record at {} in {}", rid, self.name))
        })?;
        Ok(Bytes::copy_from_slice(record))
    }

    /// Starts a sequential scan over all records.
    pub fn scan(&self) -> FileScan<'_> {
        FileScan {
            heap: self,
            next_page_no: self.file.first_page_no(),
            next_slot: 0,
            current: None,
        }
    }

    /// Flushes the relation's dirty pages and syncs the file.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_file(&*self.file)?;
        Ok(())
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("name", &self.name)
            .field("pages", &self.file.num_pages())
            .finish()
    }
}

/// Sequential scan over the records of a heap file.
///
/// The page currently being scanned stays pinned until the scan moves
/// past it or the scan is dropped.
pub struct FileScan<'a> {
    heap: &'a HeapFile,
    next_page_no: u32,
    next_slot: u16,
    /// Pinned current page and the last record id returned.
    current: Option<(PageGuard, RecordId)>,
}

impl FileScan<'_> {
    /// Advances to the next record and returns its id.
    ///
    /// Returns `EndOfFile` once all records have been returned; the
    /// final page is unpinned before the error surfaces.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        loop {
            if self.next_page_no >= self.heap.file.num_pages() {
                self.current = None;
                return Err(LatticeError::EndOfFile);
            }

            let guard = match self.current.take() {
                Some((g, _)) if g.page_no() == self.next_page_no => g,
                _ => self.heap.pool.read_page(&self.heap.file, self.next_page_no)?,
            };

            let count = HeapPage::record_count(&guard.data()[..]);
            if self.next_slot < count {
                let rid = RecordId::new(self.next_page_no, self.next_slot);
                self.next_slot += 1;
                self.current = Some((guard, rid));
                return Ok(rid);
            }

            // Page exhausted; unpin it and move on.
            drop(guard);
            self.next_page_no += 1;
            self.next_slot = 0;
        }
    }

    /// Returns the bytes of the record last returned by `scan_next`.
    pub fn record(&self) -> Result<Bytes> {
        let (guard, rid) = self
            .current
            .as_ref()
            .ok_or(LatticeError::ScanNotInitialized)?;
        let data = guard.data();
        let record = HeapPage::record_at(&data[..], rid.slot_no).ok_or_else(|| {
            LatticeError::Internal(format!("no record at {} in {}", rid, self.heap.name))
        })?;
        Ok(Bytes::copy_from_slice(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_buffer::BufferPoolConfig;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(BufferPoolConfig { num_frames: 16 });
        (dir, pool)
    }

    #[test]
    fn test_insert_and_get() {
        let (dir, pool) = setup();
        let heap = HeapFile::create(pool, dir.path(), "users").unwrap();

        let rid = heap.insert_record(b"alice").unwrap();
        assert_eq!(rid, RecordId::new(0, 0));
        assert_eq!(heap.record(rid).unwrap(), Bytes::from_static(b"alice"));
    }

    #[test]
    fn test_insert_spills_to_new_page() {
        let (dir, pool) = setup();
        let heap = HeapFile::create(pool, dir.path(), "blobs").unwrap();

        // Each record takes 1000 + 4 bytes; four fit per page.
        let record = [7u8; 1000];
        let mut last_page = 0;
        for _ in 0..10 {
            let rid = heap.insert_record(&record).unwrap();
            last_page = rid.page_no;
        }

        assert!(last_page > 0);
        assert_eq!(heap.file().num_pages(), last_page + 1);
    }

    #[test]
    fn test_scan_returns_all_records_in_order() {
        let (dir, pool) = setup();
        let heap = HeapFile::create(pool, dir.path(), "events").unwrap();

        let mut inserted = Vec::new();
        for i in 0..50u32 {
            let record = i.to_le_bytes();
            inserted.push((heap.insert_record(&record).unwrap(), record.to_vec()));
        }

        let mut scan = heap.scan();
        for (expected_rid, expected_bytes) in &inserted {
            let rid = scan.scan_next().unwrap();
            assert_eq!(rid, *expected_rid);
            assert_eq!(scan.record().unwrap().as_ref(), &expected_bytes[..]);
        }

        assert!(matches!(scan.scan_next(), Err(LatticeError::EndOfFile)));
    }

    #[test]
    fn test_scan_empty_relation() {
        let (dir, pool) = setup();
        let heap = HeapFile::create(pool, dir.path(), "empty").unwrap();

        let mut scan = heap.scan();
        assert!(matches!(scan.scan_next(), Err(LatticeError::EndOfFile)));
    }

    #[test]
    fn test_record_before_scan_next() {
        let (dir, pool) = setup();
        let heap = HeapFile::create(pool, dir.path(), "r").unwrap();
        heap.insert_record(b"x").unwrap();

        let scan = heap.scan();
        assert!(matches!(
            scan.record(),
            Err(LatticeError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_scan_releases_pins() {
        let (dir, pool) = setup();
        let heap = HeapFile::create(pool.clone(), dir.path(), "r").unwrap();
        for i in 0..20u32 {
            heap.insert_record(&i.to_le_bytes()).unwrap();
        }

        {
            let mut scan = heap.scan();
            while scan.scan_next().is_ok() {}
        }
        assert_eq!(pool.stats().pinned_frames, 0);
    }

    #[test]
    fn test_reopen_heap() {
        let (dir, pool) = setup();
        let rid;
        {
            let heap = HeapFile::create(pool.clone(), dir.path(), "persist").unwrap();
            rid = heap.insert_record(b"durable").unwrap();
            heap.flush().unwrap();
        }

        let heap = HeapFile::open(pool, dir.path(), "persist").unwrap();
        assert_eq!(heap.record(rid).unwrap(), Bytes::from_static(b"durable"));
    }
}
