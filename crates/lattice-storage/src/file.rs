//! Paged file handles for page-level file I/O.

use lattice_buffer::PageStore;
use lattice_common::{LatticeError, Result, PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Page number of the first page in any paged file.
pub const FIRST_PAGE_NO: u32 = 0;

/// Source of process-unique file ids for buffer-pool keying.
static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(0);

/// A file organized as a sequence of fixed-size pages.
///
/// Pages are numbered from 0; `allocate_page` extends the file by one
/// zeroed page. Each open handle carries a process-unique `file_id`
/// that keys its pages in the buffer pool, so a file must be accessed
/// through a single handle at a time.
pub struct PagedFile {
    /// Buffer-pool key for this handle.
    file_id: u32,
    /// Path to the file.
    path: PathBuf,
    /// File name for diagnostics.
    name: String,
    /// File handle and page count.
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    num_pages: u32,
}

impl PagedFile {
    /// Creates a new paged file. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Arc<Self>> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LatticeError::FileExists(Self::display_name(path)));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Arc::new(Self::from_file(path, file, 0)))
    }

    /// Opens an existing paged file.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LatticeError::FileNotFound(Self::display_name(path)));
            }
            Err(e) => return Err(e.into()),
        };

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Arc::new(Self::from_file(path, file, num_pages)))
    }

    fn from_file(path: &Path, file: File, num_pages: u32) -> Self {
        Self {
            file_id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
            name: Self::display_name(path),
            inner: Mutex::new(FileInner { file, num_pages }),
        }
    }

    fn display_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    /// Returns the file id keying this handle's pages in the pool.
    #[inline]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the path to the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the page number of the file's first page.
    #[inline]
    pub fn first_page_no(&self) -> u32 {
        FIRST_PAGE_NO
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }
}

impl PageStore for PagedFile {
    fn store_id(&self) -> u32 {
        self.file_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_no >= inner.num_pages {
            return Err(LatticeError::PageNotFound {
                file: self.name.clone(),
                page_no,
            });
        }

        let offset = (page_no as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_no >= inner.num_pages {
            return Err(LatticeError::PageNotFound {
                file: self.name.clone(),
                page_no,
            });
        }

        let offset = (page_no as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;
        Ok(())
    }

    fn allocate_page(&self) -> Result<u32> {
        let mut inner = self.inner.lock();

        let page_no = inner.num_pages;
        let offset = (page_no as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        inner.num_pages = page_no + 1;

        Ok(page_no)
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for PagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dat");

        let file = PagedFile::create(&path).unwrap();
        assert_eq!(file.num_pages(), 0);
        assert_eq!(file.first_page_no(), 0);
        drop(file);

        let file = PagedFile::open(&path).unwrap();
        assert_eq!(file.num_pages(), 0);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dat");

        PagedFile::create(&path).unwrap();
        let result = PagedFile::create(&path);
        assert!(matches!(result, Err(LatticeError::FileExists(_))));
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.dat");

        let result = PagedFile::open(&path);
        assert!(matches!(result, Err(LatticeError::FileNotFound(_))));
    }

    #[test]
    fn test_allocate_and_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dat");
        let file = PagedFile::create(&path).unwrap();

        let p0 = file.allocate_page().unwrap();
        let p1 = file.allocate_page().unwrap();
        assert_eq!(p0, 0);
        assert_eq!(p1, 1);
        assert_eq!(file.num_pages(), 2);

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xEF;
        file.write_page(p1, &data).unwrap();

        let mut read_buf = [0u8; PAGE_SIZE];
        file.read_page(p1, &mut read_buf).unwrap();
        assert_eq!(read_buf[0], 0xAB);
        assert_eq!(read_buf[PAGE_SIZE - 1], 0xEF);

        // Freshly allocated pages are zeroed.
        file.read_page(p0, &mut read_buf).unwrap();
        assert!(read_buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_write_out_of_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dat");
        let file = PagedFile::create(&path).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        assert!(matches!(
            file.read_page(0, &mut buf),
            Err(LatticeError::PageNotFound { .. })
        ));
        assert!(matches!(
            file.write_page(0, &buf),
            Err(LatticeError::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.dat");

        {
            let file = PagedFile::create(&path).unwrap();
            let p = file.allocate_page().unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[7] = 0x77;
            file.write_page(p, &data).unwrap();
            file.sync().unwrap();
        }

        let file = PagedFile::open(&path).unwrap();
        assert_eq!(file.num_pages(), 1);
        let mut buf = [0u8; PAGE_SIZE];
        file.read_page(0, &mut buf).unwrap();
        assert_eq!(buf[7], 0x77);
    }

    #[test]
    fn test_file_ids_unique() {
        let dir = tempdir().unwrap();
        let a = PagedFile::create(&dir.path().join("a.dat")).unwrap();
        let b = PagedFile::create(&dir.path().join("b.dat")).unwrap();
        assert_ne!(a.file_id(), b.file_id());
    }

    #[test]
    fn test_name() {
        let dir = tempdir().unwrap();
        let file = PagedFile::create(&dir.path().join("orders.4")).unwrap();
        assert_eq!(file.name(), "orders.4");
    }
}
