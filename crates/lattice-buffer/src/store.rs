//! Backing-store contract consumed by the buffer pool.

use lattice_common::{Result, PAGE_SIZE};

/// A paged backing store the buffer pool can read from and write to.
///
/// Implemented by the paged-file handle in the storage crate. The pool
/// keeps an `Arc<dyn PageStore>` per occupied frame so a dirty victim
/// can be written back to its owning file at eviction time.
pub trait PageStore: Send + Sync {
    /// Process-unique identifier for this store, used to key the page
    /// table. Two handles onto the same underlying file must share it.
    fn store_id(&self) -> u32;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Reads an existing page into `buf`.
    fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes a full page.
    fn write_page(&self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Appends a fresh zeroed page and returns its page number.
    fn allocate_page(&self) -> Result<u32>;

    /// Forces buffered file contents to durable storage.
    fn sync(&self) -> Result<()>;
}
