//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{ClockReplacer, Replacer};
use crate::store::PageStore;
use lattice_common::{LatticeError, PageId, Result, PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl From<&lattice_common::StorageConfig> for BufferPoolConfig {
    fn from(config: &lattice_common::StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
        }
    }
}

/// Bookkeeping protected by a single mutex.
struct PoolInner {
    /// Page ID to frame ID mapping.
    page_table: HashMap<PageId, FrameId>,
    /// List of free frame IDs.
    free_list: Vec<FrameId>,
}

/// Shared state behind every handle to one pool.
struct PoolShared {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page table and free list.
    inner: Mutex<PoolInner>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for unoccupied frames
/// - Clock replacement for eviction
/// - Pin counting: a pinned page is never evicted and stays at a stable
///   address until every pin is released
///
/// Reads go through the pool: a miss loads the page from its backing
/// [`PageStore`], and a dirty eviction victim is written back to its
/// owner before the frame is reused. Callers receive a [`PageGuard`]
/// holding one pin; dropping the guard releases it.
///
/// `BufferPool` is a cheap handle over shared state; clones address the
/// same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list.
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            shared: Arc::new(PoolShared {
                config,
                frames,
                inner: Mutex::new(PoolInner {
                    page_table: HashMap::with_capacity(num_frames),
                    free_list,
                }),
                replacer: ClockReplacer::new(num_frames),
            }),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.shared.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.shared.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.shared.inner.lock().page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.shared.inner.lock().page_table.contains_key(&page_id)
    }

    #[inline]
    fn frame(&self, frame_id: FrameId) -> &BufferFrame {
        &self.shared.frames[frame_id.0 as usize]
    }

    /// Reads a page through the pool, pinning it.
    ///
    /// On a pool hit the resident frame is pinned and returned. On a
    /// miss the page is read from `store` into a reclaimed frame; a
    /// dirty victim is written back to its own store first.
    pub fn read_page<S: PageStore + 'static>(
        &self,
        store: &Arc<S>,
        page_no: u32,
    ) -> Result<PageGuard> {
        let page_id = PageId::new(store.store_id(), page_no);
        let mut inner = self.shared.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = self.frame(frame_id);
            frame.pin();
            self.shared.replacer.record_access(frame_id);
            return Ok(PageGuard::new(self.clone(), page_id, frame_id));
        }

        let frame_id = self.reclaim_frame(&mut inner)?;
        let frame = self.frame(frame_id);

        if let Err(e) = store.read_page(page_no, &mut frame.write_data()) {
            frame.reset();
            inner.free_list.push(frame_id);
            return Err(e);
        }

        frame.set_page(page_id, Arc::clone(store) as Arc<dyn PageStore>);
        frame.pin();
        self.shared.replacer.record_access(frame_id);
        inner.page_table.insert(page_id, frame_id);

        Ok(PageGuard::new(self.clone(), page_id, frame_id))
    }

    /// Allocates a fresh page in `store` and pins it.
    ///
    /// The store appends a zeroed page; the returned frame is zeroed to
    /// match, so the caller sees the page exactly as it is on disk.
    pub fn alloc_page<S: PageStore + 'static>(
        &self,
        store: &Arc<S>,
    ) -> Result<(u32, PageGuard)> {
        let mut inner = self.shared.inner.lock();
        let frame_id = self.reclaim_frame(&mut inner)?;

        let page_no = match store.allocate_page() {
            Ok(n) => n,
            Err(e) => {
                inner.free_list.push(frame_id);
                return Err(e);
            }
        };
        let page_id = PageId::new(store.store_id(), page_no);

        let frame = self.frame(frame_id);
        frame.write_data().fill(0);
        frame.set_page(page_id, Arc::clone(store) as Arc<dyn PageStore>);
        frame.pin();
        self.shared.replacer.record_access(frame_id);
        inner.page_table.insert(page_id, frame_id);

        Ok((page_no, PageGuard::new(self.clone(), page_id, frame_id)))
    }

    /// Takes a frame from the free list, or evicts an unpinned victim.
    ///
    /// A dirty victim is written back to its owning store before the
    /// frame is handed out. The returned frame is reset and not present
    /// in the page table.
    fn reclaim_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Ok(frame_id);
        }

        let victim_id = self
            .shared
            .replacer
            .evict(&|fid| {
                let frame = self.frame(fid);
                !frame.is_empty() && frame.pin_count() == 0
            })
            .ok_or(LatticeError::BufferPoolFull)?;

        let frame = self.frame(victim_id);
        let victim_page = frame
            .page_id()
            .ok_or_else(|| LatticeError::Internal("evicted an empty frame".to_string()))?;

        if frame.is_dirty() {
            let owner = frame.owner().ok_or_else(|| {
                LatticeError::Internal(format!("dirty frame {} has no owner", victim_id))
            })?;
            owner.write_page(victim_page.page_no, &frame.read_data())?;
        }

        inner.page_table.remove(&victim_page);
        frame.reset();

        Ok(victim_id)
    }

    /// Releases one pin on a page, optionally marking it dirty.
    ///
    /// Unpinning a page that is not resident, or that holds no pin, is
    /// a caller bug and is reported as an error instead of being
    /// clamped away. Usually called through [`PageGuard`]'s `Drop`
    /// rather than directly.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        let inner = self.shared.inner.lock();
        let frame_id = *inner.page_table.get(&page_id).ok_or_else(|| {
            LatticeError::Internal(format!("unpin of non-resident page {page_id}"))
        })?;

        let frame = self.frame(frame_id);
        if dirty {
            frame.set_dirty(true);
        }
        frame.unpin().ok_or_else(|| {
            LatticeError::Internal(format!("unpin of unpinned page {page_id}"))
        })?;
        Ok(())
    }

    /// Writes back all dirty pages of one store and evicts its unpinned
    /// pages from the pool, then syncs the store.
    ///
    /// Pinned pages are written back but stay resident. Returns the
    /// number of pages written.
    pub fn flush_file(&self, store: &dyn PageStore) -> Result<usize> {
        let mut inner = self.shared.inner.lock();
        let targets: Vec<(PageId, FrameId)> = inner
            .page_table
            .iter()
            .filter(|(pid, _)| pid.file_id == store.store_id())
            .map(|(&pid, &fid)| (pid, fid))
            .collect();

        let mut flushed = 0;
        for (page_id, frame_id) in targets {
            let frame = self.frame(frame_id);

            if frame.is_dirty() {
                store.write_page(page_id.page_no, &frame.read_data())?;
                frame.set_dirty(false);
                flushed += 1;
            }

            if frame.pin_count() == 0 {
                inner.page_table.remove(&page_id);
                self.shared.replacer.remove(frame_id);
                frame.reset();
                inner.free_list.push(frame_id);
            }
        }

        store.sync()?;
        Ok(flushed)
    }

    /// Writes back every dirty page in the pool without evicting.
    ///
    /// Returns the number of pages written. Does not sync the backing
    /// stores; use `flush_file` for a durable per-file flush.
    pub fn flush_all(&self) -> Result<usize> {
        let inner = self.shared.inner.lock();
        let mut flushed = 0;

        for (&page_id, &frame_id) in inner.page_table.iter() {
            let frame = self.frame(frame_id);
            if !frame.is_dirty() {
                continue;
            }
            let owner = frame.owner().ok_or_else(|| {
                LatticeError::Internal(format!("dirty frame {} has no owner", frame_id))
            })?;
            owner.write_page(page_id.page_no, &frame.read_data())?;
            frame.set_dirty(false);
            flushed += 1;
        }

        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.shared.inner.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for &frame_id in inner.page_table.values() {
            let frame = self.frame(frame_id);
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.shared.config.num_frames,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }

    /// Returns the pin count of a resident page (0 if not resident).
    pub fn pin_count(&self, page_id: PageId) -> u32 {
        let inner = self.shared.inner.lock();
        match inner.page_table.get(&page_id) {
            Some(&frame_id) => self.frame(frame_id).pin_count(),
            None => 0,
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BufferPool")
            .field("total_frames", &stats.total_frames)
            .field("used_frames", &stats.used_frames)
            .field("pinned_frames", &stats.pinned_frames)
            .finish()
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII pin on a buffered page.
///
/// Holds exactly one pin, released on drop. The guard owns a pool
/// handle, so it can outlive the scope that produced it, e.g. inside
/// long-lived scan state. Mutable access marks the page dirty so the
/// pin is released with `dirty = true`.
pub struct PageGuard {
    pool: BufferPool,
    page_id: PageId,
    frame_id: FrameId,
    dirty: bool,
}

impl PageGuard {
    fn new(pool: BufferPool, page_id: PageId, frame_id: FrameId) -> Self {
        Self {
            pool,
            page_id,
            frame_id,
            dirty: false,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page number within its file.
    pub fn page_no(&self) -> u32 {
        self.page_id.page_no
    }

    /// Returns read access to the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.pool.frame(self.frame_id).read_data()
    }

    /// Returns write access to the page data and marks the page dirty.
    pub fn data_mut(&mut self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.dirty = true;
        self.pool.frame(self.frame_id).write_data()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        // A live guard always holds a matching pin on a resident page.
        let _ = self.pool.unpin_page(self.page_id, self.dirty);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}
