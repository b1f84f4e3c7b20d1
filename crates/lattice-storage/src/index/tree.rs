//! B+ tree index lifecycle and insertion.

use crate::file::PagedFile;
use crate::heap::HeapFile;
use crate::index::meta::{MetaPage, META_PAGE_NO};
use crate::index::node::{read_tag, InternalNode, LeafNode, NodeTag};
use crate::index::scan::ScanState;
use crate::record::RecordId;
use lattice_buffer::{BufferPool, PageGuard};
use lattice_common::{AttrType, LatticeError, Result};
use std::sync::Arc;

/// A disk-resident B+ tree index over a 32-bit integer attribute of a
/// heap relation.
///
/// The index owns its paged file for its lifetime. Opening either
/// recovers an existing index file (validating its meta page against
/// the arguments) or creates a fresh one and bulk-loads it from a scan
/// of the relation. The root page stays pinned from open until
/// teardown; a root promotion moves the pin to the new root. `close`
/// (or drop) ends any active scan, releases the root pin, and flushes
/// the file through the buffer pool.
pub struct BTreeIndex {
    pub(crate) pool: BufferPool,
    pub(crate) file: Arc<PagedFile>,
    index_name: String,
    relation_name: String,
    attr_byte_offset: u32,
    attr_type: AttrType,
    pub(crate) root_page_no: u32,
    /// Pin held on the root for the index's lifetime.
    root_pin: Option<PageGuard>,
    pub(crate) scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Opens or creates the index over `relation`'s attribute at
    /// `attr_byte_offset`.
    ///
    /// The index file is named `"<relation>.<attr_byte_offset>"` and
    /// lives next to the relation file. On creation the relation is
    /// scanned and every record's key is inserted; on reopen the
    /// existing tree is used as is.
    pub fn open(
        pool: BufferPool,
        relation: &HeapFile,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let index_name = format!("{}.{}", relation.name(), attr_byte_offset);
        let path = relation.dir().join(&index_name);

        match PagedFile::open(&path) {
            Ok(file) => {
                let guard = pool.read_page(&file, META_PAGE_NO)?;
                let meta = MetaPage::parse(&guard.data()[..])?;
                drop(guard);

                if meta.relation_name != relation.name() {
                    return Err(LatticeError::BadIndexInfo(format!(
                        "index {} was built over relation {:?}, not {:?}",
                        index_name, meta.relation_name, relation.name()
                    )));
                }
                if meta.attr_byte_offset as usize != attr_byte_offset {
                    return Err(LatticeError::BadIndexInfo(format!(
                        "index {} was built at attribute offset {}, not {}",
                        index_name, meta.attr_byte_offset, attr_byte_offset
                    )));
                }
                if meta.attr_type != attr_type {
                    return Err(LatticeError::BadIndexInfo(format!(
                        "index {} was built over a {} attribute, not {}",
                        index_name, meta.attr_type, attr_type
                    )));
                }

                let root_pin = pool.read_page(&file, meta.root_page_no)?;
                Ok(Self {
                    pool,
                    file,
                    index_name,
                    relation_name: meta.relation_name,
                    attr_byte_offset: meta.attr_byte_offset,
                    attr_type,
                    root_page_no: meta.root_page_no,
                    root_pin: Some(root_pin),
                    scan: None,
                })
            }
            Err(LatticeError::FileNotFound(_)) => {
                let file = PagedFile::create(&path)?;

                let (meta_page_no, mut meta_guard) = pool.alloc_page(&file)?;
                if meta_page_no != META_PAGE_NO {
                    return Err(LatticeError::Internal(format!(
                        "meta page allocated at {meta_page_no}, expected {META_PAGE_NO}"
                    )));
                }

                let (root_page_no, mut root_guard) = pool.alloc_page(&file)?;
                InternalNode::new(1).write(&mut root_guard.data_mut()[..]);
                drop(root_guard);

                MetaPage::new(
                    relation.name(),
                    attr_byte_offset as u32,
                    attr_type,
                    root_page_no,
                )
                .write(&mut meta_guard.data_mut()[..]);
                drop(meta_guard);

                let root_pin = pool.read_page(&file, root_page_no)?;
                let mut index = Self {
                    pool,
                    file,
                    index_name,
                    relation_name: relation.name().to_string(),
                    attr_byte_offset: attr_byte_offset as u32,
                    attr_type,
                    root_page_no,
                    root_pin: Some(root_pin),
                    scan: None,
                };
                index.bulk_build(relation)?;
                Ok(index)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the index file name, `"<relation>.<attr_byte_offset>"`.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the name of the indexed relation.
    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Returns the byte offset of the indexed attribute.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset as usize
    }

    /// Returns the type of the indexed attribute.
    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    /// Returns the current root page number.
    pub fn root_page_no(&self) -> u32 {
        self.root_page_no
    }

    /// Returns the backing paged file.
    pub fn file(&self) -> &Arc<PagedFile> {
        &self.file
    }

    /// Returns true if a range scan is in progress.
    pub fn is_scan_active(&self) -> bool {
        self.scan.is_some()
    }

    /// Inserts every record of the relation, reading the key at the
    /// configured attribute offset.
    fn bulk_build(&mut self, relation: &HeapFile) -> Result<()> {
        let mut scan = relation.scan();
        loop {
            let rid = match scan.scan_next() {
                Ok(rid) => rid,
                Err(LatticeError::EndOfFile) => break,
                Err(e) => return Err(e),
            };
            let record = scan.record()?;
            let key = Self::key_at(&record, self.attr_byte_offset as usize)?;
            self.insert_entry(key, rid)?;
        }
        Ok(())
    }

    /// Reads the i32 key at `offset` within a record.
    fn key_at(record: &[u8], offset: usize) -> Result<i32> {
        let end = offset + 4;
        if record.len() < end {
            return Err(LatticeError::Internal(format!(
                "record of {} bytes has no i32 attribute at offset {offset}",
                record.len()
            )));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&record[offset..end]);
        Ok(i32::from_le_bytes(buf))
    }

    /// Inserts a `(key, rid)` pair into the index.
    ///
    /// Splits propagate upward through the recursive descent; if the
    /// root itself splits, a new root is installed and the meta page
    /// updated.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        if let Some((sep_key, right_page_no)) = self.insert_into(self.root_page_no, key, rid)? {
            self.promote_root(sep_key, right_page_no)?;
        }
        Ok(())
    }

    /// Recursive descent insert.
    ///
    /// Each level pins its page for the duration of the call and
    /// releases it on the way back up, dirty iff the node changed.
    /// Returns the promoted `(separator, right page)` pair when this
    /// node split.
    fn insert_into(&self, page_no: u32, key: i32, rid: RecordId) -> Result<Option<(i32, u32)>> {
        let mut guard = self.pool.read_page(&self.file, page_no)?;

        let tag = read_tag(page_no, &guard.data()[..])?;
        match tag {
            NodeTag::Leaf => {
                let mut leaf = LeafNode::parse(page_no, &guard.data()[..])?;

                if !leaf.is_full() {
                    leaf.insert(key, rid);
                    leaf.write(&mut guard.data_mut()[..]);
                    return Ok(None);
                }

                let (new_page_no, mut new_guard) = self.pool.alloc_page(&self.file)?;
                let (sep_key, right) = leaf.split_insert(key, rid, new_page_no);
                leaf.write(&mut guard.data_mut()[..]);
                right.write(&mut new_guard.data_mut()[..]);
                Ok(Some((sep_key, new_page_no)))
            }
            NodeTag::Internal => {
                let mut node = InternalNode::parse(page_no, &guard.data()[..])?;

                if node.children.is_empty() {
                    // First insert into a fresh index: hang the first
                    // leaf under the root.
                    let (leaf_page_no, mut leaf_guard) = self.pool.alloc_page(&self.file)?;
                    let mut leaf = LeafNode::new();
                    leaf.insert(key, rid);
                    leaf.write(&mut leaf_guard.data_mut()[..]);
                    drop(leaf_guard);

                    node.attach_first_child(leaf_page_no);
                    node.write(&mut guard.data_mut()[..]);
                    return Ok(None);
                }

                let child_idx = node.child_index(key);
                let child = node.children[child_idx];

                let Some((sep_key, right_page_no)) = self.insert_into(child, key, rid)? else {
                    return Ok(None);
                };

                if !node.is_full() {
                    node.insert_sep(child_idx, sep_key, right_page_no);
                    node.write(&mut guard.data_mut()[..]);
                    return Ok(None);
                }

                let (new_page_no, mut new_guard) = self.pool.alloc_page(&self.file)?;
                let (lifted, right) = node.split_insert(child_idx, sep_key, right_page_no);
                node.write(&mut guard.data_mut()[..]);
                right.write(&mut new_guard.data_mut()[..]);
                Ok(Some((lifted, new_page_no)))
            }
        }
    }

    /// Installs a new root after the old root split.
    ///
    /// The new root sits one level above the old one, holding the
    /// promoted separator and the two halves as children. The meta page
    /// is rewritten to point at it, and the lifetime root pin moves
    /// from the old root to the new one.
    fn promote_root(&mut self, sep_key: i32, right_page_no: u32) -> Result<()> {
        let old_root = self.root_page_no;
        let old_level = {
            let guard = self.pool.read_page(&self.file, old_root)?;
            let level = InternalNode::parse(old_root, &guard.data()[..])?.level;
            level
        };

        let (new_root_no, mut new_guard) = self.pool.alloc_page(&self.file)?;
        let mut root = InternalNode::new(old_level + 1);
        root.attach_first_child(old_root);
        root.insert_sep(0, sep_key, right_page_no);
        root.write(&mut new_guard.data_mut()[..]);
        drop(new_guard);

        let mut meta_guard = self.pool.read_page(&self.file, META_PAGE_NO)?;
        let mut meta = MetaPage::parse(&meta_guard.data()[..])?;
        meta.root_page_no = new_root_no;
        meta.write(&mut meta_guard.data_mut()[..]);
        drop(meta_guard);

        self.root_page_no = new_root_no;
        // Replacing the pin releases the old root.
        self.root_pin = Some(self.pool.read_page(&self.file, new_root_no)?);
        Ok(())
    }

    /// Ends any active scan, releases the root pin, writes the index
    /// file's dirty pages back, and syncs it. The index file is not
    /// deleted.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        // Dropping the scan state and the root pin releases their
        // pages, so the flush can evict the whole file.
        self.scan = None;
        self.root_pin = None;
        self.pool.flush_file(&*self.file)?;
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeIndex")
            .field("index_name", &self.index_name)
            .field("root_page_no", &self.root_page_no)
            .field("root_pinned", &self.root_pin.is_some())
            .field("scan_active", &self.scan.is_some())
            .finish()
    }
}
