//! Filtered range scans over the index.
//!
//! A scan positions itself on the first leaf entry satisfying the low
//! bound, then walks the right-sibling chain. Exactly one leaf stays
//! pinned between calls; it is released when the scan moves to the next
//! leaf or when `end_scan` runs. A completed or failed `scan_next` does
//! not end the scan: the caller still owns the cursor until `end_scan`.

use crate::index::node::{read_tag, InternalNode, LeafNode, NodeTag};
use crate::index::tree::BTreeIndex;
use crate::record::RecordId;
use lattice_buffer::PageGuard;
use lattice_common::{LatticeError, Result};
use std::sync::Arc;

/// Comparison operator for scan bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    /// Strictly greater than (low bound only).
    Gt,
    /// Greater than or equal (low bound only).
    Gte,
    /// Strictly less than (high bound only).
    Lt,
    /// Less than or equal (high bound only).
    Lte,
}

impl ScanOp {
    /// Evaluates `key` against a low bound. Only meaningful for
    /// `Gt`/`Gte`.
    fn satisfies_low(self, key: i32, low: i32) -> bool {
        match self {
            ScanOp::Gt => key > low,
            ScanOp::Gte => key >= low,
            ScanOp::Lt | ScanOp::Lte => false,
        }
    }

    /// Evaluates `key` against a high bound. Only meaningful for
    /// `Lt`/`Lte`.
    fn satisfies_high(self, key: i32, high: i32) -> bool {
        match self {
            ScanOp::Lt => key < high,
            ScanOp::Lte => key <= high,
            ScanOp::Gt | ScanOp::Gte => false,
        }
    }
}

/// State of an in-progress range scan.
pub(crate) struct ScanState {
    low_val: i32,
    high_val: i32,
    low_op: ScanOp,
    high_op: ScanOp,
    /// Pinned leaf currently being read.
    leaf: PageGuard,
    /// Position of the next candidate entry within the leaf.
    next_idx: usize,
}

impl BTreeIndex {
    /// Begins a filtered scan over keys in the given range.
    ///
    /// `low_op` must be `Gt` or `Gte`, `high_op` must be `Lt` or `Lte`,
    /// and `low_val` must not exceed `high_val`. If no entry satisfies
    /// the low bound, `NoSuchKeyFound` is returned and the scan stays
    /// inactive. A scan already in progress is ended first.
    pub fn start_scan(
        &mut self,
        low_val: i32,
        low_op: ScanOp,
        high_val: i32,
        high_op: ScanOp,
    ) -> Result<()> {
        if !matches!(low_op, ScanOp::Gt | ScanOp::Gte)
            || !matches!(high_op, ScanOp::Lt | ScanOp::Lte)
        {
            return Err(LatticeError::BadOpcodes);
        }
        if low_val > high_val {
            return Err(LatticeError::BadScanRange {
                low: low_val,
                high: high_val,
            });
        }

        if self.scan.is_some() {
            self.scan = None;
        }

        // Descend toward the leaf that could hold the first qualifying
        // key, unpinning each internal node as we move past it.
        let mut page_no = self.root_page_no;
        let mut guard = loop {
            let guard = self.pool.read_page(&self.file, page_no)?;
            let tag = read_tag(page_no, &guard.data()[..])?;
            match tag {
                NodeTag::Internal => {
                    let node = InternalNode::parse(page_no, &guard.data()[..])?;
                    match node.child_for(low_val) {
                        Some(child) => page_no = child,
                        // A childless root: the index is empty.
                        None => return Err(LatticeError::NoSuchKeyFound),
                    }
                }
                NodeTag::Leaf => break guard,
            }
        };

        // Position on the first entry satisfying the low bound,
        // following the sibling chain if this leaf has none.
        loop {
            let leaf = LeafNode::parse(guard.page_no(), &guard.data()[..])?;
            let idx = leaf
                .entries
                .partition_point(|e| !low_op.satisfies_low(e.key, low_val));

            if idx < leaf.entries.len() {
                self.scan = Some(ScanState {
                    low_val,
                    high_val,
                    low_op,
                    high_op,
                    leaf: guard,
                    next_idx: idx,
                });
                return Ok(());
            }

            if leaf.right_sib == 0 {
                return Err(LatticeError::NoSuchKeyFound);
            }
            // Move right; reassigning the guard unpins the old leaf.
            guard = self.pool.read_page(&self.file, leaf.right_sib)?;
        }
    }

    /// Returns the record id of the next entry matching the scan.
    ///
    /// Fails with `ScanNotInitialized` if no scan is active and with
    /// `IndexScanCompleted` once the high bound fails or the leaf chain
    /// ends. The scan stays active either way.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let pool = self.pool.clone();
        let file = Arc::clone(&self.file);
        let state = self.scan.as_mut().ok_or(LatticeError::ScanNotInitialized)?;

        loop {
            let leaf = LeafNode::parse(state.leaf.page_no(), &state.leaf.data()[..])?;

            if state.next_idx < leaf.entries.len() {
                let entry = leaf.entries[state.next_idx];
                if !state.high_op.satisfies_high(entry.key, state.high_val) {
                    return Err(LatticeError::IndexScanCompleted);
                }
                debug_assert!(state.low_op.satisfies_low(entry.key, state.low_val));
                state.next_idx += 1;
                return Ok(entry.rid);
            }

            if leaf.right_sib == 0 {
                return Err(LatticeError::IndexScanCompleted);
            }

            // Advance to the right sibling; replacing the guard unpins
            // the exhausted leaf.
            state.leaf = pool.read_page(&file, leaf.right_sib)?;
            state.next_idx = 0;
        }
    }

    /// Ends the active scan, releasing its pinned leaf.
    pub fn end_scan(&mut self) -> Result<()> {
        if self.scan.take().is_none() {
            return Err(LatticeError::ScanNotInitialized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_op_low_bounds() {
        assert!(ScanOp::Gt.satisfies_low(5, 4));
        assert!(!ScanOp::Gt.satisfies_low(4, 4));
        assert!(ScanOp::Gte.satisfies_low(4, 4));
        assert!(!ScanOp::Gte.satisfies_low(3, 4));
    }

    #[test]
    fn test_scan_op_high_bounds() {
        assert!(ScanOp::Lt.satisfies_high(3, 4));
        assert!(!ScanOp::Lt.satisfies_high(4, 4));
        assert!(ScanOp::Lte.satisfies_high(4, 4));
        assert!(!ScanOp::Lte.satisfies_high(5, 4));
    }

    #[test]
    fn test_scan_op_wrong_side_never_satisfies() {
        assert!(!ScanOp::Lt.satisfies_low(10, 0));
        assert!(!ScanOp::Gte.satisfies_high(0, 10));
    }
}
