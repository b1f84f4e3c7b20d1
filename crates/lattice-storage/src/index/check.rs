//! Tree integrity checks used by tests and diagnostics.

use crate::index::meta::META_PAGE_NO;
use crate::index::node::{InternalNode, LeafNode};
use crate::index::tree::BTreeIndex;
use lattice_common::{LatticeError, Result};

/// Shape of a validated tree.
#[derive(Debug, Clone)]
pub struct TreeSummary {
    /// Page number of the root.
    pub root_page_no: u32,
    /// Levels from root to leaves inclusive (1 for a childless root).
    pub height: u32,
    /// Level stored in the root node.
    pub root_level: u16,
    /// Number of children under the root.
    pub root_children: usize,
    /// Number of leaves in the sibling chain.
    pub leaf_count: u64,
    /// Number of entries across all leaves.
    pub entry_count: u64,
}

impl BTreeIndex {
    /// Walks the whole tree and verifies its structural invariants:
    /// sorted keys in every node, separator bounds against each
    /// subtree, levels decreasing by one per step, and a right-sibling
    /// chain that visits every leaf in order with non-decreasing keys
    /// across boundaries.
    pub fn validate(&self) -> Result<TreeSummary> {
        let root_page_no = self.root_page_no;
        let root = {
            let guard = self.pool.read_page(&self.file, root_page_no)?;
            let node = InternalNode::parse(root_page_no, &guard.data()[..])?;
            node
        };

        if root.children.is_empty() {
            return Ok(TreeSummary {
                root_page_no,
                height: 1,
                root_level: root.level,
                root_children: 0,
                leaf_count: 0,
                entry_count: 0,
            });
        }

        let mut leaves_inorder = Vec::new();
        let (subtree_height, entry_count) =
            self.check_internal(root_page_no, &root, None, None, &mut leaves_inorder)?;

        // Follow the sibling chain and compare it to the in-order walk.
        let mut chain = Vec::with_capacity(leaves_inorder.len());
        let mut chain_entries = 0u64;
        let mut prev_last_key: Option<i32> = None;
        let mut next = leaves_inorder[0];
        while next != 0 {
            let guard = self.pool.read_page(&self.file, next)?;
            let leaf = LeafNode::parse(next, &guard.data()[..])?;

            if let (Some(prev), Some(first)) = (prev_last_key, leaf.entries.first()) {
                if first.key < prev {
                    return Err(corrupt(next, "keys decrease across a leaf boundary"));
                }
            }
            prev_last_key = leaf.entries.last().map(|e| e.key).or(prev_last_key);
            chain_entries += leaf.entries.len() as u64;
            chain.push(next);
            next = leaf.right_sib;
        }

        if chain != leaves_inorder {
            return Err(corrupt(
                root_page_no,
                "sibling chain disagrees with the in-order leaf walk",
            ));
        }
        if chain_entries != entry_count {
            return Err(corrupt(
                root_page_no,
                "sibling chain entry count disagrees with the tree walk",
            ));
        }

        Ok(TreeSummary {
            root_page_no,
            height: subtree_height,
            root_level: root.level,
            root_children: root.children.len(),
            leaf_count: chain.len() as u64,
            entry_count,
        })
    }

    /// Checks one internal node and its subtree. Returns the subtree
    /// height (including this node) and its entry count, appending leaf
    /// page numbers in key order.
    fn check_internal(
        &self,
        page_no: u32,
        node: &InternalNode,
        low: Option<i32>,
        high: Option<i32>,
        leaves: &mut Vec<u32>,
    ) -> Result<(u32, u64)> {
        if node.children.len() != node.keys.len() + 1 {
            return Err(corrupt(page_no, "child count is not key count + 1"));
        }
        if node.keys.windows(2).any(|w| w[0] > w[1]) {
            return Err(corrupt(page_no, "internal keys out of order"));
        }
        check_bounds(page_no, node.keys.iter().copied(), low, high)?;

        let mut height = None;
        let mut entries = 0u64;

        for (i, &child) in node.children.iter().enumerate() {
            if child == META_PAGE_NO {
                return Err(corrupt(page_no, "child pointer names the meta page"));
            }
            let child_low = if i == 0 { low } else { Some(node.keys[i - 1]) };
            let child_high = node.keys.get(i).copied().or(high);

            let guard = self.pool.read_page(&self.file, child)?;
            let (child_height, child_entries) = if node.level == 1 {
                let leaf = LeafNode::parse(child, &guard.data()[..])?;
                drop(guard);
                if leaf.entries.windows(2).any(|w| w[0].key > w[1].key) {
                    return Err(corrupt(child, "leaf keys out of order"));
                }
                check_bounds(
                    child,
                    leaf.entries.iter().map(|e| e.key),
                    child_low,
                    child_high,
                )?;
                leaves.push(child);
                (1, leaf.entries.len() as u64)
            } else {
                let inner = InternalNode::parse(child, &guard.data()[..])?;
                drop(guard);
                if inner.level != node.level - 1 {
                    return Err(corrupt(
                        child,
                        "child level is not one below its parent",
                    ));
                }
                self.check_internal(child, &inner, child_low, child_high, leaves)?
            };

            match height {
                None => height = Some(child_height),
                Some(h) if h != child_height => {
                    return Err(corrupt(page_no, "children have unequal heights"));
                }
                Some(_) => {}
            }
            entries += child_entries;
        }

        Ok((height.unwrap_or(0) + 1, entries))
    }

    /// Returns the first key of each leaf in chain order. The first key
    /// of every leaf after the leftmost is a separator that was
    /// promoted by a leaf split.
    pub fn leaf_first_keys(&self) -> Result<Vec<i32>> {
        let mut page_no = self.root_page_no;
        loop {
            let guard = self.pool.read_page(&self.file, page_no)?;
            let node = InternalNode::parse(page_no, &guard.data()[..])?;
            match node.children.first() {
                None => return Ok(Vec::new()),
                Some(&child) => {
                    if node.level == 1 {
                        drop(guard);
                        let mut firsts = Vec::new();
                        let mut next = child;
                        while next != 0 {
                            let leaf_guard = self.pool.read_page(&self.file, next)?;
                            let leaf = LeafNode::parse(next, &leaf_guard.data()[..])?;
                            if let Some(first) = leaf.entries.first() {
                                firsts.push(first.key);
                            }
                            next = leaf.right_sib;
                        }
                        return Ok(firsts);
                    }
                    page_no = child;
                }
            }
        }
    }
}

fn corrupt(page_no: u32, reason: &str) -> LatticeError {
    LatticeError::PageCorrupted {
        page_no,
        reason: reason.to_string(),
    }
}

/// Checks that every key lies within the separator bounds. Both bounds
/// are inclusive: duplicates of a separator may sit on either side of
/// it.
fn check_bounds(
    page_no: u32,
    keys: impl Iterator<Item = i32>,
    low: Option<i32>,
    high: Option<i32>,
) -> Result<()> {
    for key in keys {
        if let Some(low) = low {
            if key < low {
                return Err(corrupt(page_no, "key below its subtree's lower bound"));
            }
        }
        if let Some(high) = high {
            if key > high {
                return Err(corrupt(page_no, "key above its subtree's upper bound"));
            }
        }
    }
    Ok(())
}
