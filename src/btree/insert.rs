//! # Insertion Engine
//!
//! An insert is a small state machine: locate the key, then either replace
//! its value in place or wedge a new key/value pair into the terminal node,
//! then restore capacity invariants bottom-up.
//!
//! ```text
//! Locate ──exact──▶ Replace (done)
//!    │
//!    └──miss──▶ InsertIntoNode ──fits──▶ done
//!                     │
//!                     ▼ (node reached kfactor keys)
//!                SplitNode ──▶ parent gains a separator, re-check parent
//!                     │
//!                     ├─ node was the block's internal root, height left:
//!                     │      GrowBlockHeight, then SplitNode the old root
//!                     │
//!                     └─ internal root at max height: SplitBlock (4.6)
//! ```
//!
//! ## Node Split
//!
//! A node that reaches `kfactor` keys splits at `bfactor / 2`: the upper
//! half of keys and their right-hand values move into a freshly allocated
//! sibling slot in the same block, the sibling's first key is promoted into
//! the parent with a NODE value pointing at the sibling, and the parent is
//! re-checked. Children moved to the sibling get their parent back-reference
//! rewritten. The propagation chain is bounded by the block height, so a
//! plain loop suffices.
//!
//! The layout planner sizes `block_nodes` so that a free slot always exists
//! when a split is legal; failure to find one aborts the operation as an
//! invariant violation rather than attempting recovery.

use eyre::{Result, bail, ensure};
use smallvec::SmallVec;

use super::node::Value;
use super::tree::Tree;
use crate::storage::{BlockMut, SLOT_TAG_NODE};

impl Tree {
    /// Inserts or updates a key bound to a payload offset.
    pub fn insert(&mut self, key: u32, value: u32) -> Result<()> {
        let hit = self.lookup(key)?;
        let layout = self.layout;
        let mut map = self.store.load_mut(hit.block)?;

        {
            let mut block = BlockMut::new(map.bytes_mut(), &layout)?;

            if hit.exact {
                // Overwrite in place; content is unchanged.
                block
                    .node_mut(hit.slot)?
                    .replace_value_for(key, Value::Content(value))?;
                return Ok(());
            }

            if block.slot_header(hit.slot)?.tag() != SLOT_TAG_NODE {
                // Only a tree that has never held a key terminates its
                // search on a bare slot: the root block's first node is
                // created here.
                ensure!(
                    block.header().cont() == 0,
                    "search terminated at non-node slot {} in populated block",
                    hit.slot
                );
                block.init_node(hit.slot)?;
            }

            block
                .node_mut(hit.slot)?
                .insert_pair(key, Value::Content(value))?;
        }
        self.content += 1;

        let block_full = {
            let mut block = BlockMut::new(map.bytes_mut(), &layout)?;
            propagate_splits(&mut block, hit.slot)?
        };

        if block_full {
            self.split_block(hit.block, &mut map)?;
        }
        Ok(())
    }
}

/// Walks the split chain upward from the node that just grew. Returns true
/// when the chain ends at the block's internal root with no height left,
/// i.e. the block itself must split.
fn propagate_splits(block: &mut BlockMut<'_>, start: u32) -> Result<bool> {
    let layout = *block.layout();
    let mut slot = start;

    // The chain climbs one level per split, so it ends within the block's
    // height bound; running longer means a corrupt parent chain.
    for _ in 0..=layout.block_height as usize + 1 {
        if block.node(slot)?.cont() < layout.kfactor {
            return Ok(false);
        }

        let root_slot = block.header().root();
        if slot != root_slot {
            slot = split_node(block, slot)?;
        } else if block.header().height() < layout.block_height {
            let new_root = grow_root(block)?;
            split_node(block, root_slot)?;
            slot = new_root;
        } else {
            return Ok(true);
        }
    }

    bail!(
        "split chain exceeds block height {} (corrupt parent chain)",
        layout.block_height
    );
}

/// Splits a full non-root node into a sibling slot and promotes the
/// separator into the parent. Returns the parent slot for re-checking.
pub(crate) fn split_node(block: &mut BlockMut<'_>, slot: u32) -> Result<u32> {
    let layout = *block.layout();
    let kfactor = layout.kfactor;
    let mid = layout.bfactor / 2;

    let mut keys: SmallVec<[u32; 16]> = SmallVec::new();
    let mut values: SmallVec<[Value; 16]> = SmallVec::new();
    let parent;
    {
        let node = block.node(slot)?;
        ensure!(
            node.cont() == kfactor,
            "splitting node {} with {} keys (expected {})",
            slot,
            node.cont(),
            kfactor
        );
        parent = node.parent();
        for i in 0..kfactor {
            keys.push(node.key_at(i)?);
        }
        for i in 0..=kfactor {
            values.push(node.value_at(i)?);
        }
    }

    let sibling = block.alloc_node_slot()?;
    let separator = keys[mid];

    {
        let mut node = block.node_mut(sibling)?;
        node.set_parent(parent);
        for (i, &k) in keys[mid..].iter().enumerate() {
            node.set_key(i, k)?;
        }
        node.set_value(0, Value::Null)?;
        for i in 0..(kfactor - mid) {
            node.set_value(i + 1, values[mid + 1 + i])?;
        }
        node.set_cont((kfactor - mid) as u8);
    }

    // Children that moved now answer to the sibling.
    for i in 0..(kfactor - mid) {
        if let Value::Node(child) = values[mid + 1 + i] {
            block.node_mut(child)?.set_parent(sibling);
        }
    }

    {
        let mut node = block.node_mut(slot)?;
        node.set_cont(mid as u8);
        for i in mid..kfactor {
            node.set_key(i, 0)?;
        }
        for i in (mid + 1)..=kfactor {
            node.set_value(i, Value::Null)?;
        }
    }

    block
        .node_mut(parent)?
        .insert_pair(separator, Value::Node(sibling))?;

    tracing::trace!(slot, sibling, parent, separator, "split node");
    Ok(parent)
}

/// Adds one level to the block's embedded tree: a fresh slot becomes the new
/// internal root with the old root as its only child. The caller follows up
/// by splitting the old root, which gives the new root its first key.
fn grow_root(block: &mut BlockMut<'_>) -> Result<u32> {
    let old_root = block.header().root();
    let new_root = block.alloc_node_slot()?;

    {
        let mut node = block.node_mut(new_root)?;
        node.set_value(0, Value::Node(old_root))?;
        node.set_parent(new_root);
    }
    block.node_mut(old_root)?.set_parent(new_root);

    let height = block.header().height();
    block.header_mut().set_root(new_root);
    block.header_mut().set_height(height + 1);

    tracing::trace!(
        old_root,
        new_root,
        height = height + 1,
        "grew block height"
    );
    Ok(new_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TreeConfig;
    use crate::storage::BlockRef;
    use tempfile::tempdir;

    fn open_tree(config: TreeConfig) -> (Tree, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let tree = Tree::init(dir.path().join("index"), config).unwrap();
        (tree, dir)
    }

    /// Walks every node of every block and asserts strictly ascending keys.
    fn assert_ordering(tree: &Tree) {
        let layout = *tree.layout();
        for position in 0..tree.blocks_alloc() {
            let map = tree.store.load(position).unwrap();
            let block = BlockRef::new(map.bytes(), &layout).unwrap();
            for slot in 0..layout.block_nodes as u32 {
                if block.slot_tag(slot).unwrap() != SLOT_TAG_NODE {
                    continue;
                }
                let node = block.node(slot).unwrap();
                for i in 1..node.cont() {
                    assert!(
                        node.key_at(i - 1).unwrap() < node.key_at(i).unwrap(),
                        "keys out of order in block {} slot {}",
                        position,
                        slot
                    );
                }
            }
        }
    }

    #[test]
    fn first_insert_creates_root_node() {
        let (mut tree, _dir) = open_tree(TreeConfig::new(4096, 64, 4));

        tree.insert(2, 3).unwrap();

        assert_eq!(tree.content(), 1);
        assert_eq!(tree.get(2).unwrap(), Some(3));
        assert_eq!(tree.get(1).unwrap(), None);
    }

    #[test]
    fn lookup_after_insert_holds_for_every_key() {
        let (mut tree, _dir) = open_tree(TreeConfig::new(4096, 64, 4));

        for key in [14u32, 3, 99, 57, 21, 8, 40, 77, 1, 63] {
            tree.insert(key, key * 10).unwrap();
            assert_eq!(tree.get(key).unwrap(), Some(key * 10));
            assert_ordering(&tree);
        }
        assert_eq!(tree.content(), 10);
    }

    #[test]
    fn update_leaves_content_unchanged() {
        let (mut tree, _dir) = open_tree(TreeConfig::new(4096, 64, 4));

        tree.insert(5, 100).unwrap();
        tree.insert(5, 200).unwrap();
        tree.insert(5, 300).unwrap();

        assert_eq!(tree.content(), 1);
        assert_eq!(tree.get(5).unwrap(), Some(300));
    }

    #[test]
    fn reference_scenario_bfactor_four() {
        // Keys {2,4,8,1,3,6,7} with value = key + 1: get(5) misses, get(4)
        // answers exactly with 5.
        let (mut tree, _dir) = open_tree(TreeConfig::new(4096, 64, 4));

        for key in [2u32, 4, 8, 1, 3, 6, 7] {
            tree.insert(key, key + 1).unwrap();
        }

        assert_eq!(tree.get(5).unwrap(), None);
        assert!(!tree.lookup(5).unwrap().exact);
        assert_eq!(tree.get(4).unwrap(), Some(5));
        for key in [2u32, 4, 8, 1, 3, 6, 7] {
            assert_eq!(tree.get(key).unwrap(), Some(key + 1));
        }
        assert_ordering(&tree);
    }

    #[test]
    fn splits_grow_block_height_up_to_limit() {
        let (mut tree, _dir) = open_tree(TreeConfig::new(4096, 64, 4));
        let layout = *tree.layout();

        for key in 0..60u32 {
            tree.insert(key, key).unwrap();
        }

        let mut max_height = 0;
        for position in 0..tree.blocks_alloc() {
            let map = tree.store.load(position).unwrap();
            let block = BlockRef::new(map.bytes(), &layout).unwrap();
            max_height = max_height.max(block.header().height());
        }
        assert!(max_height >= 1, "sixty keys must grow past a single node");
        assert!(max_height <= layout.block_height);
    }

    #[test]
    fn interleaved_inserts_and_updates() {
        let (mut tree, _dir) = open_tree(TreeConfig::new(4096, 64, 4));

        for key in (0..40u32).rev() {
            tree.insert(key, key + 1).unwrap();
        }
        for key in (0..40u32).step_by(2) {
            tree.insert(key, 1000 + key).unwrap();
        }

        assert_eq!(tree.content(), 40);
        for key in 0..40u32 {
            let expected = if key % 2 == 0 { 1000 + key } else { key + 1 };
            assert_eq!(tree.get(key).unwrap(), Some(expected));
        }
        assert_ordering(&tree);
    }
}
