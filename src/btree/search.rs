//! # Search Engine
//!
//! Lookup walks two kinds of edges: NODE values within a block's embedded
//! tree, and BLOCK values crossing into another block. A single key visits
//! at most `block_height + 1` nodes per block and one block per tree level,
//! so the whole walk is O(log(content)) node inspections with no heap
//! allocation.
//!
//! ## Within a Node
//!
//! [`search_node`] is the one place the interleaved key/value rule is
//! interpreted: scan for the first key above the probe; the value at that
//! boundary covers the probe's range, and the probe is exact when the key
//! immediately left of the boundary equals it. A NODE-tagged slot with zero
//! keys is a broken invariant and fails loudly.
//!
//! ## Within a Block
//!
//! [`search_block`] starts at the block's internal root slot and keeps
//! following NODE values. Any other tag terminates the walk; the walk never
//! dereferences a non-NODE slot expecting node content, and a chain longer
//! than the block's height bound means the block is corrupt.

use eyre::{Result, bail, ensure};

use super::node::{NodeRef, Value};
use crate::storage::BlockRef;

/// Outcome of a block-local walk: the terminal value, whether the last key
/// comparison was exact, and the slot of the node that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHit {
    pub exact: bool,
    pub value: Value,
    pub slot: u32,
}

/// Scans one node for `key` and returns the value covering its range.
///
/// For the first stored key above the probe, the probe is exact when the key
/// just left of that boundary equals it; when no stored key is above the
/// probe, the last value covers it and exactness compares against the last
/// key.
pub fn search_node(node: &NodeRef<'_>, key: u32) -> Result<(bool, Value)> {
    let cont = node.cont();
    ensure!(cont > 0, "empty node slot reached during search");

    for i in 0..cont {
        if key < node.key_at(i)? {
            let exact = i > 0 && node.key_at(i - 1)? == key;
            return Ok((exact, node.value_at(i)?));
        }
    }

    let exact = node.key_at(cont - 1)? == key;
    Ok((exact, node.value_at(cont)?))
}

/// Walks the block's embedded tree from its internal root to a terminal
/// value (anything not NODE-tagged).
pub fn search_block(block: &BlockRef<'_>, key: u32) -> Result<BlockHit> {
    let mut slot = block.header().root();
    let max_steps = block.layout().block_height as usize + 1;

    for _ in 0..max_steps {
        let node = block.node(slot)?;
        let (exact, value) = search_node(&node, key)?;
        match value {
            Value::Node(next) => slot = next,
            value => return Ok(BlockHit { exact, value, slot }),
        }
    }

    bail!(
        "node chain exceeds block height {} (corrupt block)",
        block.layout().block_height
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Layout, TreeConfig};
    use crate::storage::{BLOCK_KIND_LEAF, BLOCK_KIND_ROOT, BlockMut};

    fn test_layout() -> Layout {
        Layout::plan(&TreeConfig::new(1024, 64, 4)).unwrap()
    }

    fn block_with_leaf_node(layout: &Layout) -> Vec<u8> {
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, layout).unwrap();
        block.init(BLOCK_KIND_ROOT | BLOCK_KIND_LEAF, 0);
        block.init_node(0).unwrap();
        let mut node = block.node_mut(0).unwrap();
        node.insert_pair(10, Value::Content(100)).unwrap();
        node.insert_pair(20, Value::Content(200)).unwrap();
        data
    }

    #[test]
    fn search_node_exact_and_range() {
        let layout = test_layout();
        let data = block_with_leaf_node(&layout);
        let block = BlockRef::new(&data, &layout).unwrap();
        let node = block.node(0).unwrap();

        // Below every key: leftmost value, never exact.
        assert_eq!(search_node(&node, 5).unwrap(), (false, Value::Null));
        // Exact first key: its right-hand value.
        assert_eq!(search_node(&node, 10).unwrap(), (true, Value::Content(100)));
        // Between keys: the covering value, not exact.
        assert_eq!(
            search_node(&node, 15).unwrap(),
            (false, Value::Content(100))
        );
        // Exact last key.
        assert_eq!(search_node(&node, 20).unwrap(), (true, Value::Content(200)));
        // Above every key.
        assert_eq!(
            search_node(&node, 99).unwrap(),
            (false, Value::Content(200))
        );
    }

    #[test]
    fn search_node_rejects_empty_node() {
        let layout = test_layout();
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();
        block.init(BLOCK_KIND_LEAF, 0);
        block.init_node(0).unwrap();

        let view = BlockRef::new(&data, &layout).unwrap();
        let node = view.node(0).unwrap();
        let result = search_node(&node, 1);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty node slot"));
    }

    #[test]
    fn search_block_follows_node_edges() {
        let layout = test_layout();
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();
        block.init(BLOCK_KIND_ROOT | BLOCK_KIND_LEAF, 0);

        // Root node at slot 2 routing to leaf nodes at slots 0 and 1.
        block.init_node(0).unwrap();
        block.init_node(1).unwrap();
        block.init_node(2).unwrap();
        {
            let mut leaf = block.node_mut(0).unwrap();
            leaf.insert_pair(3, Value::Content(30)).unwrap();
            leaf.set_parent(2);
        }
        {
            let mut leaf = block.node_mut(1).unwrap();
            leaf.insert_pair(10, Value::Content(100)).unwrap();
            leaf.set_parent(2);
        }
        {
            let mut root = block.node_mut(2).unwrap();
            root.set_value(0, Value::Node(0)).unwrap();
            root.insert_pair(10, Value::Node(1)).unwrap();
        }
        block.header_mut().set_root(2);
        block.header_mut().set_height(1);

        let view = BlockRef::new(&data, &layout).unwrap();

        let hit = search_block(&view, 3).unwrap();
        assert_eq!(hit, BlockHit {
            exact: true,
            value: Value::Content(30),
            slot: 0
        });

        let hit = search_block(&view, 10).unwrap();
        assert_eq!(hit, BlockHit {
            exact: true,
            value: Value::Content(100),
            slot: 1
        });

        let hit = search_block(&view, 4).unwrap();
        assert_eq!(hit.exact, false);
        assert_eq!(hit.value, Value::Content(30));
        assert_eq!(hit.slot, 0);
    }

    #[test]
    fn search_block_terminates_on_block_value() {
        let layout = test_layout();
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();
        block.init(BLOCK_KIND_ROOT, 0);
        block.init_node(0).unwrap();
        {
            let mut node = block.node_mut(0).unwrap();
            node.set_value(0, Value::Block(4)).unwrap();
            node.insert_pair(50, Value::Block(7)).unwrap();
        }

        let view = BlockRef::new(&data, &layout).unwrap();

        assert_eq!(search_block(&view, 1).unwrap().value, Value::Block(4));
        assert_eq!(search_block(&view, 50).unwrap().value, Value::Block(7));
        assert_eq!(search_block(&view, 60).unwrap().value, Value::Block(7));
    }

    #[test]
    fn search_block_detects_node_cycles() {
        let layout = test_layout();
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();
        block.init(BLOCK_KIND_ROOT, 0);
        block.init_node(0).unwrap();
        {
            let mut node = block.node_mut(0).unwrap();
            node.insert_pair(1, Value::Node(0)).unwrap();
        }

        let view = BlockRef::new(&data, &layout).unwrap();
        let result = search_block(&view, 5);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("exceeds block height")
        );
    }
}
