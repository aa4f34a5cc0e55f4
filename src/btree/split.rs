//! # Block Split
//!
//! When a block's internal root node fills and the block has no height left
//! to grow, the block itself splits. This is the one operation that moves
//! structure between blocks, and the one invariant it must never bend: a
//! NODE value is only valid inside the block that owns it.
//!
//! ## The Shape of a Split
//!
//! ```text
//!            before                            after
//!
//!         ┌─────────┐                      ┌─────────┐
//!         │ B: full │                      │ P:      │  new subtree root
//!         │ root at │                      │ [B|sep|S]│
//!         │ max h   │                      └──┬───┬──┘
//!         └─────────┘                 ┌───────┘   └───────┐
//!                                ┌────▼────┐         ┌────▼────┐
//!                                │ B: lower│         │ S: upper│
//!                                │ half    │         │ half    │
//!                                └─────────┘         └─────────┘
//! ```
//!
//! The splitting block's root node is cut exactly like an in-block node
//! split, but the sibling half becomes the root node of a brand-new sibling
//! block, and instead of promoting the separator into a parent node, a new
//! root-of-subtree block is allocated holding a single two-child node:
//! `value[0] = BLOCK(B)`, `value[1] = BLOCK(S)`, separator = S's first key.
//!
//! ## Subtree Relocation
//!
//! Every node reachable from the moved values is relocated slot-by-slot
//! from the old block into the sibling, depth-first. Each relocated node's
//! NODE values are rewritten to the sibling-local slot indices of its moved
//! children, its parent back-reference is rewritten, and the vacated slot
//! in the old block is re-tagged CACHE. BLOCK values encountered along the
//! way keep their payload but the referenced child block's parent pointer
//! is repointed at the sibling, so later splits of that child can still
//! find their parent. Recursion depth is bounded by the block height.
//!
//! ## Reattachment
//!
//! The old block's parent pointer moves to the new root-of-subtree block.
//! When the old block was the tree root, the tree's root position moves and
//! the ROOT flag migrates; otherwise the former parent block's BLOCK
//! reference to the old block is rewritten to the new subtree root, which
//! would otherwise be unreachable.

use eyre::{Result, bail, ensure};

use super::node::Value;
use super::tree::Tree;
use crate::storage::{
    BLOCK_KIND_LEAF, BLOCK_KIND_ROOT, BlockMut, BlockStore, MappedBlockMut, SLOT_TAG_NODE,
};

impl Tree {
    /// Splits the block at `position`, whose internal root node is full at
    /// maximum height. `map` is the caller's writable mapping of it.
    pub(crate) fn split_block(&mut self, position: u32, map: &mut MappedBlockMut) -> Result<()> {
        let layout = self.layout;
        let sibling_pos = self.store.allocate()?;
        let subroot_pos = self.store.allocate()?;

        let mut sibling_map = self.store.load_mut(sibling_pos)?;
        let mut subroot_map = self.store.load_mut(subroot_pos)?;

        let mut old = BlockMut::new(map.bytes_mut(), &layout)?;
        let mut sibling = BlockMut::new(sibling_map.bytes_mut(), &layout)?;
        let mut subroot = BlockMut::new(subroot_map.bytes_mut(), &layout)?;

        let was_root = old.header().is_root();
        let old_parent = old.header().parent();
        let height = old.header().height();

        sibling.init(old.header().kind() & BLOCK_KIND_LEAF, subroot_pos);
        subroot.init(
            if was_root { BLOCK_KIND_ROOT } else { 0 },
            if was_root { 0 } else { old_parent },
        );

        // Cut the old block's root node; the upper half seeds the sibling's
        // root node.
        let kfactor = layout.kfactor;
        let mid = layout.bfactor / 2;
        let root_slot = old.header().root();

        let mut keys = Vec::with_capacity(kfactor);
        let mut values = Vec::with_capacity(kfactor + 1);
        {
            let node = old.node(root_slot)?;
            ensure!(
                node.cont() == kfactor,
                "block split with root node at {} keys (expected {})",
                node.cont(),
                kfactor
            );
            for i in 0..kfactor {
                keys.push(node.key_at(i)?);
            }
            for i in 0..=kfactor {
                values.push(node.value_at(i)?);
            }
        }
        let separator = keys[mid];

        let sibling_root = sibling.alloc_node_slot()?;
        {
            let mut node = sibling.node_mut(sibling_root)?;
            node.set_parent(sibling_root);
            for (i, &k) in keys[mid..].iter().enumerate() {
                node.set_key(i, k)?;
            }
            node.set_value(0, Value::Null)?;
            for i in 0..(kfactor - mid) {
                node.set_value(i + 1, values[mid + 1 + i])?;
            }
            node.set_cont((kfactor - mid) as u8);
        }
        sibling.header_mut().set_root(sibling_root);
        sibling.header_mut().set_height(height);

        {
            let mut node = old.node_mut(root_slot)?;
            node.set_cont(mid as u8);
            for i in mid..kfactor {
                node.set_key(i, 0)?;
            }
            for i in (mid + 1)..=kfactor {
                node.set_value(i, Value::Null)?;
            }
        }

        // Pull the sibling half's entire subtree across the block boundary.
        adopt_children(
            &mut old,
            &mut sibling,
            &self.store,
            sibling_pos,
            sibling_root,
        )?;

        // The new subtree root routes between the two halves.
        let subroot_node = subroot.alloc_node_slot()?;
        {
            let mut node = subroot.node_mut(subroot_node)?;
            node.set_parent(subroot_node);
            node.set_key(0, separator)?;
            node.set_value(0, Value::Block(position))?;
            node.set_value(1, Value::Block(sibling_pos))?;
            node.set_cont(1);
        }

        old.header_mut().clear_root_flag();
        old.header_mut().set_parent(subroot_pos);

        if was_root {
            self.root = subroot_pos;
        } else {
            let mut parent_map = self.store.load_mut(old_parent)?;
            let mut parent = BlockMut::new(parent_map.bytes_mut(), &layout)?;
            replace_block_ref(&mut parent, position, subroot_pos)?;
        }

        tracing::debug!(
            block = position,
            sibling = sibling_pos,
            subroot = subroot_pos,
            separator,
            was_root,
            "split block"
        );
        Ok(())
    }
}

/// Fixes up one relocated (or seeded) node in the sibling block: NODE
/// values trigger recursive relocation of the referenced subtree out of the
/// old block, BLOCK values repoint the referenced child block's parent at
/// the sibling.
fn adopt_children(
    old: &mut BlockMut<'_>,
    sibling: &mut BlockMut<'_>,
    store: &BlockStore,
    sibling_pos: u32,
    slot: u32,
) -> Result<()> {
    let cont = sibling.node(slot)?.cont();
    for i in 0..=cont {
        match sibling.node(slot)?.value_at(i)? {
            Value::Node(source) => {
                let moved = relocate_subtree(old, sibling, store, sibling_pos, source, slot)?;
                sibling.node_mut(slot)?.set_value(i, Value::Node(moved))?;
            }
            Value::Block(child) => {
                let mut child_map = store.load_mut(child)?;
                let mut child_block = BlockMut::new(child_map.bytes_mut(), sibling.layout())?;
                child_block.header_mut().set_parent(sibling_pos);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Moves the node at `source` (and, recursively, everything below it) from
/// the old block into the sibling. Returns the sibling-local slot index.
fn relocate_subtree(
    old: &mut BlockMut<'_>,
    sibling: &mut BlockMut<'_>,
    store: &BlockStore,
    sibling_pos: u32,
    source: u32,
    parent: u32,
) -> Result<u32> {
    let destination = sibling.alloc_node_slot()?;
    {
        let bytes = old.as_ref().slot_bytes(source)?.to_vec();
        sibling.slot_bytes_mut(destination)?.copy_from_slice(&bytes);
    }
    sibling.node_mut(destination)?.set_parent(parent);

    adopt_children(old, sibling, store, sibling_pos, destination)?;

    old.retire_slot(source)?;
    Ok(destination)
}

/// Rewrites the single BLOCK value in `parent` that references `from` so it
/// references `to`. The reference must exist; a split whose parent has no
/// edge to the splitting block means the index is corrupt.
fn replace_block_ref(parent: &mut BlockMut<'_>, from: u32, to: u32) -> Result<()> {
    let block_nodes = parent.layout().block_nodes as u32;
    for slot in 0..block_nodes {
        if parent.slot_header(slot)?.tag() != SLOT_TAG_NODE {
            continue;
        }
        let cont = parent.node(slot)?.cont();
        for i in 0..=cont {
            if parent.node(slot)?.value_at(i)? == Value::Block(from) {
                parent.node_mut(slot)?.set_value(i, Value::Block(to))?;
                return Ok(());
            }
        }
    }
    bail!(
        "unresolvable block reference: parent holds no edge to block {}",
        from
    );
}
