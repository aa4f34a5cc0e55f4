//! # Block Header and Slot Codec
//!
//! Every block starts with a 16-byte header followed by `block_slots`
//! fixed-size slots. This module owns the packed representation of both and
//! exposes them through borrowed view types in the spirit of a leaf-node
//! page view: [`BlockRef`] for read-only access, [`BlockMut`] for mutation.
//!
//! ## Block Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  ---------------------------------------------
//! 0       1     kind      Bit flags: ROOT (0x20), LEAF (0x80); plain = 0
//! 1       1     height    Embedded tree levels in use (root-only = 0)
//! 2       2     cont      Populated node-slot count
//! 4       4     parent    Parent block position (0 for the root block)
//! 8       4     root      Slot index of the block's internal root node
//! 12      4     reserved
//! ```
//!
//! ## Slot Header Layout (6 bytes)
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  ---------------------------------------------
//! 0       1     tag       CACHE (0x08) or NODE (0x10)
//! 1       1     cont      Keys in a node / records in a cache slot
//! 2       4     parent    Owning node's slot index (split propagation)
//! ```
//!
//! The slot body that follows is interpreted by the node codec (for NODE
//! slots) or the tuple cache (for CACHE slots). A zeroed slot, as produced
//! by file extension, carries tag 0 and is treated as free space exactly
//! like an explicit CACHE tag.
//!
//! All multi-byte fields are little-endian via `zerocopy`'s endian-aware
//! types, so the views transmute directly from mmap'd bytes with no copying
//! and no alignment requirements.

use eyre::{Result, ensure};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::BLOCK_HEADER_SIZE;
use crate::layout::Layout;

/// Block holds the tree root. At most one block carries this flag.
pub const BLOCK_KIND_ROOT: u8 = 0x20;
/// Block may hold terminal CONTENT values.
pub const BLOCK_KIND_LEAF: u8 = 0x80;

/// Slot is free space, possibly holding disposable cached tuples.
pub const SLOT_TAG_CACHE: u8 = 0x08;
/// Slot holds a B+tree node.
pub const SLOT_TAG_NODE: u8 = 0x10;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockHeader {
    kind: u8,
    height: u8,
    cont: U16,
    parent: U32,
    root: U32,
    reserved: [u8; 4],
}

const _: () = assert!(size_of::<BlockHeader>() == BLOCK_HEADER_SIZE);

impl BlockHeader {
    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.kind & BLOCK_KIND_ROOT != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.kind & BLOCK_KIND_LEAF != 0
    }

    pub fn set_kind(&mut self, kind: u8) {
        self.kind = kind;
    }

    pub fn clear_root_flag(&mut self) {
        self.kind &= !BLOCK_KIND_ROOT;
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn set_height(&mut self, height: u8) {
        self.height = height;
    }

    pub fn cont(&self) -> u16 {
        self.cont.get()
    }

    pub fn set_cont(&mut self, cont: u16) {
        self.cont = U16::new(cont);
    }

    pub fn parent(&self) -> u32 {
        self.parent.get()
    }

    pub fn set_parent(&mut self, parent: u32) {
        self.parent = U32::new(parent);
    }

    pub fn root(&self) -> u32 {
        self.root.get()
    }

    pub fn set_root(&mut self, root: u32) {
        self.root = U32::new(root);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SlotHeader {
    tag: u8,
    cont: u8,
    parent: U32,
}

const _: () = assert!(size_of::<SlotHeader>() == crate::layout::SLOT_HEADER_SIZE);

impl SlotHeader {
    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: u8) {
        self.tag = tag;
    }

    pub fn cont(&self) -> u8 {
        self.cont
    }

    pub fn set_cont(&mut self, cont: u8) {
        self.cont = cont;
    }

    pub fn parent(&self) -> u32 {
        self.parent.get()
    }

    pub fn set_parent(&mut self, parent: u32) {
        self.parent = U32::new(parent);
    }
}

/// Read-only view over one mapped block.
#[derive(Debug, Clone, Copy)]
pub struct BlockRef<'a> {
    data: &'a [u8],
    layout: &'a Layout,
}

impl<'a> BlockRef<'a> {
    pub fn new(data: &'a [u8], layout: &'a Layout) -> Result<Self> {
        ensure!(
            data.len() == layout.block_size,
            "invalid block size: {} != {}",
            data.len(),
            layout.block_size
        );
        Ok(Self { data, layout })
    }

    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    pub fn header(&self) -> &'a BlockHeader {
        // Infallible: `new` checked the length and the header is unaligned.
        BlockHeader::ref_from_bytes(&self.data[..BLOCK_HEADER_SIZE]).unwrap()
    }

    pub fn slot_header(&self, slot: u32) -> Result<&'a SlotHeader> {
        let offset = self.checked_slot_offset(slot)?;
        Ok(SlotHeader::ref_from_bytes(
            &self.data[offset..offset + crate::layout::SLOT_HEADER_SIZE],
        )
        .unwrap())
    }

    pub fn slot_tag(&self, slot: u32) -> Result<u8> {
        Ok(self.slot_header(slot)?.tag())
    }

    /// Full raw bytes of one slot, header included.
    pub fn slot_bytes(&self, slot: u32) -> Result<&'a [u8]> {
        let offset = self.checked_slot_offset(slot)?;
        Ok(&self.data[offset..offset + self.layout.slot_size])
    }

    fn checked_slot_offset(&self, slot: u32) -> Result<usize> {
        ensure!(
            (slot as usize) < self.layout.block_slots,
            "slot {} out of bounds (block_slots={})",
            slot,
            self.layout.block_slots
        );
        Ok(self.layout.slot_offset(slot))
    }
}

/// Mutable view over one mapped block.
#[derive(Debug)]
pub struct BlockMut<'a> {
    data: &'a mut [u8],
    layout: &'a Layout,
}

impl<'a> BlockMut<'a> {
    pub fn new(data: &'a mut [u8], layout: &'a Layout) -> Result<Self> {
        ensure!(
            data.len() == layout.block_size,
            "invalid block size: {} != {}",
            data.len(),
            layout.block_size
        );
        Ok(Self { data, layout })
    }

    /// Reborrows as a read-only view.
    pub fn as_ref(&self) -> BlockRef<'_> {
        BlockRef {
            data: self.data,
            layout: self.layout,
        }
    }

    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    /// Stamps a fresh header and tags every slot CACHE, the state every
    /// block passes through before holding any node.
    pub fn init(&mut self, kind: u8, parent: u32) {
        {
            let header = self.header_mut();
            header.set_kind(kind);
            header.set_height(0);
            header.set_cont(0);
            header.set_parent(parent);
            header.set_root(0);
        }
        for slot in 0..self.layout.block_slots as u32 {
            let header = self.slot_header_mut(slot).unwrap();
            header.set_tag(SLOT_TAG_CACHE);
            header.set_cont(0);
            header.set_parent(0);
        }
    }

    pub fn header(&self) -> &BlockHeader {
        BlockHeader::ref_from_bytes(&self.data[..BLOCK_HEADER_SIZE]).unwrap()
    }

    pub fn header_mut(&mut self) -> &mut BlockHeader {
        BlockHeader::mut_from_bytes(&mut self.data[..BLOCK_HEADER_SIZE]).unwrap()
    }

    pub fn slot_header(&self, slot: u32) -> Result<&SlotHeader> {
        self.as_ref().slot_header(slot)
    }

    pub fn slot_header_mut(&mut self, slot: u32) -> Result<&mut SlotHeader> {
        let offset = self.checked_slot_offset(slot)?;
        Ok(SlotHeader::mut_from_bytes(
            &mut self.data[offset..offset + crate::layout::SLOT_HEADER_SIZE],
        )
        .unwrap())
    }

    pub fn slot_bytes_mut(&mut self, slot: u32) -> Result<&mut [u8]> {
        let offset = self.checked_slot_offset(slot)?;
        let slot_size = self.layout.slot_size;
        Ok(&mut self.data[offset..offset + slot_size])
    }

    /// Returns a slot to free/cache space and drops it from the populated
    /// count. Used when a block split vacates relocated node slots.
    pub fn retire_slot(&mut self, slot: u32) -> Result<()> {
        {
            let header = self.slot_header_mut(slot)?;
            ensure!(
                header.tag() == SLOT_TAG_NODE,
                "cannot retire slot {}: not a node",
                slot
            );
            header.set_tag(SLOT_TAG_CACHE);
            header.set_cont(0);
            header.set_parent(0);
        }
        let cont = self.header().cont();
        self.header_mut().set_cont(cont - 1);
        Ok(())
    }

    fn checked_slot_offset(&self, slot: u32) -> Result<usize> {
        ensure!(
            (slot as usize) < self.layout.block_slots,
            "slot {} out of bounds (block_slots={})",
            slot,
            self.layout.block_slots
        );
        Ok(self.layout.slot_offset(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TreeConfig;

    fn test_layout() -> Layout {
        Layout::plan(&TreeConfig::new(1024, 48, 3)).unwrap()
    }

    #[test]
    fn header_is_sixteen_bytes() {
        assert_eq!(size_of::<BlockHeader>(), BLOCK_HEADER_SIZE);
        assert_eq!(size_of::<SlotHeader>(), crate::layout::SLOT_HEADER_SIZE);
    }

    #[test]
    fn init_tags_every_slot_cache() {
        let layout = test_layout();
        let mut data = vec![0xFFu8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();

        block.init(BLOCK_KIND_ROOT | BLOCK_KIND_LEAF, 0);

        assert!(block.header().is_root());
        assert!(block.header().is_leaf());
        assert_eq!(block.header().height(), 0);
        assert_eq!(block.header().cont(), 0);
        for slot in 0..layout.block_slots as u32 {
            assert_eq!(block.slot_header(slot).unwrap().tag(), SLOT_TAG_CACHE);
            assert_eq!(block.slot_header(slot).unwrap().cont(), 0);
        }
    }

    #[test]
    fn header_round_trip() {
        let layout = test_layout();
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();

        block.init(BLOCK_KIND_LEAF, 7);
        block.header_mut().set_height(2);
        block.header_mut().set_cont(5);
        block.header_mut().set_root(3);

        let view = BlockRef::new(&data, &layout).unwrap();
        let header = view.header();
        assert!(!header.is_root());
        assert!(header.is_leaf());
        assert_eq!(header.height(), 2);
        assert_eq!(header.cont(), 5);
        assert_eq!(header.parent(), 7);
        assert_eq!(header.root(), 3);
    }

    #[test]
    fn root_flag_clears_without_touching_leaf() {
        let layout = test_layout();
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();

        block.init(BLOCK_KIND_ROOT | BLOCK_KIND_LEAF, 0);
        block.header_mut().clear_root_flag();

        assert!(!block.header().is_root());
        assert!(block.header().is_leaf());
    }

    #[test]
    fn slot_bounds_are_checked() {
        let layout = test_layout();
        let data = vec![0u8; layout.block_size];
        let view = BlockRef::new(&data, &layout).unwrap();

        assert!(view.slot_header(layout.block_slots as u32 - 1).is_ok());
        assert!(view.slot_header(layout.block_slots as u32).is_err());
    }

    #[test]
    fn wrong_buffer_length_rejected() {
        let layout = test_layout();
        let data = vec![0u8; layout.block_size - 1];

        assert!(BlockRef::new(&data, &layout).is_err());
    }

    #[test]
    fn retire_requires_node_tag() {
        let layout = test_layout();
        let mut data = vec![0u8; layout.block_size];
        let mut block = BlockMut::new(&mut data, &layout).unwrap();
        block.init(BLOCK_KIND_LEAF, 0);

        assert!(block.retire_slot(0).is_err());
    }
}
