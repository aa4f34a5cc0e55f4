//! # Storage Module
//!
//! The foundational storage layer: a flat index file of fixed-size blocks,
//! accessed through short-lived memory mappings.
//!
//! ## File Format
//!
//! The index file is nothing but concatenated blocks:
//!
//! ```text
//! Offset 0:              Block 0   (initially the root block)
//! Offset block_size:     Block 1
//! Offset 2*block_size:   Block 2
//! ...
//! ```
//!
//! A block's ordinal position times the configured block size is its file
//! offset. There is no superblock: the tree handle keeps all bookkeeping in
//! memory, and callers must supply the same configuration on every
//! initialization for the layout to stay self-consistent.
//!
//! ## Mapping Discipline
//!
//! Unlike a pager that maps the whole file once, this layer maps exactly one
//! block per request and unmaps it when the returned guard drops. A search
//! descending through four blocks performs four map/unmap pairs. The root
//! block gets no special treatment; it is remapped lazily per operation.
//!
//! Within a single operation at most a handful of blocks are mapped at once
//! (a block split touches the splitting block, its two new blocks and
//! possibly the former parent). Dropping the guard releases the mapping on
//! every exit path, error paths included.
//!
//! ## Module Layout
//!
//! - [`mmap`]: the [`BlockStore`] (file ownership, block allocation) and the
//!   [`MappedBlock`]/[`MappedBlockMut`] mapping guards
//! - [`block`]: the block header codec and the slot-level view types

pub mod block;
pub mod mmap;

pub use block::{
    BLOCK_KIND_LEAF, BLOCK_KIND_ROOT, BlockHeader, BlockMut, BlockRef, SLOT_TAG_CACHE,
    SLOT_TAG_NODE, SlotHeader,
};
pub use mmap::{BlockStore, MappedBlock, MappedBlockMut};

/// Bytes of the header at the start of every block.
pub const BLOCK_HEADER_SIZE: usize = 16;
