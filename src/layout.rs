//! # Block Layout Planning
//!
//! This module derives a node-per-block layout from a configured block size,
//! slot size and branching factor. The planner runs exactly once, at index
//! initialization; every other component treats the resulting [`Layout`] as
//! immutable geometry.
//!
//! ## The Packing Problem
//!
//! A block is a fixed-size unit of the index file holding a 16-byte header
//! followed by an array of fixed-size slots. Each slot either holds one
//! B+tree node or serves as free/cache space. The planner answers three
//! questions:
//!
//! 1. How many slots fit in a block?
//!    `block_slots = (block_size - BLOCK_HEADER_SIZE) / slot_size`
//!
//! 2. How many keys and values fit in a node slot? A node stores a 6-byte
//!    slot header, `kfactor = bfactor - 1` keys of 4 bytes and `bfactor`
//!    tagged values of 5 bytes. The configuration is rejected when that does
//!    not fit in `slot_size`.
//!
//! 3. How deep may the embedded tree grow? `block_height` is the largest `h`
//!    such that a complete `bfactor`-ary tree of height `h` fits in the
//!    available slots:
//!
//!    ```text
//!    block_nodes = sum(bfactor^i for i in 0..=h) <= block_slots
//!    ```
//!
//!    Slots beyond `block_nodes` are never claimed by nodes; they remain
//!    available as tuple-cache space for the block's whole lifetime.
//!
//! ## Worked Example
//!
//! `block_size = 4096`, `slot_size = 64`, `bfactor = 4`:
//!
//! ```text
//! block_slots  = (4096 - 16) / 64 = 63
//! node bytes   = 6 + 3*4 + 4*5   = 38  (fits in 64)
//! block_height = 2   (1 + 4 + 16 = 21 <= 63, 1 + 4 + 16 + 64 = 85 > 63)
//! block_nodes  = 21
//! ```
//!
//! ## Failure Model
//!
//! Configuration errors are fatal at initialization and never retried. Every
//! rejection carries an "invalid config" message so callers can tell a bad
//! parameter set apart from a storage failure.

use eyre::{Result, ensure};

use crate::storage::BLOCK_HEADER_SIZE;

/// Bytes of a slot header: tag, key count, parent slot back-reference.
pub const SLOT_HEADER_SIZE: usize = 6;

/// Bytes of one key on disk.
pub const KEY_SIZE: usize = 4;

/// Bytes of one tagged value on disk: 1-byte tag + 4-byte payload.
pub const VALUE_SIZE: usize = 5;

/// Bytes of the key stored alongside each cached record.
pub const CACHE_KEY_SIZE: usize = 4;

/// Default payload record size used when the caller does not override it.
/// Matches the fixed tuple the reference drivers store (id + name + items).
pub const DEFAULT_RECORD_SIZE: usize = 32;

/// User-facing configuration for [`Tree::init`](crate::Tree::init).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    pub block_size: usize,
    pub slot_size: usize,
    pub bfactor: usize,
    pub record_size: usize,
}

impl TreeConfig {
    pub fn new(block_size: usize, slot_size: usize, bfactor: usize) -> Self {
        Self {
            block_size,
            slot_size,
            bfactor,
            record_size: DEFAULT_RECORD_SIZE,
        }
    }

    /// Overrides the fixed payload record size used for cache-capacity
    /// planning and the record heap.
    pub fn with_record_size(mut self, record_size: usize) -> Self {
        self.record_size = record_size;
        self
    }
}

/// Planned block geometry. Computed once at init, copied freely afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub block_size: usize,
    pub slot_size: usize,
    /// Max children per node.
    pub bfactor: usize,
    /// Max keys per node (`bfactor - 1`).
    pub kfactor: usize,
    /// Total slots per block, cache-only slots included.
    pub block_slots: usize,
    /// Slots usable as a complete embedded tree; the node allocator never
    /// claims a slot at or beyond this index.
    pub block_nodes: usize,
    /// Max embedded tree levels per block, counted in edges: a block holding
    /// only its root node has height 0.
    pub block_height: u8,
    /// Cached records that fit in one cache slot.
    pub cache_records: usize,
    /// Fixed payload record size in bytes.
    pub record_size: usize,
}

impl Layout {
    /// Validates a configuration and derives the block geometry.
    pub fn plan(config: &TreeConfig) -> Result<Self> {
        let TreeConfig {
            block_size,
            slot_size,
            bfactor,
            record_size,
        } = *config;

        ensure!(
            bfactor >= 3,
            "invalid config: branching factor {} below minimum 3 (a node must split into two non-trivial halves)",
            bfactor
        );
        ensure!(
            bfactor - 1 <= u8::MAX as usize,
            "invalid config: branching factor {} exceeds the {}-key slot header limit",
            bfactor,
            u8::MAX
        );
        ensure!(
            record_size > 0,
            "invalid config: record size must be non-zero"
        );

        let kfactor = bfactor - 1;

        let node_bytes = SLOT_HEADER_SIZE + kfactor * KEY_SIZE + bfactor * VALUE_SIZE;
        ensure!(
            node_bytes <= slot_size,
            "invalid config: slot size {} cannot hold a node with {} keys and {} values ({} bytes required)",
            slot_size,
            kfactor,
            bfactor,
            node_bytes
        );

        ensure!(
            block_size > BLOCK_HEADER_SIZE,
            "invalid config: block size {} does not exceed the {}-byte block header",
            block_size,
            BLOCK_HEADER_SIZE
        );

        let block_slots = (block_size - BLOCK_HEADER_SIZE) / slot_size;
        ensure!(
            block_slots >= 1,
            "invalid config: block size {} holds no {}-byte slot after the header",
            block_size,
            slot_size
        );

        // The slot header counts cached records in one byte.
        let cache_records =
            ((slot_size - SLOT_HEADER_SIZE) / (CACHE_KEY_SIZE + record_size)).min(u8::MAX as usize);
        ensure!(
            cache_records >= 1,
            "invalid config: slot size {} cannot cache a single {}-byte record",
            slot_size,
            record_size
        );

        // Largest complete bfactor-ary tree that fits in block_slots.
        let mut block_height: u8 = 0;
        let mut block_nodes: u64 = 1;
        let mut level: u64 = 1;
        loop {
            let next = level.saturating_mul(bfactor as u64);
            let grown = block_nodes.saturating_add(next);
            if grown > block_slots as u64 || grown > u16::MAX as u64 || block_height == u8::MAX {
                break;
            }
            block_height += 1;
            block_nodes = grown;
            level = next;
        }

        Ok(Self {
            block_size,
            slot_size,
            bfactor,
            kfactor,
            block_slots,
            block_nodes: block_nodes as usize,
            block_height,
            cache_records,
            record_size,
        })
    }

    /// Byte offset of a slot within a block.
    pub fn slot_offset(&self, slot: u32) -> usize {
        BLOCK_HEADER_SIZE + slot as usize * self.slot_size
    }
}
