//! # blocktree - Cache-Friendly Disk-Backed Ordered Index
//!
//! blocktree is a disk-backed ordered index mapping 32-bit keys to
//! positional values (byte offsets into a separate payload store). It is a
//! B+tree with an unusual twist: instead of one node per disk page, every
//! fixed-size block packs a small multi-level tree of nodes, so a single
//! memory-mapped block resolves several levels of the search before the next
//! block is touched.
//!
//! ## Quick Start
//!
//! ```ignore
//! use blocktree::{Tree, TreeConfig};
//!
//! let mut tree = Tree::init("./index", TreeConfig::new(4096, 64, 4))?;
//!
//! tree.insert(42, 0x1000)?;       // key 42 lives at payload offset 0x1000
//! assert_eq!(tree.get(42)?, Some(0x1000));
//! assert_eq!(tree.get(43)?, None);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Payload Facade (IndexedHeap)      │  heap + index + tuple cache
//! ├──────────────────┬──────────────────┤
//! │   Record Heap    │   Tree Handle    │  append-only records / counters
//! ├──────────────────┴──────────────────┤
//! │   Search / Insertion Engines        │  node walks, splits, relocation
//! ├─────────────────────────────────────┤
//! │   Node & Value Codec                │  packed slots, tagged values
//! ├─────────────────────────────────────┤
//! │   Block Store (mmap per block)      │  allocation, mapping guards
//! ├─────────────────────────────────────┤
//! │   Layout Planner                    │  geometry, validated at init
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! Two flat files, no superblocks:
//!
//! ```text
//! index     N fixed-size blocks; block 0 is the initial root. Each block
//!           is a 16-byte header plus an array of fixed-size slots, each
//!           slot a B+tree node or free/cache space.
//! records   fixed-size payload records, append-only; the index stores
//!           their byte offsets.
//! ```
//!
//! All bookkeeping lives in the in-memory handles, so the same
//! configuration must be supplied on every initialization for the layout to
//! stay self-consistent.
//!
//! ## Scope
//!
//! Single-threaded and single-writer by design. No deletion, no range
//! scans, no write-ahead log: every operation runs to completion and
//! durability is whatever the file system provides (plus an advisory
//! [`Tree::sync`]).
//!
//! ## Module Overview
//!
//! - [`layout`]: block geometry planning and validation
//! - [`storage`]: the block store, mapping guards and the block/slot codec
//! - [`btree`]: search, insertion, node and block splits, the tuple cache
//! - [`heap`]: the append-only record heap and the indexed facade

pub mod btree;
pub mod heap;
pub mod layout;
pub mod storage;

pub use btree::{Lookup, Tree, Value};
pub use heap::{IndexedHeap, RecordHeap};
pub use layout::{Layout, TreeConfig};
