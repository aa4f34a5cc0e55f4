//! # Tree Handle
//!
//! [`Tree`] is the entry point the payload layer talks to. It owns the
//! index file through the block store, carries the planned layout and the
//! aggregate counters (total keys, allocated blocks, root block position),
//! and dispatches lookups and inserts.
//!
//! All bookkeeping lives in this in-memory handle; the index file itself
//! has no superblock. Dropping the handle closes the file with no implicit
//! flush beyond what the shared mappings already made visible; call
//! [`Tree::sync`] first if the file should reach stable storage.

use std::path::Path;

use eyre::{Result, ensure};

use super::node::Value;
use super::search::search_block;
use crate::layout::{Layout, TreeConfig};
use crate::storage::{BLOCK_KIND_LEAF, BLOCK_KIND_ROOT, BlockMut, BlockRef, BlockStore};

/// Where a key's search terminated: the block and node slot that own the
/// terminal value. Feeds the insertion engine and the cached read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// True only when the terminal value is CONTENT bound to the exact key.
    pub exact: bool,
    pub value: Value,
    /// Block position owning the terminal node.
    pub block: u32,
    /// Slot index of the terminal node within that block.
    pub slot: u32,
}

/// A disk-backed ordered index mapping 32-bit keys to payload offsets.
#[derive(Debug)]
pub struct Tree {
    pub(crate) store: BlockStore,
    pub(crate) layout: Layout,
    pub(crate) root: u32,
    pub(crate) content: u64,
}

impl Tree {
    /// Creates the index file and its root block. Configuration errors and
    /// storage errors are both fatal; nothing is retried.
    pub fn init<P: AsRef<Path>>(path: P, config: TreeConfig) -> Result<Self> {
        let layout = Layout::plan(&config)?;
        let mut store = BlockStore::create(path, layout.block_size)?;

        let root = store.allocate()?;
        {
            let mut map = store.load_mut(root)?;
            let mut block = BlockMut::new(map.bytes_mut(), &layout)?;
            block.init(BLOCK_KIND_ROOT | BLOCK_KIND_LEAF, 0);
        }

        tracing::debug!(
            block_size = layout.block_size,
            slot_size = layout.slot_size,
            bfactor = layout.bfactor,
            block_slots = layout.block_slots,
            block_nodes = layout.block_nodes,
            block_height = layout.block_height,
            cache_records = layout.cache_records,
            "planned index layout"
        );

        Ok(Self {
            store,
            layout,
            root,
            content: 0,
        })
    }

    /// Descends from the root block to the terminal value covering `key`,
    /// hopping BLOCK references and tracking the owning block position.
    pub fn lookup(&self, key: u32) -> Result<Lookup> {
        if self.content == 0 {
            return Ok(Lookup {
                exact: false,
                value: Value::Null,
                block: self.root,
                slot: 0,
            });
        }

        let layout = self.layout;
        let mut position = self.root;
        let mut hops = 0u32;

        loop {
            let map = self.store.load(position)?;
            let block = BlockRef::new(map.bytes(), &layout)?;
            let hit = search_block(&block, key)?;

            match hit.value {
                Value::Block(next) => {
                    hops += 1;
                    ensure!(
                        hops < self.store.block_count(),
                        "block reference chain exceeds {} allocated blocks (corrupt index)",
                        self.store.block_count()
                    );
                    position = next;
                }
                value => {
                    let exact = hit.exact && matches!(value, Value::Content(_));
                    return Ok(Lookup {
                        exact,
                        value,
                        block: position,
                        slot: hit.slot,
                    });
                }
            }
        }
    }

    /// Point lookup. A miss is a normal outcome, not an error.
    pub fn get(&self, key: u32) -> Result<Option<u32>> {
        let hit = self.lookup(key)?;
        Ok(match (hit.exact, hit.value) {
            (true, Value::Content(offset)) => Some(offset),
            _ => None,
        })
    }

    /// Total keys in the index.
    pub fn content(&self) -> u64 {
        self.content
    }

    /// Number of allocated blocks in the index file.
    pub fn blocks_alloc(&self) -> u32 {
        self.store.block_count()
    }

    /// Position of the current root block.
    pub fn root_block(&self) -> u32 {
        self.root
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Maps one block read-only. Intended for inspection and structural
    /// audits; ordinary callers go through [`Tree::get`].
    pub fn load_block(&self, position: u32) -> Result<crate::storage::MappedBlock> {
        self.store.load(position)
    }

    /// Flushes the index file to stable storage. Purely advisory; the index
    /// makes no crash-consistency promises.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }
}
