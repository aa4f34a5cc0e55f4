//! # Per-Block Tuple Cache
//!
//! Slots that do not currently hold a node are not wasted: they serve as an
//! opportunistic cache of recently read payload records, keyed by index key.
//! A search that lands in a block can often answer from bytes already mapped
//! instead of touching the record file at all.
//!
//! ## Cache Slot Layout
//!
//! ```text
//! Offset  Content
//! ------  -------
//! 0       SlotHeader (tag=CACHE, cont = cached records, parent unused)
//! 6       entry[0]: key (4 bytes LE) | record (record_size bytes)
//! ...     up to cache_records entries
//! ```
//!
//! ## Disposability
//!
//! The cache carries no correctness obligations. Node allocation claims
//! slots from the bottom of the slot array and wipes whatever they cached;
//! a block split retires slots the same way. A probe miss is a normal
//! outcome and every store may be silently undone later. Callers treat the
//! cache purely as a shortcut in front of the record heap.
//!
//! Cache traffic therefore prefers the *top* of the slot array: the slots
//! past `block_nodes` are never claimed by nodes, and the high end of the
//! allocatable region is claimed last.

use eyre::{Result, ensure};

use super::tree::Tree;
use crate::layout::{CACHE_KEY_SIZE, Layout, SLOT_HEADER_SIZE};
use crate::storage::{BlockMut, BlockRef, SLOT_TAG_CACHE, SLOT_TAG_NODE};

fn entry_offset(layout: &Layout, index: usize) -> usize {
    SLOT_HEADER_SIZE + index * (CACHE_KEY_SIZE + layout.record_size)
}

fn entry_key(slot_bytes: &[u8], layout: &Layout, index: usize) -> u32 {
    let off = entry_offset(layout, index);
    u32::from_le_bytes([
        slot_bytes[off],
        slot_bytes[off + 1],
        slot_bytes[off + 2],
        slot_bytes[off + 3],
    ])
}

fn write_entry(slot_bytes: &mut [u8], layout: &Layout, index: usize, key: u32, record: &[u8]) {
    let off = entry_offset(layout, index);
    slot_bytes[off..off + CACHE_KEY_SIZE].copy_from_slice(&key.to_le_bytes());
    slot_bytes[off + CACHE_KEY_SIZE..off + CACHE_KEY_SIZE + layout.record_size]
        .copy_from_slice(record);
}

impl Tree {
    /// Stashes a record in a cache slot of the given block. An entry already
    /// holding `key` is overwritten in place; otherwise the record appends
    /// where capacity remains, or displaces a deterministically chosen
    /// victim entry when every cache slot is full. A block with no cache
    /// slot left accepts the store as a no-op.
    pub fn cache_store(&mut self, block: u32, key: u32, record: &[u8]) -> Result<()> {
        let layout = self.layout;
        ensure!(
            record.len() == layout.record_size,
            "record length {} does not match configured record size {}",
            record.len(),
            layout.record_size
        );

        let mut map = self.store.load_mut(block)?;
        let mut blk = BlockMut::new(map.bytes_mut(), &layout)?;

        let mut free = None;
        let mut victim = None;
        for slot in (0..layout.block_slots as u32).rev() {
            if blk.slot_header(slot)?.tag() == SLOT_TAG_NODE {
                continue;
            }
            if victim.is_none() {
                victim = Some(slot);
            }
            let cont = (blk.slot_header(slot)?.cont() as usize).min(layout.cache_records);
            for entry in 0..cont {
                if entry_key(blk.as_ref().slot_bytes(slot)?, &layout, entry) == key {
                    write_entry(blk.slot_bytes_mut(slot)?, &layout, entry, key, record);
                    return Ok(());
                }
            }
            if free.is_none() && cont < layout.cache_records {
                free = Some(slot);
            }
        }

        match (free, victim) {
            (Some(slot), _) => {
                let cont = blk.slot_header(slot)?.cont();
                write_entry(blk.slot_bytes_mut(slot)?, &layout, cont as usize, key, record);
                let header = blk.slot_header_mut(slot)?;
                header.set_tag(SLOT_TAG_CACHE);
                header.set_cont(cont + 1);
            }
            (None, Some(slot)) => {
                let entry = key as usize % layout.cache_records;
                write_entry(blk.slot_bytes_mut(slot)?, &layout, entry, key, record);
            }
            // Every slot holds a node; nothing to cache into.
            (None, None) => {}
        }
        Ok(())
    }

    /// Copies the cached record for `key` into `out` if the block caches it.
    pub fn cache_probe(&self, block: u32, key: u32, out: &mut [u8]) -> Result<bool> {
        let layout = self.layout;
        ensure!(
            out.len() == layout.record_size,
            "output length {} does not match configured record size {}",
            out.len(),
            layout.record_size
        );

        let map = self.store.load(block)?;
        let blk = BlockRef::new(map.bytes(), &layout)?;

        for slot in (0..layout.block_slots as u32).rev() {
            if blk.slot_tag(slot)? == SLOT_TAG_NODE {
                continue;
            }
            let cont = (blk.slot_header(slot)?.cont() as usize).min(layout.cache_records);
            let bytes = blk.slot_bytes(slot)?;
            for entry in 0..cont {
                if entry_key(bytes, &layout, entry) == key {
                    let off = entry_offset(&layout, entry) + CACHE_KEY_SIZE;
                    out.copy_from_slice(&bytes[off..off + layout.record_size]);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Updates the cached record for `key` only if the block caches it. The
    /// insert path uses this to keep a stale copy from outliving an update
    /// without forcing the record into the cache.
    pub fn cache_replace(&mut self, block: u32, key: u32, record: &[u8]) -> Result<()> {
        let layout = self.layout;
        ensure!(
            record.len() == layout.record_size,
            "record length {} does not match configured record size {}",
            record.len(),
            layout.record_size
        );

        let mut map = self.store.load_mut(block)?;
        let mut blk = BlockMut::new(map.bytes_mut(), &layout)?;

        for slot in (0..layout.block_slots as u32).rev() {
            if blk.slot_header(slot)?.tag() == SLOT_TAG_NODE {
                continue;
            }
            let cont = (blk.slot_header(slot)?.cont() as usize).min(layout.cache_records);
            for entry in 0..cont {
                if entry_key(blk.as_ref().slot_bytes(slot)?, &layout, entry) == key {
                    write_entry(blk.slot_bytes_mut(slot)?, &layout, entry, key, record);
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::TreeConfig;
    use crate::Tree;
    use tempfile::tempdir;

    // record_size 16 gives (64 - 6) / 20 = 2 entries per cache slot.
    fn cache_config() -> TreeConfig {
        TreeConfig::new(1024, 64, 4).with_record_size(16)
    }

    fn record(seed: u32) -> Vec<u8> {
        (0..16).map(|i| (seed as usize * 7 + i * 31) as u8).collect()
    }

    fn open_tree() -> (Tree, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let tree = Tree::init(dir.path().join("index"), cache_config()).unwrap();
        (tree, dir)
    }

    #[test]
    fn probe_after_store_round_trips() {
        let (mut tree, _dir) = open_tree();
        let block = tree.root_block();

        tree.cache_store(block, 42, &record(42)).unwrap();

        let mut out = vec![0u8; 16];
        assert!(tree.cache_probe(block, 42, &mut out).unwrap());
        assert_eq!(out, record(42));
        assert!(!tree.cache_probe(block, 43, &mut out).unwrap());
    }

    #[test]
    fn store_overwrites_existing_entry() {
        let (mut tree, _dir) = open_tree();
        let block = tree.root_block();

        tree.cache_store(block, 9, &record(1)).unwrap();
        tree.cache_store(block, 9, &record(2)).unwrap();

        let mut out = vec![0u8; 16];
        assert!(tree.cache_probe(block, 9, &mut out).unwrap());
        assert_eq!(out, record(2));
    }

    #[test]
    fn replace_touches_only_present_keys() {
        let (mut tree, _dir) = open_tree();
        let block = tree.root_block();

        tree.cache_store(block, 5, &record(5)).unwrap();
        tree.cache_replace(block, 5, &record(50)).unwrap();
        tree.cache_replace(block, 6, &record(60)).unwrap();

        let mut out = vec![0u8; 16];
        assert!(tree.cache_probe(block, 5, &mut out).unwrap());
        assert_eq!(out, record(50));
        assert!(!tree.cache_probe(block, 6, &mut out).unwrap());
    }

    #[test]
    fn full_cache_evicts_instead_of_growing() {
        let (mut tree, _dir) = open_tree();
        let block = tree.root_block();
        let layout = *tree.layout();

        // Every slot is free in a fresh block, so capacity is the whole
        // slot array times the per-slot entry count.
        let capacity = (layout.block_slots * layout.cache_records) as u32;
        for key in 0..capacity + 8 {
            tree.cache_store(block, key, &record(key)).unwrap();
        }

        let mut cached = 0;
        let mut out = vec![0u8; 16];
        for key in 0..capacity + 8 {
            if tree.cache_probe(block, key, &mut out).unwrap() {
                assert_eq!(out, record(key), "stale record for key {key}");
                cached += 1;
            }
        }
        assert!(cached as u32 <= capacity, "cache exceeded its capacity");
        // The most recent store must have landed somewhere.
        assert!(tree.cache_probe(block, capacity + 7, &mut out).unwrap());
    }

    #[test]
    fn node_allocation_evicts_without_breaking_lookups() {
        let (mut tree, _dir) = open_tree();
        let block = tree.root_block();

        for key in 0..8u32 {
            tree.cache_store(block, key, &record(key)).unwrap();
        }
        // Inserting keys claims node slots bottom-up, trampling any cache
        // entries that lived there.
        for key in 0..30u32 {
            tree.insert(key, key + 1).unwrap();
        }

        for key in 0..30u32 {
            assert_eq!(tree.get(key).unwrap(), Some(key + 1));
        }
        // Surviving entries must still be coherent.
        let mut out = vec![0u8; 16];
        for key in 0..8u32 {
            if tree.cache_probe(block, key, &mut out).unwrap() {
                assert_eq!(out, record(key));
            }
        }
    }

    #[test]
    fn store_rejects_wrong_record_length() {
        let (mut tree, _dir) = open_tree();
        let block = tree.root_block();

        assert!(tree.cache_store(block, 1, &[0u8; 7]).is_err());
        let mut short = vec![0u8; 7];
        assert!(tree.cache_probe(block, 1, &mut short).is_err());
    }
}
