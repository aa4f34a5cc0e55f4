//! # Record Heap
//!
//! The payload side of the system: an append-only file of fixed-size
//! records, and the facade that glues it to the index. The index never
//! parses record contents; it stores byte offsets into this file and hands
//! them back on lookup.
//!
//! [`RecordHeap`] is deliberately dumb storage: records are written at
//! `count * record_size` and never moved or reclaimed. Re-inserting a key
//! appends a fresh record and repoints the index at it; the superseded
//! record stays in the file unreferenced.
//!
//! [`IndexedHeap`] combines heap, tree and the per-block tuple cache into
//! the read/write surface a driver uses: inserts refresh any cached copy of
//! the key, cached reads try the owning block's cache before the heap and
//! backfill it on a miss, and an uncached read path bypasses the cache
//! entirely for measurement.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, bail, ensure};

use crate::btree::{Tree, Value};
use crate::layout::TreeConfig;

/// Append-only file of fixed-size payload records.
#[derive(Debug)]
pub struct RecordHeap {
    file: File,
    path: PathBuf,
    record_size: usize,
    count: u32,
}

impl RecordHeap {
    /// Creates (or truncates) the record file.
    pub fn create<P: AsRef<Path>>(path: P, record_size: usize) -> Result<Self> {
        ensure!(record_size > 0, "record size must be non-zero");
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create record file '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            record_size,
            count: 0,
        })
    }

    /// Appends one record and returns its byte offset, the value the index
    /// stores under the record's key.
    pub fn append(&mut self, record: &[u8]) -> Result<u32> {
        ensure!(
            record.len() == self.record_size,
            "record length {} does not match record size {}",
            record.len(),
            self.record_size
        );

        let offset = self.count as u64 * self.record_size as u64;
        ensure!(
            offset <= u32::MAX as u64,
            "record file '{}' exceeds the 32-bit offset space",
            self.path.display()
        );

        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(record))
            .wrap_err_with(|| {
                format!(
                    "failed to append record {} to '{}'",
                    self.count,
                    self.path.display()
                )
            })?;

        self.count += 1;
        Ok(offset as u32)
    }

    /// Reads the record at a byte offset previously returned by [`append`].
    ///
    /// [`append`]: RecordHeap::append
    pub fn read_at(&self, offset: u32, out: &mut [u8]) -> Result<()> {
        ensure!(
            out.len() == self.record_size,
            "output length {} does not match record size {}",
            out.len(),
            self.record_size
        );

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset as u64))
            .and_then(|_| file.read_exact(out))
            .wrap_err_with(|| {
                format!(
                    "failed to read record at offset {} from '{}'",
                    offset,
                    self.path.display()
                )
            })?;
        Ok(())
    }

    /// Records written so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Flushes the record file to stable storage. Advisory only.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }
}

/// Record storage addressed by key: a [`RecordHeap`] fronted by a [`Tree`]
/// and the per-block tuple cache.
#[derive(Debug)]
pub struct IndexedHeap {
    tree: Tree,
    heap: RecordHeap,
}

impl IndexedHeap {
    /// Creates the index and record files. The heap's record size follows
    /// the tree configuration so cache entries and heap records agree.
    pub fn create<P: AsRef<Path>, Q: AsRef<Path>>(
        index_path: P,
        record_path: Q,
        config: TreeConfig,
    ) -> Result<Self> {
        let tree = Tree::init(index_path, config)?;
        let heap = RecordHeap::create(record_path, tree.layout().record_size)?;
        Ok(Self { tree, heap })
    }

    /// Appends the record, indexes its offset under `key`, and refreshes any
    /// cached copy so a stale record cannot outlive the update.
    pub fn insert(&mut self, key: u32, record: &[u8]) -> Result<()> {
        let offset = self.heap.append(record)?;
        self.tree.insert(key, offset)?;

        // The insert may have split blocks; locate the key's current block
        // before touching its cache.
        let hit = self.tree.lookup(key)?;
        self.tree.cache_replace(hit.block, key, record)
    }

    /// Reads the record for `key`, serving from the owning block's cache
    /// when possible and caching the record after a heap read otherwise.
    /// Returns false when the key is not indexed.
    pub fn get(&mut self, key: u32, out: &mut [u8]) -> Result<bool> {
        let hit = self.tree.lookup(key)?;
        if !hit.exact {
            return Ok(false);
        }
        if self.tree.cache_probe(hit.block, key, out)? {
            return Ok(true);
        }

        let Value::Content(offset) = hit.value else {
            bail!("exact lookup for key {} terminated on a non-content value", key);
        };
        self.heap.read_at(offset, out)?;
        self.tree.cache_store(hit.block, key, out)?;
        Ok(true)
    }

    /// Reads the record for `key` straight from the heap, bypassing the
    /// tuple cache in both directions.
    pub fn get_uncached(&self, key: u32, out: &mut [u8]) -> Result<bool> {
        let hit = self.tree.lookup(key)?;
        if !hit.exact {
            return Ok(false);
        }

        let Value::Content(offset) = hit.value else {
            bail!("exact lookup for key {} terminated on a non-content value", key);
        };
        self.heap.read_at(offset, out)?;
        Ok(true)
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn heap(&self) -> &RecordHeap {
        &self.heap
    }

    /// Flushes both files to stable storage. Advisory only.
    pub fn sync(&self) -> Result<()> {
        self.tree.sync()?;
        self.heap.sync()
    }
}
