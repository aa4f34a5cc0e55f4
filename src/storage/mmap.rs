//! # Memory-Mapped Block Access
//!
//! This module implements [`BlockStore`], the owner of the index file, and
//! the [`MappedBlock`]/[`MappedBlockMut`] guards that expose one block of
//! that file as a byte slice.
//!
//! ## Design
//!
//! The store maps one block per request rather than the whole file. The
//! index is written by a single thread and a typical operation touches a
//! handful of blocks out of potentially many thousands, so short-lived
//! per-block mappings keep the address-space footprint proportional to the
//! working set instead of the file size, and block allocation never has to
//! remap (and thereby invalidate) an existing view.
//!
//! ## Alignment
//!
//! `mmap` requires file offsets aligned to the OS page size, but a block's
//! file offset (`position * block_size`) has no such guarantee: block sizes
//! are caller-chosen and may be smaller than a page. The store therefore
//! aligns the mapping offset down to a page boundary and remembers the
//! delta, exactly the arithmetic the classic C pager performs:
//!
//! ```text
//! byte_off = position * block_size
//! aligned  = byte_off - (byte_off % page_size)
//! map [aligned, byte_off + block_size), expose [delta, delta + block_size)
//! ```
//!
//! ## Lifetime and Release
//!
//! The guards own their mapping; dropping one unmaps. This makes release on
//! every exit path (error paths included) a property of the types rather
//! than a calling convention. Writes through a `MappedBlockMut` go to a
//! shared mapping and are visible to any subsequent load of the same block
//! without an explicit flush.
//!
//! Writable mappings must be exclusive per block. The store does not lock;
//! exclusivity follows from the tree's single-writer contract.
//!
//! ## Error Handling
//!
//! Any open/extend/map failure is fatal. Errors carry the file path and the
//! failing operation via `wrap_err_with`; there is no partial-failure
//! recovery for I/O.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, ensure};
use memmap2::{Mmap, MmapMut, MmapOptions};

/// Returns the OS page granularity used to align mapping offsets.
fn map_alignment() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is async-signal-safe and has no preconditions;
        // _SC_PAGESIZE is always available on POSIX systems.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page > 0 {
            return page as usize;
        }
    }
    // Windows allocation granularity; a safe over-alignment elsewhere.
    65536
}

/// A read-only mapping of a single block.
#[derive(Debug)]
pub struct MappedBlock {
    map: Mmap,
    delta: usize,
    block_size: usize,
}

impl MappedBlock {
    pub fn bytes(&self) -> &[u8] {
        &self.map[self.delta..self.delta + self.block_size]
    }
}

/// A writable mapping of a single block. Writes become visible to the file
/// as they happen; the mapping is shared, not copy-on-write.
#[derive(Debug)]
pub struct MappedBlockMut {
    map: MmapMut,
    delta: usize,
    block_size: usize,
}

impl MappedBlockMut {
    pub fn bytes(&self) -> &[u8] {
        &self.map[self.delta..self.delta + self.block_size]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map[self.delta..self.delta + self.block_size]
    }
}

/// Owns the index file and allocates/maps its fixed-size blocks.
#[derive(Debug)]
pub struct BlockStore {
    file: File,
    path: PathBuf,
    block_size: usize,
    block_count: u32,
    alignment: usize,
}

impl BlockStore {
    /// Creates (or truncates) the index file. The store starts empty; the
    /// caller allocates the root block explicitly.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();

        ensure!(block_size > 0, "block size must be non-zero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create index file '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_size,
            block_count: 0,
            alignment: map_alignment(),
        })
    }

    /// Extends the file by one block and returns the new block's position.
    /// The new block's bytes are zero (a zeroed slot reads as untyped; the
    /// tree initializes headers and slot tags before first use).
    pub fn allocate(&mut self) -> Result<u32> {
        let position = self.block_count;
        let new_len = (self.block_count as u64 + 1) * self.block_size as u64;

        self.file.set_len(new_len).wrap_err_with(|| {
            format!(
                "failed to extend '{}' to {} bytes",
                self.path.display(),
                new_len
            )
        })?;

        self.block_count += 1;
        tracing::trace!(position, file_len = new_len, "allocated block");
        Ok(position)
    }

    /// Maps one block read-only.
    pub fn load(&self, position: u32) -> Result<MappedBlock> {
        let (offset, delta, len) = self.map_range(position)?;

        // SAFETY: mapping a file we hold open with read access. The index
        // file is owned exclusively by this process for the store's
        // lifetime, and the guard ties the mapping's lifetime to the
        // returned value, so the slice handed out cannot outlive the map.
        let map = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len)
                .map(&self.file)
                .wrap_err_with(|| {
                    format!(
                        "failed to map block {} of '{}'",
                        position,
                        self.path.display()
                    )
                })?
        };

        Ok(MappedBlock {
            map,
            delta,
            block_size: self.block_size,
        })
    }

    /// Maps one block read-write. The mapping is shared with the file, so
    /// dropping the guard publishes the writes without copying.
    pub fn load_mut(&self, position: u32) -> Result<MappedBlockMut> {
        let (offset, delta, len) = self.map_range(position)?;

        // SAFETY: as in `load`, plus: writable mappings of a given block are
        // never created concurrently because the tree is single-writer, so
        // no two live `&mut [u8]` views alias the same block.
        let map = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len)
                .map_mut(&self.file)
                .wrap_err_with(|| {
                    format!(
                        "failed to map block {} of '{}' read-write",
                        position,
                        self.path.display()
                    )
                })?
        };

        Ok(MappedBlockMut {
            map,
            delta,
            block_size: self.block_size,
        })
    }

    fn map_range(&self, position: u32) -> Result<(u64, usize, usize)> {
        ensure!(
            position < self.block_count,
            "block {} out of bounds (block_count={})",
            position,
            self.block_count
        );

        let byte_off = position as u64 * self.block_size as u64;
        let aligned = byte_off - byte_off % self.alignment as u64;
        let delta = (byte_off - aligned) as usize;
        Ok((aligned, delta, delta + self.block_size))
    }

    /// Flushes file metadata and contents to stable storage. Advisory: the
    /// index makes no crash-consistency promises.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn file_size(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }
}
