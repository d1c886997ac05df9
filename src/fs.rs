use std::cmp;
use std::path::Path;

use log::{info, warn};
use thiserror::Error;

use crate::alloc::{Allocator, BITMAP_BLOCK};
use crate::io::{BlockNumber, BlockStorage, FileBlockEmulator, BLOCK_SIZE};
use crate::node::{Inode, InodeTable};

/// Default image geometry: a 1 MiB backing file split into 4K blocks.
pub const DEFAULT_DISK_BLOCKS: usize = 256;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no free blocks available")]
    DiskFull,
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("block device error: {0}")]
    Device(#[from] std::io::Error),
}

/// The single bitmap block can track at most `BLOCK_SIZE` blocks, so larger
/// geometries are rejected up front rather than panicking deeper in.
fn check_geometry(block_count: usize) -> Result<(), FsError> {
    if block_count > BLOCK_SIZE {
        return Err(FsError::Device(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "device has more blocks than the bitmap block can track",
        )));
    }
    Ok(())
}

/// Storage engine over a single block device. Owns the device handle, the
/// block allocator, and the in-memory inode table exclusively; the table is
/// rewritten to disk in full after every mutation.
///
/// # Layout
/// =========================================
/// | Bitmap | Inode table | Data blocks... |
/// =========================================
pub struct FlatFs<T: BlockStorage> {
    dev: T,
    alloc: Allocator,
    table: InodeTable,
}

impl FlatFs<FileBlockEmulator> {
    /// Opens the backing image at `path`, creating and formatting a fresh
    /// image of `nblocks` blocks when none exists yet.
    pub fn open_path<P: AsRef<Path>>(path: P, nblocks: usize) -> Result<Self, FsError> {
        let dev = FileBlockEmulator::open_disk(path, nblocks)?;
        Self::open(dev)
    }
}

impl<T: BlockStorage> FlatFs<T> {
    /// Formats the device with a fresh bitmap and an empty inode table, then
    /// mounts it.
    pub fn format(mut dev: T) -> Result<Self, FsError> {
        check_geometry(dev.block_count())?;
        let alloc = Allocator::new(dev.block_count());
        alloc.initialize(&mut dev)?;

        let table = InodeTable::new();
        table.save(&mut dev, &alloc)?;
        dev.sync_disk()?;

        info!("formatted device with {} blocks", dev.block_count());
        Ok(FlatFs { dev, alloc, table })
    }

    /// Mounts an existing device, loading the persisted inode table. A device
    /// that carries no bitmap yet (all-zero block 0) is initialized in place;
    /// an empty or corrupt inode table block is healed to an empty table.
    pub fn open(mut dev: T) -> Result<Self, FsError> {
        check_geometry(dev.block_count())?;
        let alloc = Allocator::new(dev.block_count());

        if !alloc.is_used(&mut dev, BITMAP_BLOCK)? {
            alloc.initialize(&mut dev)?;
        }

        let table = InodeTable::load(&mut dev, &alloc)?;
        info!("mounted device with {} files", table.len());
        Ok(FlatFs { dev, alloc, table })
    }

    /// Creates an empty file. Returns `Ok(false)` when the name is already
    /// taken, leaving the existing inode untouched.
    pub fn create_file(&mut self, name: &str) -> Result<bool, FsError> {
        if self.table.contains(name) {
            return Ok(false);
        }

        self.table.insert(Inode::new(name));
        self.table.save(&mut self.dev, &self.alloc)?;
        Ok(true)
    }

    /// Reads the full content of a file, or `Ok(None)` when no such file
    /// exists. Zero-padding in the tail block is never exposed: the result is
    /// exactly `size` bytes long.
    pub fn read_file(&mut self, name: &str) -> Result<Option<Vec<u8>>, FsError> {
        let (blocks, size) = match self.table.get(name) {
            None => return Ok(None),
            Some(inode) => (inode.blocks.clone(), inode.size as usize),
        };

        if blocks.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let mut data = Vec::with_capacity(blocks.len() * BLOCK_SIZE);
        let mut block_buf = vec![0; BLOCK_SIZE];
        for &blocknr in &blocks {
            if data.len() >= size {
                break;
            }
            self.dev.read_block(blocknr, &mut block_buf)?;
            data.extend_from_slice(&block_buf);
        }
        data.truncate(size);
        Ok(Some(data))
    }

    /// Removes a file, releasing all of its blocks back to the allocator.
    /// Returns `Ok(false)` when no such file exists.
    pub fn delete_file(&mut self, name: &str) -> Result<bool, FsError> {
        let inode = match self.table.remove(name) {
            None => return Ok(false),
            Some(inode) => inode,
        };

        for &blocknr in &inode.blocks {
            self.alloc.mark_free(&mut self.dev, blocknr)?;
        }
        self.table.save(&mut self.dev, &self.alloc)?;
        Ok(true)
    }

    /// Lists every inode in the table. Iteration order carries no guarantee.
    pub fn list_files(&self) -> Vec<&Inode> {
        self.table.iter().collect()
    }

    /// Writes `data` into a file at a logical byte offset, allocating blocks
    /// as needed and preserving untouched bytes of partially-overwritten
    /// blocks. Files never shrink: the resulting size is
    /// `max(old_size, offset + data.len())`.
    ///
    /// There is no create-on-write; a missing name, like an exhausted disk,
    /// reports `Ok(false)` with a logged reason rather than an error.
    pub fn write_file(&mut self, name: &str, data: &[u8], offset: usize) -> Result<bool, FsError> {
        match self.write_at(name, data, offset) {
            Ok(()) => Ok(true),
            Err(FsError::NotFound(name)) => {
                warn!("write failed: file {} not found", name);
                Ok(false)
            }
            Err(FsError::DiskFull) => {
                warn!("write to {} failed: no free blocks available", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Reports whether a physical block is marked used in the on-disk bitmap.
    pub fn is_block_used(&mut self, blocknr: BlockNumber) -> Result<bool, FsError> {
        Ok(self.alloc.is_used(&mut self.dev, blocknr)?)
    }

    fn write_at(&mut self, name: &str, data: &[u8], offset: usize) -> Result<(), FsError> {
        let (old_blocks, old_size) = match self.table.get(name) {
            None => return Err(FsError::NotFound(name.to_string())),
            Some(inode) => (inode.blocks.clone(), inode.size),
        };

        // One past the last logical block the resulting file must cover.
        let blocks_needed = (offset + data.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let mapping = self.extend_mapping(old_blocks, blocks_needed)?;

        self.write_to_blocks(data, offset, &mapping)?;

        // The mapping only ever grows, so the inode can only grow with it.
        let inode = self
            .table
            .get_mut(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        inode.blocks = mapping;
        inode.size = cmp::max(old_size, (offset + data.len()) as u64);
        self.table.save(&mut self.dev, &self.alloc)?;
        Ok(())
    }

    /// Grows the logical-to-physical block mapping until it covers
    /// `blocks_needed` logical blocks, taking the lowest free physical block
    /// for each missing entry. Allocation is all-or-nothing: the free-block
    /// count is checked up front so a mid-write exhaustion cannot leave
    /// orphaned bitmap entries.
    fn extend_mapping(
        &mut self,
        mut mapping: Vec<BlockNumber>,
        blocks_needed: usize,
    ) -> Result<Vec<BlockNumber>, FsError> {
        let missing = blocks_needed.saturating_sub(mapping.len());
        if missing == 0 {
            return Ok(mapping);
        }

        if self.alloc.free_blocks(&mut self.dev)? < missing {
            return Err(FsError::DiskFull);
        }

        for _ in 0..missing {
            let blocknr = self
                .alloc
                .find_free_block(&mut self.dev)?
                .ok_or(FsError::DiskFull)?;
            self.alloc.mark_used(&mut self.dev, blocknr)?;
            // A recycled block may still hold a deleted file's bytes; zero it
            // so gap ranges the incoming data does not cover read back as
            // zeroes.
            self.dev.write_block(blocknr, &[])?;
            mapping.push(blocknr);
        }
        Ok(mapping)
    }

    /// Read-modify-write of every block the byte range `[offset,
    /// offset + data.len())` touches.
    fn write_to_blocks(
        &mut self,
        data: &[u8],
        offset: usize,
        mapping: &[BlockNumber],
    ) -> Result<(), FsError> {
        let mut block_buf = vec![0; BLOCK_SIZE];
        let mut cursor = offset;
        let mut data_pos = 0;

        while data_pos < data.len() {
            let logical = cursor / BLOCK_SIZE;
            let within = cursor % BLOCK_SIZE;
            let take = cmp::min(BLOCK_SIZE - within, data.len() - data_pos);

            let physical = mapping[logical];
            self.dev.read_block(physical, &mut block_buf)?;
            block_buf[within..within + take].copy_from_slice(&data[data_pos..data_pos + take]);
            self.dev.write_block(physical, &block_buf)?;

            cursor += take;
            data_pos += take;
        }
        Ok(())
    }
}
