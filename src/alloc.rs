use crate::io::{BlockNumber, BlockStorage, BLOCK_SIZE};

/// The bitmap lives in the first block of the image and is permanently
/// reserved.
pub const BITMAP_BLOCK: BlockNumber = 0;

#[derive(Debug, PartialEq)]
pub enum BlockState {
    Free,
    Used,
}

/// In-memory view of the allocation bitmap stored in block 0. One byte per
/// block (0 = free, 1 = used), so a single 4K bitmap block tracks up to 4096
/// blocks.
pub struct Bitmap {
    bytes: Vec<u8>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; BLOCK_SIZE],
        }
    }

    pub fn parse(buf: &[u8]) -> Self {
        assert_eq!(
            buf.len(),
            BLOCK_SIZE,
            "bitmap buffer must be exactly one block"
        );
        Self {
            bytes: buf.to_vec(),
        }
    }

    pub fn serialize(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get(&self, blocknr: BlockNumber) -> BlockState {
        assert!(blocknr < BLOCK_SIZE);
        match self.bytes[blocknr] {
            0 => BlockState::Free,
            _ => BlockState::Used,
        }
    }

    pub fn set_used(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < BLOCK_SIZE);
        self.bytes[blocknr] = 1;
    }

    pub fn set_free(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < BLOCK_SIZE);
        self.bytes[blocknr] = 0;
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements a naive lowest-index-first allocation policy over the on-disk
/// bitmap. The allocator keeps no bitmap mirror between calls: every query
/// re-reads block 0 and every mutation re-reads, mutates, and rewrites it.
pub struct Allocator {
    /// Number of blocks tracked, bounded by what fits in the single bitmap
    /// block.
    block_count: usize,
}

impl Allocator {
    pub fn new(block_count: usize) -> Self {
        assert!(
            block_count <= BLOCK_SIZE,
            "bitmap block can track at most {} blocks",
            BLOCK_SIZE
        );
        Self { block_count }
    }

    /// Writes a fresh all-zero bitmap to block 0, then marks block 0 itself
    /// used. Intended for devices that carry no bitmap yet.
    pub fn initialize<T: BlockStorage>(&self, dev: &mut T) -> std::io::Result<()> {
        let mut bitmap = Bitmap::new();
        bitmap.set_used(BITMAP_BLOCK);
        self.store(dev, &bitmap)
    }

    /// Scans blocks `1..block_count` in ascending order and returns the first
    /// free one, or `None` when the disk is full. The reserved bitmap block is
    /// never a candidate.
    pub fn find_free_block<T: BlockStorage>(
        &self,
        dev: &mut T,
    ) -> std::io::Result<Option<BlockNumber>> {
        let bitmap = self.load(dev)?;
        for blocknr in 1..self.block_count {
            if let BlockState::Free = bitmap.get(blocknr) {
                return Ok(Some(blocknr));
            }
        }
        Ok(None)
    }

    /// Marks a block used and persists the bitmap. Idempotent.
    pub fn mark_used<T: BlockStorage>(
        &self,
        dev: &mut T,
        blocknr: BlockNumber,
    ) -> std::io::Result<()> {
        let mut bitmap = self.load(dev)?;
        bitmap.set_used(blocknr);
        self.store(dev, &bitmap)
    }

    /// Marks a block free and persists the bitmap. Idempotent.
    pub fn mark_free<T: BlockStorage>(
        &self,
        dev: &mut T,
        blocknr: BlockNumber,
    ) -> std::io::Result<()> {
        let mut bitmap = self.load(dev)?;
        bitmap.set_free(blocknr);
        self.store(dev, &bitmap)
    }

    pub fn is_used<T: BlockStorage>(
        &self,
        dev: &mut T,
        blocknr: BlockNumber,
    ) -> std::io::Result<bool> {
        let bitmap = self.load(dev)?;
        Ok(bitmap.get(blocknr) == BlockState::Used)
    }

    /// Counts the blocks currently free for allocation.
    pub fn free_blocks<T: BlockStorage>(&self, dev: &mut T) -> std::io::Result<usize> {
        let bitmap = self.load(dev)?;
        let free = (1..self.block_count)
            .filter(|&blocknr| bitmap.get(blocknr) == BlockState::Free)
            .count();
        Ok(free)
    }

    fn load<T: BlockStorage>(&self, dev: &mut T) -> std::io::Result<Bitmap> {
        let mut buf = vec![0; BLOCK_SIZE];
        dev.read_block(BITMAP_BLOCK, &mut buf)?;
        Ok(Bitmap::parse(&buf))
    }

    fn store<T: BlockStorage>(&self, dev: &mut T, bitmap: &Bitmap) -> std::io::Result<()> {
        dev.write_block(BITMAP_BLOCK, bitmap.serialize())
    }
}
