use std::path::Path;

/// 4k is a common block size for file systems. Disks commonly are composed of
/// 512 byte blocks mapping each file system block to 8 hard disk blocks.
pub const BLOCK_SIZE: usize = 4096;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is the number of blocks available.
pub type BlockNumber = usize;

/// A fixed-block read/write interface over a flat byte-addressable image.
///
/// Every call is a direct, self-contained operation against the backing store;
/// implementations are not expected to cache blocks in memory.
pub trait BlockStorage {
    /// Opens the backing image at the specified path, creating it as
    /// `nblocks * BLOCK_SIZE` zero bytes if it does not exist yet.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;

    /// Reads exactly one block into the provided buffer. The buffer must hold
    /// at least `BLOCK_SIZE` bytes.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range returns an `InvalidInput` error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;

    /// Writes the buffer into the specified block. Buffers shorter than
    /// `BLOCK_SIZE` are zero-padded up to a full block; no neighboring block is
    /// ever touched.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidInput` error when the block number is out of range or
    /// the buffer exceeds `BLOCK_SIZE`.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;

    /// Flush any pending disk IO. This is useful if it must be guaranteed that
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;

    /// The total number of blocks addressable on this device.
    fn block_count(&self) -> usize;
}
