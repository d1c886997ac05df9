mod block;
mod emulator;

pub use block::{BlockNumber, BlockStorage, BLOCK_SIZE};
pub use emulator::{FileBlockEmulator, FileBlockEmulatorBuilder};
