//! A minimal single-file block storage engine.
//!
//! A fixed-size backing image is divided into 4K blocks: block 0 holds a
//! one-byte-per-block allocation bitmap, block 1 a JSON-serialized table
//! mapping file names to inodes, and the rest hold file data. [`FlatFs`]
//! coordinates the layers, translating logical byte offsets into physical
//! block operations.
//!
//! ```no_run
//! use flatfs::{FlatFs, DEFAULT_DISK_BLOCKS};
//!
//! let mut fs = FlatFs::open_path("disk.img", DEFAULT_DISK_BLOCKS).unwrap();
//! fs.create_file("hello.txt").unwrap();
//! fs.write_file("hello.txt", b"hello, block storage", 0).unwrap();
//! assert_eq!(
//!     fs.read_file("hello.txt").unwrap(),
//!     Some(b"hello, block storage".to_vec())
//! );
//! ```

pub mod alloc;
mod fs;
pub mod io;
pub mod node;

pub use crate::fs::{FlatFs, FsError, DEFAULT_DISK_BLOCKS};
pub use crate::node::{FileKind, Inode};
