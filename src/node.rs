use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::alloc::Allocator;
use crate::io::{BlockNumber, BlockStorage, BLOCK_SIZE};

/// The serialized inode table lives in the second block of the image and is
/// permanently reserved.
pub const INODE_TABLE_BLOCK: BlockNumber = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FileKind {
    #[serde(rename = "file")]
    File,
}

/// Metadata record for one file: logical block `i` of the file's content lives
/// at physical block `blocks[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    pub name: String,
    /// Byte length of the file content. May cover fewer blocks than the block
    /// list holds; the block list never shrinks.
    pub size: u64,
    pub blocks: Vec<BlockNumber>,
    pub created_time: f64,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

impl Inode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: 0,
            blocks: Vec::new(),
            created_time: unix_timestamp(),
            kind: FileKind::File,
        }
    }
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// In-memory mapping from file name to inode, persisted as a JSON object in
/// the inode table block. Every save is a full-table rewrite.
pub struct InodeTable {
    inodes: HashMap<String, Inode>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            inodes: HashMap::new(),
        }
    }

    /// Loads the table from the inode table block. Empty or undecodable
    /// content is treated as a fresh filesystem: an empty table is written
    /// back immediately rather than failing the mount.
    pub fn load<T: BlockStorage>(dev: &mut T, alloc: &Allocator) -> std::io::Result<Self> {
        let mut buf = vec![0; BLOCK_SIZE];
        dev.read_block(INODE_TABLE_BLOCK, &mut buf)?;

        // The JSON payload is null-padded to a full block.
        let end = buf
            .iter()
            .rposition(|&b| b != 0)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let payload = &buf[..end];

        if payload.is_empty() {
            let table = Self::new();
            table.save(dev, alloc)?;
            return Ok(table);
        }

        match serde_json::from_slice::<HashMap<String, Inode>>(payload) {
            Ok(inodes) => Ok(Self { inodes }),
            Err(e) => {
                warn!("inode table undecodable, starting fresh: {}", e);
                let table = Self::new();
                table.save(dev, alloc)?;
                Ok(table)
            }
        }
    }

    /// Serializes the full mapping into the inode table block and marks that
    /// block used.
    pub fn save<T: BlockStorage>(&self, dev: &mut T, alloc: &Allocator) -> std::io::Result<()> {
        let payload = serde_json::to_vec(&self.inodes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        dev.write_block(INODE_TABLE_BLOCK, &payload)?;
        alloc.mark_used(dev, INODE_TABLE_BLOCK)
    }

    pub fn get(&self, name: &str) -> Option<&Inode> {
        self.inodes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Inode> {
        self.inodes.get_mut(name)
    }

    pub fn insert(&mut self, inode: Inode) {
        self.inodes.insert(inode.name.clone(), inode);
    }

    pub fn remove(&mut self, name: &str) -> Option<Inode> {
        self.inodes.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inodes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.values()
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    fn test_device(blocks: usize) -> FileBlockEmulator {
        let fd = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fd)
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn inode_serializes_with_stable_field_names() {
        let mut inode = Inode::new("a.txt");
        inode.size = 12;
        inode.blocks = vec![2, 5];

        let json = serde_json::to_value(&inode).unwrap();
        assert_eq!(json["name"], "a.txt");
        assert_eq!(json["size"], 12);
        assert_eq!(json["blocks"][0], 2);
        assert_eq!(json["type"], "file");
        assert!(json["created_time"].is_number());
    }

    #[test]
    fn inode_round_trips_through_json() {
        let mut inode = Inode::new("a.txt");
        inode.size = 4097;
        inode.blocks = vec![2, 3];

        let bytes = serde_json::to_vec(&inode).unwrap();
        let parsed: Inode = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, inode);
    }

    #[test]
    fn created_time_survives_encoding_bit_for_bit() {
        // A sub-microsecond timestamp whose shortest decimal form exercises
        // the full 17 significant digits of an f64.
        let mut inode = Inode::new("a.txt");
        inode.created_time = 1788065375.7824473;

        let bytes = serde_json::to_vec(&inode).unwrap();
        let parsed: Inode = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            parsed.created_time.to_bits(),
            inode.created_time.to_bits()
        );
    }

    #[test]
    fn empty_table_block_loads_as_fresh_table() {
        let mut dev = test_device(4);
        let alloc = Allocator::new(4);
        alloc.initialize(&mut dev).unwrap();

        let table = InodeTable::load(&mut dev, &alloc).unwrap();
        assert!(table.is_empty());

        // Self-healing load persists the empty table and reserves its block.
        assert!(alloc.is_used(&mut dev, INODE_TABLE_BLOCK).unwrap());
    }

    #[test]
    fn undecodable_table_block_heals_to_fresh_table() {
        let mut dev = test_device(4);
        let alloc = Allocator::new(4);
        alloc.initialize(&mut dev).unwrap();

        dev.write_block(INODE_TABLE_BLOCK, b"not valid json{{").unwrap();

        let table = InodeTable::load(&mut dev, &alloc).unwrap();
        assert!(table.is_empty());

        // The healed table replaced the corrupt payload on disk.
        let reloaded = InodeTable::load(&mut dev, &alloc).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn saved_table_loads_back_with_entries() {
        let mut dev = test_device(4);
        let alloc = Allocator::new(4);
        alloc.initialize(&mut dev).unwrap();

        let mut table = InodeTable::new();
        let mut inode = Inode::new("a.txt");
        inode.size = 9;
        inode.blocks = vec![2];
        table.insert(inode.clone());
        table.save(&mut dev, &alloc).unwrap();

        let reloaded = InodeTable::load(&mut dev, &alloc).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("a.txt"), Some(&inode));
    }
}
