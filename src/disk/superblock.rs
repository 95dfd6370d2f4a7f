//! The durable superblock: allocation cursors and tree-wide counters.

use std::ops::Range;

use tracing::debug;

use crate::config::StoreConfig;
use crate::disk::io::DiskFiles;
use crate::error::{Result, StoreError};
use crate::types::{Pid, DISK_COUNT, MAX_OFFSET};

const MAGIC: [u8; 8] = *b"STRIPED\0";
const VERSION: u16 = 1;

const SB_MAGIC: Range<usize> = 0..8;
const SB_VERSION: Range<usize> = 8..10;
const SB_RESERVED: Range<usize> = 10..16;
const SB_NEXT_WRITE: Range<usize> = 16..48;
const SB_HEIGHT: Range<usize> = 48..56;
const SB_KEY_COUNT: Range<usize> = 56..64;
const SB_ROOT: Range<usize> = 64..72;
const SB_INNER_COUNT: Range<usize> = 72..80;
const SB_LEAF_COUNT: Range<usize> = 80..88;

/// Encoded size of the superblock; the configured region must be at least
/// this large.
pub const SUPERBLOCK_ENCODED_LEN: usize = SB_LEAF_COUNT.end;

/// Persistent metadata for one disk set.
///
/// The per-disk next-write cursors only ever advance, and only by the exact
/// stored length of the node just appended; that is what keeps node storage
/// append-only per disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    region_offset: u64,
    next_write: [u64; DISK_COUNT],
    height: u64,
    key_count: u64,
    root: u64,
    inner_count: u64,
    leaf_count: u64,
}

impl SuperBlock {
    /// Builds a fresh superblock from configuration and persists it.
    pub fn initialize(files: &DiskFiles, cfg: &StoreConfig) -> Result<Self> {
        let sb = Self {
            region_offset: cfg.superblock.offset,
            next_write: cfg.nodes.base_offsets,
            height: cfg.tree.height,
            key_count: 0,
            root: 0,
            inner_count: 0,
            leaf_count: 0,
        };
        sb.save(files)?;
        Ok(sb)
    }

    /// Loads the superblock from its reserved region on disk 0.
    pub fn load(files: &DiskFiles, cfg: &StoreConfig) -> Result<Self> {
        let mut buf = [0u8; SUPERBLOCK_ENCODED_LEN];
        files.read_at(0, cfg.superblock.offset, &mut buf)?;
        if buf[SB_MAGIC] != MAGIC {
            return Err(StoreError::Corruption("invalid superblock magic"));
        }
        let version = u16::from_be_bytes(buf[SB_VERSION].try_into().expect("slice is 2 bytes"));
        if version != VERSION {
            return Err(StoreError::Corruption("unsupported superblock version"));
        }
        if buf[SB_RESERVED].iter().any(|&b| b != 0) {
            return Err(StoreError::Corruption("superblock reserved field non-zero"));
        }
        let mut next_write = [0u64; DISK_COUNT];
        for (i, cursor) in next_write.iter_mut().enumerate() {
            let at = SB_NEXT_WRITE.start + i * 8;
            *cursor = u64::from_be_bytes(buf[at..at + 8].try_into().expect("slice is 8 bytes"));
        }
        Ok(Self {
            region_offset: cfg.superblock.offset,
            next_write,
            height: read_u64(&buf, SB_HEIGHT),
            key_count: read_u64(&buf, SB_KEY_COUNT),
            root: read_u64(&buf, SB_ROOT),
            inner_count: read_u64(&buf, SB_INNER_COUNT),
            leaf_count: read_u64(&buf, SB_LEAF_COUNT),
        })
    }

    /// Persists the full struct to the reserved region of every disk.
    ///
    /// Idempotent; the last step of any sequence that needs durability.
    pub fn save(&self, files: &DiskFiles) -> Result<()> {
        let mut buf = [0u8; SUPERBLOCK_ENCODED_LEN];
        buf[SB_MAGIC].copy_from_slice(&MAGIC);
        buf[SB_VERSION].copy_from_slice(&VERSION.to_be_bytes());
        for (i, cursor) in self.next_write.iter().enumerate() {
            let at = SB_NEXT_WRITE.start + i * 8;
            buf[at..at + 8].copy_from_slice(&cursor.to_be_bytes());
        }
        buf[SB_HEIGHT].copy_from_slice(&self.height.to_be_bytes());
        buf[SB_KEY_COUNT].copy_from_slice(&self.key_count.to_be_bytes());
        buf[SB_ROOT].copy_from_slice(&self.root.to_be_bytes());
        buf[SB_INNER_COUNT].copy_from_slice(&self.inner_count.to_be_bytes());
        buf[SB_LEAF_COUNT].copy_from_slice(&self.leaf_count.to_be_bytes());
        for disk in 0..DISK_COUNT {
            files.write_at(disk, self.region_offset, &buf)?;
        }
        files.sync_all()?;
        debug!(next_write = ?self.next_write, height = self.height, "superblock saved");
        Ok(())
    }

    /// Reserves `len` bytes on `disk` and returns the start offset.
    ///
    /// Peek and advance happen in one step, so an interleaving caller can
    /// never observe a half-finished allocation.
    pub fn reserve(&mut self, disk: usize, len: u64) -> Result<u64> {
        let cursor = self
            .next_write
            .get_mut(disk)
            .ok_or(StoreError::Capacity("disk index out of range"))?;
        let start = *cursor;
        if start > MAX_OFFSET || len > MAX_OFFSET - start + 1 {
            return Err(StoreError::Capacity("node offset exceeds 61 bits"));
        }
        *cursor = start + len;
        Ok(start)
    }

    /// Read-only peek at a disk's next-write cursor.
    pub fn next_write_offset(&self, disk: usize) -> u64 {
        self.next_write[disk]
    }

    /// Overwrites a disk's next-write cursor (bulk update and repair paths).
    pub fn set_next_write_offset(&mut self, disk: usize, offset: u64) {
        self.next_write[disk] = offset;
    }

    /// Counts one more inner node.
    pub fn add_inner_node(&mut self) {
        self.inner_count += 1;
    }

    /// Counts one more leaf node.
    pub fn add_leaf_node(&mut self) {
        self.leaf_count += 1;
    }

    /// Current tree height.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Records the tree height.
    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    /// Number of keys in the tree.
    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Records the global key count.
    pub fn set_key_count(&mut self, count: u64) {
        self.key_count = count;
    }

    /// The tree root, if one has been recorded.
    pub fn root(&self) -> Option<Pid> {
        if self.root == 0 {
            None
        } else {
            Some(Pid::from_raw(self.root))
        }
    }

    /// Records the tree root.
    pub fn set_root(&mut self, root: Option<Pid>) {
        self.root = root.map(Pid::raw).unwrap_or(0);
    }

    /// Number of inner nodes ever created.
    pub fn inner_count(&self) -> u64 {
        self.inner_count
    }

    /// Number of leaf nodes ever created.
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }
}

fn read_u64(buf: &[u8], range: Range<usize>) -> u64 {
    u64::from_be_bytes(buf[range].try_into().expect("slice is 8 bytes"))
}
