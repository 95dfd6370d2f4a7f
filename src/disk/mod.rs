//! The disk storage engine.
//!
//! Composes raw multi-disk I/O, the superblock, the cache index, the node
//! buffer, and the codec/crypto pipelines behind a node-level get/put
//! interface. Node placement is decided here: freshly created nodes are
//! appended at the owning disk's next-write cursor and their identifier is
//! stamped with the disk index.

use std::io::ErrorKind;

use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::crypto::{self, NodeCipher};
use crate::error::{Result, StoreError};
use crate::node::{Node, NodeCodec};
use crate::types::Pid;

pub mod buffer;
pub mod cacheblock;
pub mod io;
pub mod superblock;

pub use buffer::Buffer;
pub use cacheblock::CacheBlock;
pub use io::DiskFiles;
pub use superblock::SuperBlock;

/// Disk a freshly created node lands on when the caller does not choose.
/// Deliberate single-disk-server simplification.
const DEFAULT_NEW_NODE_DISK: usize = 0;

/// Orchestrator over the four-disk node store.
///
/// Constructed via [`Disk::create`] or [`Disk::open`]; terminal state is
/// reached through [`Disk::close`], which also runs best-effort from the
/// drop guard so the close sequence happens on every exit path.
pub struct Disk {
    files: DiskFiles,
    super_block: SuperBlock,
    cache_block: CacheBlock,
    buffer: Buffer,
    codec: NodeCodec,
    cipher: Option<NodeCipher>,
    closed: bool,
}

impl Disk {
    /// Creates a fresh store: deletes any existing disk files, opens four
    /// empty ones, persists a fresh superblock and cache index.
    pub fn create(cfg: &StoreConfig) -> Result<Self> {
        let cipher = Self::load_cipher(cfg)?;
        let files = DiskFiles::create(&cfg.disks.paths)?;
        let super_block = SuperBlock::initialize(&files, cfg)?;
        let cache_block = CacheBlock::init(&files, cfg)?;
        let buffer = Buffer::new(super_block.height());
        info!(encrypted = cipher.is_some(), "store created");
        Ok(Self {
            files,
            super_block,
            cache_block,
            buffer,
            codec: NodeCodec::new(&cfg.tree),
            cipher,
            closed: false,
        })
    }

    /// Opens an existing store, loading superblock and cache index from
    /// their reserved regions.
    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        let cipher = Self::load_cipher(cfg)?;
        let files = DiskFiles::open(&cfg.disks.paths)?;
        let super_block = SuperBlock::load(&files, cfg)?;
        let cache_block = CacheBlock::load(&files, cfg)?;
        let buffer = Buffer::new(super_block.height());
        info!(
            height = super_block.height(),
            keys = super_block.key_count(),
            "store opened"
        );
        Ok(Self {
            files,
            super_block,
            cache_block,
            buffer,
            codec: NodeCodec::new(&cfg.tree),
            cipher,
            closed: false,
        })
    }

    fn load_cipher(cfg: &StoreConfig) -> Result<Option<NodeCipher>> {
        if !cfg.encrypted {
            return Ok(None);
        }
        let path = cfg
            .key_path
            .as_ref()
            .ok_or_else(|| StoreError::Config("encrypted store requires key_path".into()))?;
        Ok(Some(NodeCipher::load(path)?))
    }

    /// Writes a node, placing new nodes on disk 0.
    pub fn write_node(&mut self, node: &mut Node, is_new: bool) -> Result<()> {
        let disk = if is_new {
            DEFAULT_NEW_NODE_DISK
        } else {
            node.pid().disk_index()
        };
        self.write_node_to(node, is_new, disk)
    }

    /// Writes a node to the chosen disk.
    ///
    /// A buffered identifier short-circuits to a no-op: residency means the
    /// on-disk copy is current (mutators evict via [`Disk::invalidate`]
    /// first). New nodes get an offset reserved on `disk`, both identifiers
    /// stamped, and the matching node counter bumped.
    pub fn write_node_to(&mut self, node: &mut Node, is_new: bool, disk: usize) -> Result<()> {
        if self.buffer.contains(node.pid()) {
            debug!(pid = %node.pid(), "write skipped, node buffered");
            return Ok(());
        }
        if is_new {
            let inner = node.is_inner();
            let stored_len = self.codec.stored_len(inner, self.cipher.is_some()) as u64;
            let start = self.super_block.reserve(disk, stored_len)?;
            node.set_ids(Pid::new(disk, start)?);
            if inner {
                self.super_block.add_inner_node();
            } else {
                self.super_block.add_leaf_node();
            }
        } else if node.pid().is_null() {
            return Err(StoreError::Invalid(
                "cannot rewrite a node that was never allocated".into(),
            ));
        }
        let offset = node.pid().offset();
        let encoded = self.codec.encode(node)?;
        let stored = match &self.cipher {
            Some(cipher) => cipher.seal_record(&encoded)?,
            None => encoded,
        };
        self.files.write_at(disk, offset, &stored)?;
        debug!(pid = %node.pid(), disk, len = stored.len(), is_new, "node written");
        Ok(())
    }

    /// Reads a node by identifier, via the buffer when resident.
    ///
    /// Returns `Ok(None)` when the addressed region does not exist yet (a
    /// fresh store probed before population). A record that starts but ends
    /// early is corruption, not absence.
    pub fn read_node(&mut self, pid: Pid) -> Result<Option<Node>> {
        if let Some(node) = self.buffer.get(pid) {
            debug!(%pid, "read served from buffer");
            return Ok(Some(node.clone()));
        }
        let disk = pid.disk_index();
        let offset = pid.offset();
        let mut tag = [0u8; 1];
        match self.files.read_at(disk, offset, &mut tag) {
            Ok(()) => {}
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                info!(disk, offset, "disk not yet populated, nothing to read");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        let inner = NodeCodec::is_inner_tag(tag[0]);
        let payload_len = self.codec.payload_len(inner);
        let stored_len = if self.cipher.is_some() {
            crypto::padded_len(payload_len)
        } else {
            payload_len
        };
        let mut stored = vec![0u8; stored_len];
        self.files
            .read_at(disk, offset + 1, &mut stored)
            .map_err(|e| match e {
                StoreError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
                    StoreError::Corruption("truncated node record")
                }
                other => other,
            })?;
        let mut record = Vec::with_capacity(1 + payload_len);
        record.push(tag[0]);
        match &self.cipher {
            Some(cipher) => record.extend_from_slice(&cipher.decrypt(&stored)?),
            None => record.append(&mut stored),
        }
        let node = self.codec.decode(&record)?;
        self.buffer.put(node.clone());
        Ok(Some(node))
    }

    /// Reads the exact stored byte image of a node (tag byte plus possibly
    /// encrypted payload), without decoding or buffering. For integrity and
    /// maintenance operations.
    pub fn read_node_bytes(&self, pid: Pid) -> Result<Option<Vec<u8>>> {
        let disk = pid.disk_index();
        let offset = pid.offset();
        let mut tag = [0u8; 1];
        match self.files.read_at(disk, offset, &mut tag) {
            Ok(()) => {}
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                info!(disk, offset, "disk not yet populated, nothing to read");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        let inner = NodeCodec::is_inner_tag(tag[0]);
        let total = self.codec.stored_len(inner, self.cipher.is_some());
        let mut bytes = vec![0u8; total];
        self.files
            .read_at(disk, offset, &mut bytes)
            .map_err(|e| match e {
                StoreError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
                    StoreError::Corruption("truncated node record")
                }
                other => other,
            })?;
        Ok(Some(bytes))
    }

    /// Drops a buffered node so the next write for its identifier reaches
    /// the disk. Mutators call this before rewriting.
    pub fn invalidate(&mut self, pid: Pid) {
        self.buffer.remove(pid);
    }

    /// Repair hook: raises disk 0's recorded next-write cursor if `offset`
    /// exceeds it. Not part of the normal write path.
    pub fn register_write_access(&mut self, offset: u64) {
        if self.super_block.next_write_offset(DEFAULT_NEW_NODE_DISK) < offset {
            self.super_block
                .set_next_write_offset(DEFAULT_NEW_NODE_DISK, offset);
        }
    }

    /// Bulk metadata checkpoint: height, all four cursors, and the key
    /// count in one durable save.
    pub fn update_super_block(
        &mut self,
        height: u64,
        offsets: [u64; 4],
        key_count: u64,
    ) -> Result<()> {
        self.super_block.set_height(height);
        for (disk, offset) in offsets.into_iter().enumerate() {
            self.super_block.set_next_write_offset(disk, offset);
        }
        self.super_block.set_key_count(key_count);
        self.super_block.save(&self.files)
    }

    /// Records the tree root's identifier; persisted with the next save.
    pub fn set_tree_root(&mut self, root: Option<Pid>) {
        self.super_block.set_root(root);
    }

    /// The store's superblock.
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// The store's persistent cache index.
    pub fn cache_block_mut(&mut self) -> &mut CacheBlock {
        &mut self.cache_block
    }

    /// The node codec configured for this store.
    pub fn codec(&self) -> &NodeCodec {
        &self.codec
    }

    /// Whether payloads are encrypted at rest.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Empties the buffer, saves superblock and cache index, and releases
    /// all disk handles. No further operations are valid afterwards.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.buffer.clear();
        self.cache_block.save(&self.files)?;
        self.super_block.save(&self.files)?;
        self.files.sync_all()?;
        self.closed = true;
        info!("store closed");
        Ok(())
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close_inner() {
                warn!(error = %e, "close sequence failed during drop");
            }
        }
    }
}
