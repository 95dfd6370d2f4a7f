//! Store configuration, loaded once from a TOML file and passed by
//! reference into every component that needs it.
//!
//! ```toml
//! encrypted = true
//! key_path = "store.key"
//!
//! [disks]
//! paths = ["d0.disk", "d1.disk", "d2.disk", "d3.disk"]
//!
//! [superblock]
//! offset = 0
//! size = 4096
//!
//! [cache]
//! offset = 4096
//! size = 8192
//! level_elements = 32
//!
//! [nodes]
//! base_offsets = [12288, 12288, 12288, 12288]
//!
//! [keys]
//! count = 1000
//! domain_start = 1
//! domain_end = 1000000
//!
//! [tree]
//! inner_degree = 64
//! leaf_degree = 64
//! min_root_keys = 1
//! value_pad_len = 200
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::disk::cacheblock::CACHE_HEADER_LEN;
use crate::disk::superblock::SUPERBLOCK_ENCODED_LEN;
use crate::error::{Result, StoreError};
use crate::types::{DISK_COUNT, MAX_OFFSET};

/// Complete configuration for one store instance.
///
/// Constructed once (usually via [`StoreConfig::from_path`]) and handed to
/// [`crate::Disk`]; there is no global configuration state.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Whether node payloads are encrypted at rest.
    #[serde(default)]
    pub encrypted: bool,
    /// Path of the hex-encoded 16-byte cipher key; required when
    /// `encrypted` is set.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Disk file locations.
    pub disks: DisksConfig,
    /// Reserved superblock region.
    pub superblock: RegionConfig,
    /// Reserved cache-index region.
    pub cache: CacheConfig,
    /// Node regions, one base offset per disk.
    pub nodes: NodesConfig,
    /// Key domain served by the store.
    pub keys: KeysConfig,
    /// B+ tree geometry.
    pub tree: TreeConfig,
}

/// Paths of the four disk files.
#[derive(Debug, Clone, Deserialize)]
pub struct DisksConfig {
    /// One path per disk, in disk-index order.
    pub paths: [PathBuf; DISK_COUNT],
}

/// A reserved byte range at a fixed offset on every disk.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionConfig {
    /// Absolute byte offset of the region.
    pub offset: u64,
    /// Size of the region in bytes.
    pub size: u64,
}

/// Geometry of the persistent cache index.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Absolute byte offset of the region.
    pub offset: u64,
    /// Size of the region in bytes.
    pub size: u64,
    /// Number of pid slots per tree level.
    pub level_elements: u32,
}

/// Per-disk node regions.
#[derive(Debug, Clone, Deserialize)]
pub struct NodesConfig {
    /// First byte of the append-only node region on each disk.
    pub base_offsets: [u64; DISK_COUNT],
}

/// Bounds of the key domain.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    /// Number of keys ingested into a fresh store.
    pub count: u64,
    /// Smallest key in the domain.
    pub domain_start: u64,
    /// Largest key in the domain.
    pub domain_end: u64,
}

/// B+ tree degree parameters, fixed at store-creation time.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeConfig {
    /// Initial tree height recorded in a fresh superblock.
    #[serde(default)]
    pub height: u64,
    /// Maximum keys per inner node (N); an inner node holds N+1 children.
    pub inner_degree: usize,
    /// Maximum key/value pairs per leaf node (M).
    pub leaf_degree: usize,
    /// Minimum number of keys kept in the root.
    pub min_root_keys: usize,
    /// Fixed width of a leaf value slot in bytes.
    pub value_pad_len: usize,
}

impl StoreConfig {
    /// Loads and validates a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: StoreConfig =
            toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.tree.inner_degree <= 2 {
            return Err(StoreError::Config("inner_degree must be > 2".into()));
        }
        if self.tree.leaf_degree == 0 {
            return Err(StoreError::Config("leaf_degree must be > 0".into()));
        }
        if self.tree.value_pad_len == 0 {
            return Err(StoreError::Config("value_pad_len must be > 0".into()));
        }
        if self.tree.min_root_keys == 0 {
            return Err(StoreError::Config("min_root_keys must be > 0".into()));
        }
        if self.keys.domain_start > self.keys.domain_end {
            return Err(StoreError::Config("key domain start exceeds end".into()));
        }
        if self.superblock.size < SUPERBLOCK_ENCODED_LEN as u64 {
            return Err(StoreError::Config(format!(
                "superblock region smaller than encoding ({} < {})",
                self.superblock.size, SUPERBLOCK_ENCODED_LEN
            )));
        }
        if self.cache.size < CACHE_HEADER_LEN as u64 {
            return Err(StoreError::Config(format!(
                "cache region smaller than header ({} < {})",
                self.cache.size, CACHE_HEADER_LEN
            )));
        }
        if self.cache.level_elements == 0 {
            return Err(StoreError::Config("cache level_elements must be > 0".into()));
        }
        // Superblock and cache index are replicated to every disk, so every
        // node region must clear the reserved regions.
        let reserved_end = self.reserved_end();
        for (disk, off) in self.nodes.base_offsets.iter().enumerate() {
            if *off < reserved_end {
                return Err(StoreError::Config(format!(
                    "disk {disk} node region ({off}) overlaps reserved regions (end {reserved_end})"
                )));
            }
            if *off > MAX_OFFSET {
                return Err(StoreError::Config(
                    "node base offset exceeds identifier capacity".into(),
                ));
            }
        }
        if self.encrypted && self.key_path.is_none() {
            return Err(StoreError::Config(
                "encrypted store requires key_path".into(),
            ));
        }
        Ok(())
    }

    /// First byte past the reserved superblock and cache regions.
    pub fn reserved_end(&self) -> u64 {
        (self.superblock.offset + self.superblock.size)
            .max(self.cache.offset + self.cache.size)
    }
}
