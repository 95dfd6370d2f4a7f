//! The persistent cache index paired with the superblock.
//!
//! Tracks a bounded ring of hot node identifiers per tree level inside its
//! reserved region. Initialized together with a fresh superblock, loaded
//! together with an existing one.

use std::ops::Range;

use crate::config::StoreConfig;
use crate::disk::io::DiskFiles;
use crate::error::{Result, StoreError};
use crate::types::Pid;

const MAGIC: [u8; 8] = *b"STRCACHE";
const VERSION: u16 = 1;

const CB_MAGIC: Range<usize> = 0..8;
const CB_VERSION: Range<usize> = 8..10;
const CB_RESERVED: Range<usize> = 10..12;
const CB_LEVEL_ELEMENTS: Range<usize> = 12..16;
const CB_LEVEL_COUNT: Range<usize> = 16..20;

/// Size of the fixed cache-index header.
pub const CACHE_HEADER_LEN: usize = CB_LEVEL_COUNT.end;

/// Durable per-level index of hot node identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheBlock {
    region_offset: u64,
    region_size: u64,
    level_elements: u32,
    levels: Vec<Vec<Pid>>,
}

impl CacheBlock {
    /// Creates an empty cache index and persists it.
    pub fn init(files: &DiskFiles, cfg: &StoreConfig) -> Result<Self> {
        let cb = Self {
            region_offset: cfg.cache.offset,
            region_size: cfg.cache.size,
            level_elements: cfg.cache.level_elements,
            levels: Vec::new(),
        };
        cb.save(files)?;
        Ok(cb)
    }

    /// Loads the cache index from its reserved region on disk 0.
    pub fn load(files: &DiskFiles, cfg: &StoreConfig) -> Result<Self> {
        let mut header = [0u8; CACHE_HEADER_LEN];
        files.read_at(0, cfg.cache.offset, &mut header)?;
        if header[CB_MAGIC] != MAGIC {
            return Err(StoreError::Corruption("invalid cache index magic"));
        }
        let version = u16::from_be_bytes(header[CB_VERSION].try_into().expect("slice is 2 bytes"));
        if version != VERSION {
            return Err(StoreError::Corruption("unsupported cache index version"));
        }
        if header[CB_RESERVED].iter().any(|&b| b != 0) {
            return Err(StoreError::Corruption("cache index reserved field non-zero"));
        }
        let level_elements =
            u32::from_be_bytes(header[CB_LEVEL_ELEMENTS].try_into().expect("slice is 4 bytes"));
        let level_count =
            u32::from_be_bytes(header[CB_LEVEL_COUNT].try_into().expect("slice is 4 bytes"))
                as usize;
        let slots = level_count * level_elements as usize;
        if CACHE_HEADER_LEN as u64 + slots as u64 * 8 > cfg.cache.size {
            return Err(StoreError::Corruption("cache index exceeds its region"));
        }
        let mut body = vec![0u8; slots * 8];
        files.read_at(0, cfg.cache.offset + CACHE_HEADER_LEN as u64, &mut body)?;
        let mut levels = Vec::with_capacity(level_count);
        for level in 0..level_count {
            let mut entries = Vec::new();
            for slot in 0..level_elements as usize {
                let at = (level * level_elements as usize + slot) * 8;
                let raw = u64::from_be_bytes(body[at..at + 8].try_into().expect("slice is 8 bytes"));
                if raw != 0 {
                    entries.push(Pid::from_raw(raw));
                }
            }
            levels.push(entries);
        }
        Ok(Self {
            region_offset: cfg.cache.offset,
            region_size: cfg.cache.size,
            level_elements,
            levels,
        })
    }

    /// Persists the index to the reserved region of every disk.
    pub fn save(&self, files: &DiskFiles) -> Result<()> {
        let slots = self.levels.len() * self.level_elements as usize;
        let total = CACHE_HEADER_LEN + slots * 8;
        if total as u64 > self.region_size {
            return Err(StoreError::Capacity("cache index exceeds its region"));
        }
        let mut buf = vec![0u8; total];
        buf[CB_MAGIC].copy_from_slice(&MAGIC);
        buf[CB_VERSION].copy_from_slice(&VERSION.to_be_bytes());
        buf[CB_LEVEL_ELEMENTS].copy_from_slice(&self.level_elements.to_be_bytes());
        buf[CB_LEVEL_COUNT].copy_from_slice(&(self.levels.len() as u32).to_be_bytes());
        for (level, entries) in self.levels.iter().enumerate() {
            for (slot, pid) in entries.iter().enumerate() {
                let at = CACHE_HEADER_LEN + (level * self.level_elements as usize + slot) * 8;
                buf[at..at + 8].copy_from_slice(&pid.raw().to_be_bytes());
            }
        }
        for disk in 0..crate::types::DISK_COUNT {
            files.write_at(disk, self.region_offset, &buf)?;
        }
        Ok(())
    }

    /// Records a hot identifier for a tree level, evicting the oldest entry
    /// once the level's ring is full.
    pub fn note(&mut self, level: usize, pid: Pid) -> Result<()> {
        let needed = CACHE_HEADER_LEN as u64 + ((level + 1) * self.level_elements as usize) as u64 * 8;
        if needed > self.region_size {
            return Err(StoreError::Capacity("cache index exceeds its region"));
        }
        while self.levels.len() <= level {
            self.levels.push(Vec::new());
        }
        let entries = &mut self.levels[level];
        if let Some(at) = entries.iter().position(|&p| p == pid) {
            entries.remove(at);
        } else if entries.len() == self.level_elements as usize {
            entries.remove(0);
        }
        entries.push(pid);
        Ok(())
    }

    /// Hot identifiers recorded for a level, oldest first.
    pub fn entries(&self, level: usize) -> &[Pid] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use std::path::Path;
    use tempfile::tempdir;

    fn config(dir: &Path) -> StoreConfig {
        StoreConfig::from_toml(&format!(
            r#"
                encrypted = false

                [disks]
                paths = ["{0}/d0.disk", "{0}/d1.disk", "{0}/d2.disk", "{0}/d3.disk"]

                [superblock]
                offset = 0
                size = 1024

                [cache]
                offset = 1024
                size = 1024
                level_elements = 4

                [keys]
                count = 10
                domain_start = 1
                domain_end = 10

                [nodes]
                base_offsets = [2048, 2048, 2048, 2048]

                [tree]
                inner_degree = 4
                leaf_degree = 4
                min_root_keys = 1
                value_pad_len = 16
            "#,
            dir.display()
        ))
        .unwrap()
    }

    #[test]
    fn init_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let files = DiskFiles::create(&cfg.disks.paths).unwrap();
        let mut cb = CacheBlock::init(&files, &cfg).unwrap();
        cb.note(0, Pid::new(0, 2048).unwrap()).unwrap();
        cb.note(1, Pid::new(1, 0).unwrap()).unwrap();
        cb.note(1, Pid::new(2, 64).unwrap()).unwrap();
        cb.save(&files).unwrap();

        let loaded = CacheBlock::load(&files, &cfg).unwrap();
        assert_eq!(loaded, cb);
        assert_eq!(loaded.entries(0), &[Pid::new(0, 2048).unwrap()]);
        assert_eq!(loaded.entries(1).len(), 2);
        assert!(loaded.entries(5).is_empty());
    }

    #[test]
    fn ring_evicts_oldest_and_dedups() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let files = DiskFiles::create(&cfg.disks.paths).unwrap();
        let mut cb = CacheBlock::init(&files, &cfg).unwrap();
        for off in 1..=5u64 {
            cb.note(0, Pid::new(0, off * 64).unwrap()).unwrap();
        }
        // level_elements = 4: the first entry fell out.
        assert_eq!(cb.entries(0).len(), 4);
        assert_eq!(cb.entries(0)[0], Pid::new(0, 128).unwrap());

        // Re-noting an entry moves it to the back without growing the ring.
        cb.note(0, Pid::new(0, 128).unwrap()).unwrap();
        assert_eq!(cb.entries(0).len(), 4);
        assert_eq!(cb.entries(0)[3], Pid::new(0, 128).unwrap());
    }

    #[test]
    fn region_bound_is_enforced() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let files = DiskFiles::create(&cfg.disks.paths).unwrap();
        let mut cb = CacheBlock::init(&files, &cfg).unwrap();
        // 1024-byte region, 4 slots of 8 bytes per level: level 40 is out.
        assert!(matches!(
            cb.note(40, Pid::new(0, 64).unwrap()),
            Err(StoreError::Capacity(_))
        ));
    }

    #[test]
    fn load_rejects_foreign_bytes() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let files = DiskFiles::create(&cfg.disks.paths).unwrap();
        CacheBlock::init(&files, &cfg).unwrap();
        files.write_at(0, cfg.cache.offset, b"BADBYTES").unwrap();
        assert!(matches!(
            CacheBlock::load(&files, &cfg),
            Err(StoreError::Corruption(_))
        ));
    }
}
