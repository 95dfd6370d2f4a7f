//! Raw positioned I/O over the four disk files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::types::DISK_COUNT;

#[cfg(unix)]
mod positioned {
    use std::fs::File;
    use std::io::{self, ErrorKind};
    use std::os::unix::fs::FileExt;

    /// Reads an exact number of bytes at an absolute offset (pread).
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    /// Writes all bytes at an absolute offset (pwrite).
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod positioned {
    use std::fs::File;
    use std::io::{self, ErrorKind};
    use std::os::windows::fs::FileExt;

    /// Reads an exact number of bytes at an absolute offset (seek_read).
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    /// Writes all bytes at an absolute offset (seek_write).
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

/// Owner of the four random-access disk handles.
///
/// Handles are acquired at construction and released when the value drops,
/// on every exit path. Short reads and writes surface as errors; partial
/// transfers never go unnoticed.
pub struct DiskFiles {
    files: [File; DISK_COUNT],
}

impl DiskFiles {
    /// Deletes any pre-existing disk files and creates four empty ones.
    pub fn create(paths: &[PathBuf; DISK_COUNT]) -> Result<Self> {
        for path in paths {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed existing disk file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Self::open_with(paths, true)
    }

    /// Opens four existing disk files for reading and writing.
    pub fn open(paths: &[PathBuf; DISK_COUNT]) -> Result<Self> {
        Self::open_with(paths, false)
    }

    fn open_with(paths: &[PathBuf; DISK_COUNT], create: bool) -> Result<Self> {
        let mut files = Vec::with_capacity(DISK_COUNT);
        for path in paths {
            files.push(open_rw(path, create)?);
        }
        let files: [File; DISK_COUNT] = files
            .try_into()
            .map_err(|_| StoreError::Corruption("disk handle count mismatch"))?;
        Ok(Self { files })
    }

    /// Reads exactly `dst.len()` bytes at `offset` on the chosen disk.
    pub fn read_at(&self, disk: usize, offset: u64, dst: &mut [u8]) -> Result<()> {
        positioned::read_exact(self.file(disk)?, offset, dst).map_err(StoreError::Io)
    }

    /// Writes all of `src` at `offset` on the chosen disk.
    pub fn write_at(&self, disk: usize, offset: u64, src: &[u8]) -> Result<()> {
        positioned::write_all(self.file(disk)?, offset, src).map_err(StoreError::Io)
    }

    /// Flushes data and metadata of all four disks.
    pub fn sync_all(&self) -> Result<()> {
        for file in &self.files {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Current length of one disk file.
    pub fn len(&self, disk: usize) -> Result<u64> {
        Ok(self.file(disk)?.metadata()?.len())
    }

    fn file(&self, disk: usize) -> Result<&File> {
        self.files
            .get(disk)
            .ok_or(StoreError::Capacity("disk index out of range"))
    }
}

fn open_rw(path: &Path, create: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .truncate(false)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("disk file {} not found", path.display()),
            )),
            _ => StoreError::Io(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths(dir: &Path) -> [PathBuf; DISK_COUNT] {
        [
            dir.join("d0.disk"),
            dir.join("d1.disk"),
            dir.join("d2.disk"),
            dir.join("d3.disk"),
        ]
    }

    #[test]
    fn write_read_roundtrip_per_disk() {
        let dir = tempdir().unwrap();
        let files = DiskFiles::create(&paths(dir.path())).unwrap();
        for disk in 0..DISK_COUNT {
            let payload = vec![disk as u8; 64];
            files.write_at(disk, 128, &payload).unwrap();
            let mut buf = vec![0u8; 64];
            files.read_at(disk, 128, &mut buf).unwrap();
            assert_eq!(buf, payload);
        }
    }

    #[test]
    fn read_past_eof_is_an_error() {
        let dir = tempdir().unwrap();
        let files = DiskFiles::create(&paths(dir.path())).unwrap();
        let mut buf = [0u8; 8];
        let err = files.read_at(0, 0, &mut buf).unwrap_err();
        match err {
            StoreError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn create_truncates_previous_contents() {
        let dir = tempdir().unwrap();
        let paths = paths(dir.path());
        {
            let files = DiskFiles::create(&paths).unwrap();
            files.write_at(1, 0, &[0xAB; 32]).unwrap();
        }
        let files = DiskFiles::create(&paths).unwrap();
        assert_eq!(files.len(1).unwrap(), 0);
    }

    #[test]
    fn open_requires_existing_files() {
        let dir = tempdir().unwrap();
        assert!(DiskFiles::open(&paths(dir.path())).is_err());
    }
}
