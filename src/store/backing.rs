//! Byte store backings: the bytes behind a store handle.
//!
//! A backing is either a file on disk or a buffer in memory. Backings are
//! reference-counted by [`super::ByteStore`] and [`super::ReadHandle`]; a
//! discarded disk backing unlinks its file when the last reference drops.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, TierError};

/// The bytes behind a store
pub(crate) enum Backing {
    Disk(DiskFile),
    Memory(MemoryFile),
}

impl Backing {
    pub(crate) fn name(&self) -> &str {
        match self {
            Backing::Disk(f) => &f.name,
            Backing::Memory(f) => &f.name,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        match self {
            Backing::Disk(f) => f.len.load(Ordering::Acquire),
            Backing::Memory(f) => f.data.read().len() as u64,
        }
    }

    /// Fill `buf` from `offset`; fails with `OutOfRange` past the end
    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.len())?;
        match self {
            Backing::Disk(f) => {
                let mut file = f.file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
                Ok(())
            }
            Backing::Memory(f) => {
                let data = f.data.read();
                let start = offset as usize;
                buf.copy_from_slice(&data[start..start + buf.len()]);
                Ok(())
            }
        }
    }

    /// Overwrite or extend content at `offset`; `offset` may not leave a hole
    pub(crate) fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        match self {
            Backing::Disk(f) => {
                let mut file = f.file.lock();
                let len = f.len.load(Ordering::Acquire);
                check_range(offset, 0, len)?;
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(bytes)?;
                f.len.store(len.max(offset + bytes.len() as u64), Ordering::Release);
                Ok(())
            }
            Backing::Memory(f) => {
                let mut data = f.data.write();
                check_range(offset, 0, data.len() as u64)?;
                let start = offset as usize;
                let end = start + bytes.len();
                if end > data.len() {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Append to the end; returns the offset the bytes landed at
    pub(crate) fn append(&self, bytes: &[u8]) -> Result<u64> {
        match self {
            Backing::Disk(f) => {
                let mut file = f.file.lock();
                let offset = f.len.load(Ordering::Acquire);
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(bytes)?;
                f.len.store(offset + bytes.len() as u64, Ordering::Release);
                Ok(offset)
            }
            Backing::Memory(f) => {
                let mut data = f.data.write();
                let offset = data.len() as u64;
                data.extend_from_slice(bytes);
                Ok(offset)
            }
        }
    }

    pub(crate) fn sync(&self) -> Result<()> {
        match self {
            Backing::Disk(f) => {
                f.file.lock().sync_data()?;
                Ok(())
            }
            Backing::Memory(_) => Ok(()),
        }
    }

    /// Delete the underlying file once the last reference is gone
    pub(crate) fn discard(&self) {
        if let Backing::Disk(f) = self {
            f.discarded.store(true, Ordering::Release);
        }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Backing::Disk(f) => Some(&f.path),
            Backing::Memory(_) => None,
        }
    }
}

fn check_range(offset: u64, requested: u64, size: u64) -> Result<()> {
    match offset.checked_add(requested) {
        Some(end) if end <= size => Ok(()),
        _ => Err(TierError::OutOfRange {
            offset,
            requested,
            size,
        }),
    }
}

// =============================================================================
// Disk Backing
// =============================================================================

pub(crate) struct DiskFile {
    name: String,
    path: PathBuf,
    file: Mutex<File>,
    /// Logical length; kept here so readers never touch file metadata
    len: AtomicU64,
    discarded: AtomicBool,
}

impl DiskFile {
    /// Create (or truncate) a file
    pub(crate) fn create(name: &str, path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self::from_file(name, path, file, 0))
    }

    /// Open an existing file, keeping its content
    pub(crate) fn open(name: &str, path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self::from_file(name, path, file, len))
    }

    fn from_file(name: &str, path: PathBuf, file: File, len: u64) -> Self {
        Self {
            name: name.to_string(),
            path,
            file: Mutex::new(file),
            len: AtomicU64::new(len),
            discarded: AtomicBool::new(false),
        }
    }
}

impl Drop for DiskFile {
    fn drop(&mut self) {
        if !self.discarded.load(Ordering::Acquire) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed discarded file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

// =============================================================================
// Memory Backing
// =============================================================================

pub(crate) struct MemoryFile {
    name: String,
    data: RwLock<Vec<u8>>,
}

impl MemoryFile {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: RwLock::new(Vec::new()),
        }
    }
}
