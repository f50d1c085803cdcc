//! Store Directory
//!
//! Creates and opens named byte stores.
//!
//! ## Responsibilities
//! - Map store names to files under a root directory (disk) or to
//!   in-process buffers (memory)
//! - Hand out unique, monotonically numbered file names
//! - Discover and remove files on startup cleanup

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use crate::error::Result;

use super::backing::{Backing, DiskFile, MemoryFile};
use super::ByteStore;

/// Extension of every record file
pub const DATA_EXTENSION: &str = "dat";

enum Location {
    Disk {
        root: PathBuf,
        /// Keeps a scratch directory alive; deleted when the last clone drops
        _scratch: Option<Arc<TempDir>>,
    },
    Memory,
}

/// Factory for named byte stores
pub struct StoreDirectory {
    location: Location,
    next_file_id: AtomicU64,
}

impl StoreDirectory {
    /// Open or create a directory of record files.
    ///
    /// File numbering continues after the highest number already present.
    pub fn disk(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let directory = Self {
            location: Location::Disk {
                root: root.to_path_buf(),
                _scratch: None,
            },
            next_file_id: AtomicU64::new(1),
        };
        let max_id = directory
            .list()?
            .iter()
            .filter_map(|name| Self::parse_file_id(name))
            .max()
            .unwrap_or(0);
        directory.next_file_id.store(max_id + 1, Ordering::SeqCst);
        Ok(directory)
    }

    /// A disk directory in a fresh temporary folder, removed on drop
    pub fn temporary() -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("tierkv-").tempdir()?;
        Ok(Self {
            location: Location::Disk {
                root: scratch.path().to_path_buf(),
                _scratch: Some(Arc::new(scratch)),
            },
            next_file_id: AtomicU64::new(1),
        })
    }

    /// Purely in-memory stores
    pub fn memory() -> Self {
        Self {
            location: Location::Memory,
            next_file_id: AtomicU64::new(1),
        }
    }

    /// Root directory for the disk backend
    pub fn root(&self) -> Option<&Path> {
        match &self.location {
            Location::Disk { root, .. } => Some(root),
            Location::Memory => None,
        }
    }

    /// True when stores survive the process
    pub fn is_persistent(&self) -> bool {
        matches!(self.location, Location::Disk { _scratch: None, .. })
    }

    /// A fresh file name such as `gen-000042.dat`
    pub fn unique_name(&self, prefix: &str) -> String {
        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{:06}.{}", prefix, id, DATA_EXTENSION)
    }

    /// Create an empty store, truncating any existing file of that name
    pub fn create(&self, name: &str) -> Result<ByteStore> {
        let backing = match &self.location {
            Location::Disk { root, .. } => Backing::Disk(DiskFile::create(name, root.join(name))?),
            Location::Memory => Backing::Memory(MemoryFile::new(name)),
        };
        tracing::trace!("Created store {}", name);
        Ok(ByteStore::from_backing(backing))
    }

    /// Open an existing store with its content.
    ///
    /// Memory directories hold no files between runs, so opening there
    /// yields `NotFound`.
    pub fn open(&self, name: &str) -> Result<ByteStore> {
        match &self.location {
            Location::Disk { root, .. } => Ok(ByteStore::from_backing(Backing::Disk(
                DiskFile::open(name, root.join(name))?,
            ))),
            Location::Memory => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("memory store {} does not exist", name),
            )
            .into()),
        }
    }

    /// Names of all record files (disk only; empty in memory)
    pub fn list(&self) -> Result<Vec<String>> {
        let root = match &self.location {
            Location::Disk { root, .. } => root,
            Location::Memory => return Ok(Vec::new()),
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().map_or(false, |ext| ext == DATA_EXTENSION) {
                if let Some(name) = path.file_name() {
                    names.push(name.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a file by name; missing files are ignored
    pub fn remove(&self, name: &str) -> Result<()> {
        if let Location::Disk { root, .. } = &self.location {
            match fs::remove_file(root.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Parse the file number from a name
    /// "gen-000042.dat" → Some(42)
    fn parse_file_id(name: &str) -> Option<u64> {
        let stem = name.strip_suffix(DATA_EXTENSION)?.strip_suffix('.')?;
        let (_, id) = stem.rsplit_once('-')?;
        id.parse().ok()
    }
}

impl std::fmt::Debug for StoreDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Location::Disk { root, .. } => write!(f, "StoreDirectory::Disk({})", root.display()),
            Location::Memory => write!(f, "StoreDirectory::Memory"),
        }
    }
}
