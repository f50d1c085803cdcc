//! Byte store handles.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::error::{Result, TierError};

use super::backing::Backing;

/// A named file viewed as a linear byte array.
///
/// The handle owns a *slot* that points at a backing. Every operation clones
/// the backing pointer under a short read lock and then works on that
/// backing alone, so a concurrent [`ByteStore::swap`] never tears a read:
/// the reader finishes on the backing it started with.
pub struct ByteStore {
    slot: Arc<RwLock<Arc<Backing>>>,
}

impl ByteStore {
    pub(crate) fn from_backing(backing: Backing) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(backing))),
        }
    }

    pub(crate) fn current(&self) -> Arc<Backing> {
        Arc::clone(&self.slot.read())
    }

    /// Name of the file currently behind this store
    pub fn name(&self) -> String {
        self.current().name().to_string()
    }

    /// On-disk location of the current file, if any
    pub fn path(&self) -> Option<PathBuf> {
        self.current().path().map(|p| p.to_path_buf())
    }

    /// Current length in bytes
    pub fn size(&self) -> u64 {
        self.current().len()
    }

    /// Read `length` bytes at `offset`
    pub fn read(&self, offset: u64, length: usize) -> Result<Bytes> {
        read_backing(&self.current(), offset, length)
    }

    /// Read into a caller-provided buffer
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.current().read_at(offset, buf)
    }

    /// Write `bytes` at `offset`; `offset` must not exceed the current size
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.current().write_at(offset, bytes)
    }

    /// Append `bytes`; returns the offset they were written at
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        self.current().append(bytes)
    }

    /// Flush file content to stable storage (no-op in memory)
    pub fn sync(&self) -> Result<()> {
        self.current().sync()
    }

    /// Atomically exchange the backings of two stores.
    ///
    /// After the call `self` refers to what `other` held and vice versa.
    /// Both slots are locked in address order, so concurrent swaps cannot
    /// deadlock. Swapping a store with a share of itself is a no-op.
    pub fn swap(&self, other: &ByteStore) {
        if Arc::ptr_eq(&self.slot, &other.slot) {
            return;
        }
        let (first, second) = if Arc::as_ptr(&self.slot) < Arc::as_ptr(&other.slot) {
            (&self.slot, &other.slot)
        } else {
            (&other.slot, &self.slot)
        };
        let mut a = first.write();
        let mut b = second.write();
        std::mem::swap(&mut *a, &mut *b);
    }

    /// Another handle onto the same slot; it follows later swaps
    pub fn share(&self) -> ByteStore {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Pin the current backing and its current length in a read-only handle
    pub fn snapshot(&self) -> ReadHandle {
        let backing = self.current();
        let len = backing.len();
        ReadHandle { backing, len }
    }

    /// Mark the current backing for deletion once every holder has dropped it
    pub fn discard(&self) {
        self.current().discard();
    }
}

impl fmt::Debug for ByteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = self.current();
        f.debug_struct("ByteStore")
            .field("name", &backing.name())
            .field("size", &backing.len())
            .finish()
    }
}

/// A read-only, reference-counted view of a store's bytes as they were when
/// the handle was taken.
///
/// Content is append-only or immutable wherever handles are given out, so the
/// first `size()` bytes never change under the handle. The underlying file
/// lives until the last handle drops.
#[derive(Clone)]
pub struct ReadHandle {
    backing: Arc<Backing>,
    len: u64,
}

impl ReadHandle {
    pub fn name(&self) -> &str {
        self.backing.name()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.backing.path().map(|p| p.to_path_buf())
    }

    /// Length visible through this handle
    pub fn size(&self) -> u64 {
        self.len
    }

    pub fn read(&self, offset: u64, length: usize) -> Result<Bytes> {
        let end = offset.checked_add(length as u64);
        if end.map_or(true, |end| end > self.len) {
            return Err(TierError::OutOfRange {
                offset,
                requested: length as u64,
                size: self.len,
            });
        }
        read_backing(&self.backing, offset, length)
    }

    /// Every byte visible through this handle
    pub fn read_all(&self) -> Result<Bytes> {
        self.read(0, self.len as usize)
    }
}

impl fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("name", &self.backing.name())
            .field("size", &self.len)
            .finish()
    }
}

fn read_backing(backing: &Backing, offset: u64, length: usize) -> Result<Bytes> {
    let mut buf = BytesMut::zeroed(length);
    backing.read_at(offset, &mut buf)?;
    Ok(buf.freeze())
}
