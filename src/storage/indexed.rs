//! Indexed Record Storage
//!
//! Fixed-stride records in one byte store, addressed by position.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;

use crate::codec::FixedCodec;
use crate::error::{Result, TierError};
use crate::store::{ByteStore, ReadHandle};

use super::iterator::RecordIter;

/// Records encoded per write when appending many at once
const APPEND_CHUNK_RECORDS: usize = 4096;

/// A sequence of `T` records in one byte store.
///
/// Record `i` lives at byte offset `i * T::SIZE`; there is no separate index
/// file. The record count is derived from the store size, so it follows the
/// store across swaps.
pub struct IndexedStorage<T> {
    store: ByteStore,
    reads: Arc<AtomicU64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FixedCodec> IndexedStorage<T> {
    /// Wrap an empty (or freshly truncated) store
    pub fn create(store: ByteStore) -> Self {
        Self {
            store,
            reads: Arc::new(AtomicU64::new(0)),
            _marker: PhantomData,
        }
    }

    /// Wrap a store holding existing records.
    ///
    /// A size that is not a whole number of records means a torn or foreign
    /// file and is reported as corruption.
    pub fn open(store: ByteStore) -> Result<Self> {
        let size = store.size();
        if size % T::SIZE as u64 != 0 {
            return Err(TierError::Corruption(format!(
                "store {} holds {} bytes, not a multiple of record size {}",
                store.name(),
                size,
                T::SIZE
            )));
        }
        Ok(Self::create(store))
    }

    /// Append one record; returns its index
    pub fn append(&self, record: &T) -> Result<u64> {
        let mut buf = vec![0u8; T::SIZE];
        record.encode_into(&mut buf);
        let offset = self.store.append(&buf)?;
        Ok(offset / T::SIZE as u64)
    }

    /// Append every record in order; returns how many were written
    pub fn append_all<I>(&self, records: I) -> Result<u64>
    where
        I: IntoIterator<Item = T>,
    {
        let mut buf = BytesMut::with_capacity(APPEND_CHUNK_RECORDS * T::SIZE);
        let mut pending = 0usize;
        let mut written = 0u64;

        for record in records {
            let start = buf.len();
            buf.resize(start + T::SIZE, 0);
            record.encode_into(&mut buf[start..]);
            pending += 1;
            if pending == APPEND_CHUNK_RECORDS {
                self.store.append(&buf)?;
                buf.clear();
                written += pending as u64;
                pending = 0;
            }
        }

        if pending > 0 {
            self.store.append(&buf)?;
            written += pending as u64;
        }
        Ok(written)
    }

    /// Read the record at `index`
    pub fn get(&self, index: u64) -> Result<T> {
        self.view().get(index)
    }

    /// Read `count` consecutive records starting at `start` with one read
    pub fn get_range(&self, start: u64, count: u64) -> Result<Vec<T>> {
        self.view().get_range(start, count)
    }

    /// Number of complete records
    pub fn len(&self) -> u64 {
        self.store.size() / T::SIZE as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy iteration in storage order over the records present now
    pub fn iter(&self) -> RecordIter<T> {
        RecordIter::new(self.view())
    }

    /// A typed, pinned view of the current records
    pub fn view(&self) -> RecordView<T> {
        RecordView::new(self.store.snapshot(), Arc::clone(&self.reads))
    }
}

impl<T> IndexedStorage<T> {
    pub fn store(&self) -> &ByteStore {
        &self.store
    }

    /// Another storage over the same bytes
    pub fn share(&self) -> IndexedStorage<T> {
        IndexedStorage {
            store: self.store.share(),
            reads: Arc::new(AtomicU64::new(0)),
            _marker: PhantomData,
        }
    }

    /// Read-only handle pinned to the current file
    pub fn snapshot(&self) -> ReadHandle {
        self.store.snapshot()
    }

    /// Records read through this storage so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for IndexedStorage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedStorage")
            .field("store", &self.store)
            .finish()
    }
}

// =============================================================================
// RecordView
// =============================================================================

/// Typed access to records through a pinned [`ReadHandle`].
///
/// All reads go to the same file, even if the storage's store is swapped
/// meanwhile.
pub struct RecordView<T> {
    handle: ReadHandle,
    len: u64,
    reads: Arc<AtomicU64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FixedCodec> RecordView<T> {
    fn new(handle: ReadHandle, reads: Arc<AtomicU64>) -> Self {
        let len = handle.size() / T::SIZE as u64;
        Self {
            handle,
            len,
            reads,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: u64) -> Result<T> {
        if index >= self.len {
            return Err(TierError::OutOfRange {
                offset: index * T::SIZE as u64,
                requested: T::SIZE as u64,
                size: self.len * T::SIZE as u64,
            });
        }
        let bytes = self.handle.read(index * T::SIZE as u64, T::SIZE)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        T::decode(&bytes)
    }

    pub fn get_range(&self, start: u64, count: u64) -> Result<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let end = start.checked_add(count).filter(|&end| end <= self.len);
        if end.is_none() {
            return Err(TierError::OutOfRange {
                offset: start.saturating_mul(T::SIZE as u64),
                requested: count.saturating_mul(T::SIZE as u64),
                size: self.len * T::SIZE as u64,
            });
        }

        let bytes = self
            .handle
            .read(start * T::SIZE as u64, count as usize * T::SIZE)?;
        self.reads.fetch_add(count, Ordering::Relaxed);
        bytes.chunks_exact(T::SIZE).map(T::decode).collect()
    }
}

impl<T> Clone for RecordView<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            len: self.len,
            reads: Arc::clone(&self.reads),
            _marker: PhantomData,
        }
    }
}
