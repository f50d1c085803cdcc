//! Sorted Record Storage
//!
//! An indexed storage whose records are strictly ascending by key, with the
//! register computed when it was sealed.

use std::cmp::Ordering;

use bytes::BytesMut;

use crate::codec::{FixedCodec, Record};
use crate::error::{Result, TierError};
use crate::register::{ItemRegister, RegisterBuilder, RegisterKind};
use crate::store::{ByteStore, ReadHandle};

use super::indexed::IndexedStorage;
use super::iterator::RecordIter;
use super::merge::MergeIterator;

/// Records buffered before each write while sealing
const WRITE_BATCH_RECORDS: usize = 4096;

/// Immutable, key-ordered storage with its register
pub struct SortedStorage<T: Record> {
    records: IndexedStorage<T>,
    register: ItemRegister,
    min_key: Option<T::Key>,
    max_key: Option<T::Key>,
}

impl<T: Record> SortedStorage<T> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Build from records ordered by their keys' `Ord`.
    ///
    /// When `sorted` is false the input is sorted first and, for keys that
    /// repeat, the record closest to the end of `records` wins.
    pub fn from_records(
        records: Vec<T>,
        sorted: bool,
        store: ByteStore,
        kind: RegisterKind,
    ) -> Result<Self> {
        Self::from_records_by(
            records,
            sorted,
            |a, b| a.key() < b.key(),
            |a, b| a.key() == b.key(),
            store,
            kind,
        )
    }

    /// Build from records with explicit comparators.
    ///
    /// `is_less` and `is_eq` must describe a strict total order on keys.
    /// Pre-sorted input must already be free of duplicates.
    pub fn from_records_by<L, E>(
        mut records: Vec<T>,
        sorted: bool,
        is_less: L,
        is_eq: E,
        store: ByteStore,
        kind: RegisterKind,
    ) -> Result<Self>
    where
        L: FnMut(&T, &T) -> bool,
        E: FnMut(&T, &T) -> bool,
    {
        if !sorted {
            let end = sorted_end(&mut records, is_less, is_eq);
            records.truncate(end);
        }

        let mut writer = SortedWriter::new(store, kind, records.len() as u64);
        for record in records {
            writer.push(record)?;
        }
        writer.finish()
    }

    /// Merge sorted storages into one.
    ///
    /// `newer` is ordered newest first; on equal keys the newest record wins.
    /// A winning tombstone is written only when `retain_tombstone` says an
    /// older, unmerged storage may still hold its key.
    pub fn merge<F>(
        newer: &[&SortedStorage<T>],
        store: ByteStore,
        kind: RegisterKind,
        mut retain_tombstone: F,
    ) -> Result<Self>
    where
        F: FnMut(&T::Key) -> Result<bool>,
    {
        let expected: u64 = newer.iter().map(|s| s.len()).sum();
        let mut merge = MergeIterator::new(newer)?;
        let mut writer = SortedWriter::new(store, kind, expected);

        while let Some(record) = merge.next_entry()? {
            if record.is_tombstone() && !retain_tombstone(record.key())? {
                continue;
            }
            writer.push(record)?;
        }
        writer.finish()
    }

    /// Merge like [`SortedStorage::merge`], splitting the output into
    /// key-disjoint segments of at most `segment_len` records.
    ///
    /// `next_store` supplies an empty store for each segment. No segment is
    /// created for an empty result.
    pub fn merge_segmented<S, F>(
        newer: &[&SortedStorage<T>],
        segment_len: u64,
        mut next_store: S,
        kind: RegisterKind,
        mut retain_tombstone: F,
    ) -> Result<Vec<Self>>
    where
        S: FnMut() -> Result<ByteStore>,
        F: FnMut(&T::Key) -> Result<bool>,
    {
        if segment_len == 0 {
            return Err(TierError::InvalidArgument(
                "segment length must be > 0".to_string(),
            ));
        }

        let mut remaining: u64 = newer.iter().map(|s| s.len()).sum();
        let mut merge = MergeIterator::new(newer)?;
        let mut segments = Vec::new();
        let mut writer: Option<SortedWriter<T>> = None;

        while let Some(record) = merge.next_entry()? {
            remaining = remaining.saturating_sub(1);
            if record.is_tombstone() && !retain_tombstone(record.key())? {
                continue;
            }

            if writer.is_none() {
                writer = Some(SortedWriter::new(
                    next_store()?,
                    kind,
                    (remaining + 1).min(segment_len),
                ));
            }

            let mut segment_full = false;
            if let Some(current) = writer.as_mut() {
                current.push(record)?;
                segment_full = current.count() >= segment_len;
            }
            if segment_full {
                if let Some(full) = writer.take() {
                    segments.push(full.finish()?);
                }
            }
        }

        if let Some(last) = writer {
            segments.push(last.finish()?);
        }
        Ok(segments)
    }

    /// Reopen a sealed storage, re-checking order and rebuilding its register
    pub fn open(store: ByteStore, kind: RegisterKind) -> Result<Self> {
        let records = IndexedStorage::<T>::open(store)?;
        let mut register = kind.builder(records.len());
        let mut min_key = None;
        let mut max_key: Option<T::Key> = None;

        for record in records.iter() {
            let record = record?;
            let key = record.key();
            if let Some(prev) = &max_key {
                if prev >= key {
                    return Err(TierError::Corruption(format!(
                        "sorted storage {} is not strictly ascending",
                        records.store().name()
                    )));
                }
            }
            register.register_item(&key.serialize());
            if min_key.is_none() {
                min_key = Some(key.clone());
            }
            max_key = Some(key.clone());
        }

        Ok(Self {
            records,
            register: register.finish(),
            min_key,
            max_key,
        })
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Binary search for `key`; O(log n) record reads
    pub fn find(&self, key: &T::Key) -> Result<Option<T>> {
        let view = self.records.view();
        if view.is_empty() {
            return Ok(None);
        }

        // If present, `key` lies in [first_leq, last_gt).
        let mut first_leq = 0u64;
        let mut last_gt = view.len();
        while last_gt - first_leq > 1 {
            let middle = first_leq + (last_gt - first_leq) / 2;
            let record = view.get(middle)?;
            match record.key().cmp(key) {
                Ordering::Less => first_leq = middle,
                Ordering::Equal => return Ok(Some(record)),
                Ordering::Greater => last_gt = middle,
            }
        }

        let candidate = view.get(first_leq)?;
        Ok((candidate.key() == key).then_some(candidate))
    }

    /// False when `key` lies outside `[min_key, max_key]`
    pub fn range_contains(&self, key: &T::Key) -> bool {
        match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn register(&self) -> &ItemRegister {
        &self.register
    }

    pub fn len(&self) -> u64 {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min_key(&self) -> Option<&T::Key> {
        self.min_key.as_ref()
    }

    pub fn max_key(&self) -> Option<&T::Key> {
        self.max_key.as_ref()
    }

    pub fn get(&self, index: u64) -> Result<T> {
        self.records.get(index)
    }

    pub fn iter(&self) -> RecordIter<T> {
        self.records.iter()
    }

    pub fn name(&self) -> String {
        self.records.store().name()
    }

    pub fn records(&self) -> &IndexedStorage<T> {
        &self.records
    }

    pub fn snapshot(&self) -> ReadHandle {
        self.records.snapshot()
    }

    /// Delete the file once the last reader lets go
    pub fn discard(&self) {
        self.records.store().discard();
    }
}

impl<T: Record> std::fmt::Debug for SortedStorage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedStorage")
            .field("records", &self.records)
            .field("count", &self.register.count())
            .finish()
    }
}

// =============================================================================
// Sorting
// =============================================================================

/// Sort `items` and drop repeated keys, keeping the **last** occurrence of
/// each key in the original order.
///
/// Returns the new logical end: `items[..end]` is strictly ascending and
/// everything after it is leftover. Implemented as reverse, stable sort,
/// then unique, so the latest record is first within every run of equals.
pub fn sorted_end<T, L, E>(items: &mut [T], mut is_less: L, mut is_eq: E) -> usize
where
    L: FnMut(&T, &T) -> bool,
    E: FnMut(&T, &T) -> bool,
{
    items.reverse();
    items.sort_by(|a, b| {
        if is_less(a, b) {
            Ordering::Less
        } else if is_less(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });

    let mut end = 0usize;
    for read in 0..items.len() {
        if end == 0 || !is_eq(&items[end - 1], &items[read]) {
            items.swap(end, read);
            end += 1;
        }
    }
    end
}

// =============================================================================
// SortedWriter
// =============================================================================

/// Writes strictly ascending records and builds the register as it goes
struct SortedWriter<T: Record> {
    records: IndexedStorage<T>,
    register: RegisterBuilder,
    buffer: BytesMut,
    pending: usize,
    count: u64,
    min_key: Option<T::Key>,
    max_key: Option<T::Key>,
}

impl<T: Record> SortedWriter<T> {
    fn new(store: ByteStore, kind: RegisterKind, expected: u64) -> Self {
        Self {
            records: IndexedStorage::create(store),
            register: kind.builder(expected),
            buffer: BytesMut::with_capacity(WRITE_BATCH_RECORDS * T::SIZE),
            pending: 0,
            count: 0,
            min_key: None,
            max_key: None,
        }
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn push(&mut self, record: T) -> Result<()> {
        if let Some(prev) = &self.max_key {
            if prev >= record.key() {
                return Err(TierError::InvalidArgument(
                    "records must be written in strictly ascending key order".to_string(),
                ));
            }
        }

        let key = record.key().clone();
        self.register.register_item(&key.serialize());
        if self.min_key.is_none() {
            self.min_key = Some(key.clone());
        }
        self.max_key = Some(key);

        let start = self.buffer.len();
        self.buffer.resize(start + T::SIZE, 0);
        record.encode_into(&mut self.buffer[start..]);
        self.pending += 1;
        self.count += 1;

        if self.pending >= WRITE_BATCH_RECORDS {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending > 0 {
            self.records.store().append(&self.buffer)?;
            self.buffer.clear();
            self.pending = 0;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<SortedStorage<T>> {
        self.flush()?;
        self.records.store().sync()?;
        Ok(SortedStorage {
            records: self.records,
            register: self.register.finish(),
            min_key: self.min_key,
            max_key: self.max_key,
        })
    }
}
