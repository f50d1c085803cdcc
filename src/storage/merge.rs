//! Merge iterator over several sorted storages.
//!
//! Produces records in ascending key order. When a key appears in more than
//! one source, only the record from the **newest** source is emitted; sources
//! are ranked by position, index 0 being the newest.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::codec::Record;
use crate::error::Result;

use super::iterator::RecordIter;
use super::sorted::SortedStorage;

/// The current front record of one source
struct HeapEntry<T: Record> {
    record: T,
    /// Rank of the source; lower is newer
    source: usize,
}

impl<T: Record> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Record> Eq for HeapEntry<T> {}

impl<T: Record> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Record> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first,
        // and on equal keys the newest source (lowest rank) pops first.
        other
            .record
            .key()
            .cmp(self.record.key())
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Streams the newest record of every distinct key across all sources
pub struct MergeIterator<T: Record> {
    sources: Vec<RecordIter<T>>,
    heap: BinaryHeap<HeapEntry<T>>,
}

impl<T: Record> MergeIterator<T> {
    /// `sources` are ordered newest first
    pub fn new(sources: &[&SortedStorage<T>]) -> Result<Self> {
        let mut iters: Vec<RecordIter<T>> = sources.iter().map(|s| s.iter()).collect();
        let mut heap = BinaryHeap::with_capacity(iters.len());

        for (source, iter) in iters.iter_mut().enumerate() {
            if let Some(record) = iter.next() {
                heap.push(HeapEntry {
                    record: record?,
                    source,
                });
            }
        }

        Ok(Self {
            sources: iters,
            heap,
        })
    }

    /// Next record in key order, or `None` once every source is drained
    pub fn next_entry(&mut self) -> Result<Option<T>> {
        let top = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        self.advance(top.source)?;

        // Older sources holding the same key are shadowed; skip them.
        while let Some(peek) = self.heap.peek() {
            if peek.record.key() != top.record.key() {
                break;
            }
            if let Some(shadowed) = self.heap.pop() {
                self.advance(shadowed.source)?;
            }
        }

        Ok(Some(top.record))
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(record) = self.sources[source].next() {
            self.heap.push(HeapEntry {
                record: record?,
                source,
            });
        }
        Ok(())
    }
}

impl<T: Record> Iterator for MergeIterator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
