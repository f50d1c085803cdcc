//! Record Iterator
//!
//! Sequential iteration over a pinned record view, reading in chunks.

use std::collections::VecDeque;

use crate::codec::FixedCodec;
use crate::error::Result;

use super::indexed::RecordView;

/// Records fetched per read
const CHUNK_RECORDS: u64 = 1024;

/// Iterator over records in storage order.
///
/// Finite: it stops at the record count the view was pinned with. Create a
/// new one from the storage to start over.
pub struct RecordIter<T> {
    view: RecordView<T>,
    /// Next record index to fetch from the view
    next_index: u64,
    buffer: VecDeque<T>,
    failed: bool,
}

impl<T: FixedCodec> RecordIter<T> {
    pub(super) fn new(view: RecordView<T>) -> Self {
        Self {
            view,
            next_index: 0,
            buffer: VecDeque::new(),
            failed: false,
        }
    }

    /// Records not yet yielded
    pub fn remaining(&self) -> u64 {
        self.view.len() - self.next_index + self.buffer.len() as u64
    }

    /// Take up to `n` records; fewer only at the end
    pub fn collect_batch(&mut self, n: usize) -> Result<Vec<T>> {
        let mut batch = Vec::with_capacity(n.min(self.remaining() as usize));
        for _ in 0..n {
            match self.next() {
                Some(record) => batch.push(record?),
                None => break,
            }
        }
        Ok(batch)
    }

    fn refill(&mut self) -> Result<()> {
        let count = CHUNK_RECORDS.min(self.view.len() - self.next_index);
        let records = self.view.get_range(self.next_index, count)?;
        self.next_index += count;
        self.buffer.extend(records);
        Ok(())
    }
}

impl<T: FixedCodec> Iterator for RecordIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() {
            if self.next_index >= self.view.len() {
                return None;
            }
            if let Err(e) = self.refill() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining() as usize))
    }
}
