//! Generation List
//!
//! The ordered set of sealed sorted storages, newest first.
//!
//! ## Concurrency
//! The list itself is an immutable `Arc<Vec<..>>` published behind a
//! `RwLock`. Lookups clone the `Arc` and search without holding the lock;
//! replacing the list never invalidates a lookup in flight. Old storages are
//! released when the last snapshot holding them drops.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec::{FixedCodec, Record};
use crate::error::Result;
use crate::storage::SortedStorage;

/// One sealed generation
pub type Generation<T> = Arc<SortedStorage<T>>;

/// Immutable view of the list at one instant
pub type GenerationSnapshot<T> = Arc<Vec<Generation<T>>>;

/// Sorted storages ordered newest to oldest; a key in a newer generation
/// shadows the same key in every older one.
pub struct GenerationList<T: Record> {
    generations: RwLock<GenerationSnapshot<T>>,
}

impl<T: Record> GenerationList<T> {
    pub fn new() -> Self {
        Self::from_generations(Vec::new())
    }

    /// `generations` ordered newest first
    pub fn from_generations(generations: Vec<Generation<T>>) -> Self {
        Self {
            generations: RwLock::new(Arc::new(generations)),
        }
    }

    /// Live record for `key`; a tombstone in the newest holding generation
    /// means absent
    pub fn find(&self, key: &T::Key) -> Result<Option<T>> {
        Ok(self.find_latest(key)?.filter(|record| !record.is_tombstone()))
    }

    /// First record for `key` from newest to oldest, tombstones included
    pub fn find_latest(&self, key: &T::Key) -> Result<Option<T>> {
        let snapshot = self.snapshot();
        find_in(&snapshot, key)
    }

    /// The current list
    pub fn snapshot(&self) -> GenerationSnapshot<T> {
        Arc::clone(&self.generations.read())
    }

    /// Publish a whole new list; returns the one it replaced
    pub fn replace(&self, generations: Vec<Generation<T>>) -> GenerationSnapshot<T> {
        let mut current = self.generations.write();
        std::mem::replace(&mut *current, Arc::new(generations))
    }

    /// Make `generation` the newest
    pub fn push_newest(&self, generation: Generation<T>) {
        let mut current = self.generations.write();
        let mut next = Vec::with_capacity(current.len() + 1);
        next.push(generation);
        next.extend(current.iter().cloned());
        *current = Arc::new(next);
    }

    /// Replace the `count` newest generations with `merged`; returns the
    /// generations taken out
    pub fn replace_newest(&self, count: usize, merged: Vec<Generation<T>>) -> Vec<Generation<T>> {
        let mut current = self.generations.write();
        let count = count.min(current.len());
        let removed = current[..count].to_vec();
        let mut next = merged;
        next.extend(current[count..].iter().cloned());
        *current = Arc::new(next);
        removed
    }

    pub fn len(&self) -> usize {
        self.generations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records across every generation, duplicates across generations
    /// counted once per generation
    pub fn total_records(&self) -> u64 {
        self.snapshot().iter().map(|g| g.register().count()).sum()
    }
}

impl<T: Record> Default for GenerationList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Search `generations` (newest first) for the first record of `key`.
///
/// Each generation is skipped without any read when the key is outside its
/// key range or its register filter rules the key out.
pub fn find_in<T: Record>(generations: &[Generation<T>], key: &T::Key) -> Result<Option<T>> {
    let key_bytes = key.serialize();
    for generation in generations {
        if !generation.range_contains(key) {
            continue;
        }
        if !generation.register().might_contain(&key_bytes) {
            continue;
        }
        if let Some(record) = generation.find(key)? {
            return Ok(Some(record));
        }
    }
    Ok(None)
}
