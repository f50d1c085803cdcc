//! Item Register Module
//!
//! Per-storage metadata computed once, when a storage is sealed.
//!
//! ## Variants
//! - `Counting`: number of records
//! - `Filtered`: number of records plus a Bloom filter over the keys, used
//!   to skip storages that cannot contain a key without reading them
//!
//! Registers are rebuilt from the final key set on every seal (sort, merge,
//! or reopen); they are never updated incrementally.

mod bloom;

pub use bloom::BloomFilter;
pub(crate) use bloom::fnv1a_64;

/// Which register to attach to newly sealed storages
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterKind {
    Counting,
    Filtered { false_positive_rate: f64 },
}

impl RegisterKind {
    /// Start collecting metadata for a storage of about `expected` records
    pub fn builder(self, expected: u64) -> RegisterBuilder {
        let filter = match self {
            RegisterKind::Counting => None,
            RegisterKind::Filtered {
                false_positive_rate,
            } => Some(BloomFilter::new(expected, false_positive_rate)),
        };
        RegisterBuilder { count: 0, filter }
    }
}

/// Accumulates register state while a storage is written
#[derive(Debug)]
pub struct RegisterBuilder {
    count: u64,
    filter: Option<BloomFilter>,
}

impl RegisterBuilder {
    /// Record one stored key
    pub fn register_item(&mut self, key: &[u8]) {
        self.count += 1;
        if let Some(filter) = &mut self.filter {
            filter.insert(key);
        }
    }

    /// Seal into an immutable register
    pub fn finish(self) -> ItemRegister {
        match self.filter {
            None => ItemRegister::Counting { count: self.count },
            Some(filter) => ItemRegister::Filtered {
                count: self.count,
                filter,
            },
        }
    }
}

/// Immutable metadata attached to a sealed storage
#[derive(Debug, Clone)]
pub enum ItemRegister {
    Counting { count: u64 },
    Filtered { count: u64, filter: BloomFilter },
}

impl ItemRegister {
    /// Number of records registered at seal time
    pub fn count(&self) -> u64 {
        match self {
            ItemRegister::Counting { count } | ItemRegister::Filtered { count, .. } => *count,
        }
    }

    /// `false` means the key is definitely absent; without a filter the
    /// answer is always "maybe"
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match self {
            ItemRegister::Counting { .. } => true,
            ItemRegister::Filtered { filter, .. } => filter.may_contain(key),
        }
    }

    pub fn filter(&self) -> Option<&BloomFilter> {
        match self {
            ItemRegister::Counting { .. } => None,
            ItemRegister::Filtered { filter, .. } => Some(filter),
        }
    }
}
