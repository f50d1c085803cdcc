//! Sharded Storage
//!
//! Spreads keys over N independent [`ShrinkableStorage`] shards by key hash.
//! Each shard has its own head, generations, and manifest, so maintenance on
//! one shard never blocks writes to another.
//!
//! ## Layout
//! ```text
//! data_dir/
//!   shard-000/  MANIFEST  head-*.dat  gen-*.dat
//!   shard-001/  ...
//! ```
//!
//! The shard of a key is `fnv1a(key) % N`. The shard count is fixed when the
//! directory is first populated; reopening with another count is refused.

use std::fs;
use std::path::Path;

use crate::codec::{ByteArray, Key};
use crate::config::{Backend, Config};
use crate::engine::{ShrinkableStorage, StorageStats};
use crate::error::{Result, TierError};
use crate::register::fnv1a_64;

/// FNV offset basis mixed with a fixed seed, so shard routing is independent
/// of the Bloom filter hashes
const SHARD_HASH_BASIS: u64 = 0xcbf2_9ce4_8422_2325 ^ 239;

const SHARD_DIR_PREFIX: &str = "shard-";

/// Key-hashing wrapper over `N` shrinkable storages
pub struct ShardedStorage<const K: usize, const V: usize> {
    shards: Vec<ShrinkableStorage<K, V>>,
}

impl<const K: usize, const V: usize> ShardedStorage<K, V> {
    /// Open or create `shard_count` shards.
    ///
    /// With a disk backend shard `i` lives in `data_dir/shard-{i:03}`; with a
    /// memory backend every shard gets its own memory directory.
    pub fn open(config: Config, shard_count: usize) -> Result<Self> {
        config.validate()?;
        if shard_count == 0 {
            return Err(TierError::Config("shard_count must be > 0".to_string()));
        }

        if let Backend::Disk { data_dir } = &config.backend {
            fs::create_dir_all(data_dir)?;
            let existing = existing_shard_dirs(data_dir)?;
            if existing != 0 && existing != shard_count {
                return Err(TierError::Config(format!(
                    "{} holds {} shards, asked to open {}",
                    data_dir.display(),
                    existing,
                    shard_count
                )));
            }
        }

        let mut shards = Vec::with_capacity(shard_count);
        for index in 0..shard_count {
            let mut shard_config = config.clone();
            if let Backend::Disk { data_dir } = &config.backend {
                shard_config.backend = Backend::Disk {
                    data_dir: data_dir.join(shard_dir_name(index)),
                };
            }
            shards.push(ShrinkableStorage::open(shard_config)?);
        }

        tracing::info!("Opened sharded storage with {} shards", shard_count);
        Ok(Self { shards })
    }

    // =========================================================================
    // Key-value operations
    // =========================================================================

    pub fn put(&self, key: Key<K>, value: ByteArray<V>) -> Result<()> {
        self.shard_for(&key).put(key, value)
    }

    pub fn remove(&self, key: Key<K>) -> Result<()> {
        self.shard_for(&key).remove(key)
    }

    pub fn get(&self, key: &Key<K>) -> Result<Option<ByteArray<V>>> {
        self.shard_for(key).get(key)
    }

    pub fn contains(&self, key: &Key<K>) -> Result<bool> {
        self.shard_for(key).contains(key)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Shrink every shard, stopping at the first failure
    pub fn shrink(&self) -> Result<()> {
        self.shards.iter().try_for_each(|shard| shard.shrink())
    }

    /// Flush every shard, stopping at the first failure
    pub fn flush(&self) -> Result<()> {
        self.shards.iter().try_for_each(|shard| shard.flush())
    }

    pub fn sync(&self) -> Result<()> {
        self.shards.iter().try_for_each(|shard| shard.sync())
    }

    pub fn close(self) -> Result<()> {
        self.shards.into_iter().try_for_each(|shard| shard.close())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard(&self, index: usize) -> Option<&ShrinkableStorage<K, V>> {
        self.shards.get(index)
    }

    /// Index of the shard that owns `key`
    pub fn shard_index(&self, key: &Key<K>) -> usize {
        (fnv1a_64(key.as_bytes(), SHARD_HASH_BASIS) % self.shards.len() as u64) as usize
    }

    /// Sum of the shards' upper size bounds
    pub fn upper_size_bound(&self) -> u64 {
        self.shards.iter().map(|shard| shard.upper_size_bound()).sum()
    }

    /// Counters summed over all shards
    pub fn stats(&self) -> StorageStats {
        self.shards.iter().map(|shard| shard.stats()).fold(
            StorageStats {
                head_len: 0,
                generation_count: 0,
                sorted_len: 0,
                upper_size_bound: 0,
            },
            |total, stats| StorageStats {
                head_len: total.head_len + stats.head_len,
                generation_count: total.generation_count + stats.generation_count,
                sorted_len: total.sorted_len + stats.sorted_len,
                upper_size_bound: total.upper_size_bound + stats.upper_size_bound,
            },
        )
    }

    fn shard_for(&self, key: &Key<K>) -> &ShrinkableStorage<K, V> {
        &self.shards[self.shard_index(key)]
    }
}

fn shard_dir_name(index: usize) -> String {
    format!("{}{:03}", SHARD_DIR_PREFIX, index)
}

fn existing_shard_dirs(data_dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && entry
                .file_name()
                .to_string_lossy()
                .starts_with(SHARD_DIR_PREFIX)
        {
            count += 1;
        }
    }
    Ok(count)
}
