//! Engine Module
//!
//! The shrinkable key-value storage that coordinates all components.
//!
//! ## Responsibilities
//! - Append puts and removes to the unsorted head
//! - Serve lookups from the head (newest first) and then the generations
//! - Shrink: sort the head, merge it with the generations, publish atomically
//! - Persist the file set through the manifest and recover it on open
//!
//! ## Layout
//! ```text
//!   put / remove
//!        │
//!        ▼
//!   ┌──────────┐   shrink / flush   ┌──────────────────────────────┐
//!   │   head   │ ─────────────────▶ │ gen (newest) … gen (oldest)  │
//!   │ unsorted │                    │ sorted, key-disjoint segments│
//!   └──────────┘                    └──────────────────────────────┘
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::codec::{ByteArray, Key, KeyValue, MaybeRemovedValue, Record};
use crate::config::{Backend, Config};
use crate::error::Result;
use crate::generations::{find_in, Generation, GenerationList};
use crate::manifest::Manifest;
use crate::register::RegisterKind;
use crate::storage::{IndexedStorage, RecordView, SortedStorage};
use crate::store::{ByteStore, ReadHandle, StoreDirectory};

/// Record stored by a [`ShrinkableStorage`] with `K`-byte keys and `V`-byte values
pub type HeadRecord<const K: usize, const V: usize> =
    KeyValue<Key<K>, MaybeRemovedValue<ByteArray<V>>>;

/// Records read per step while scanning the head backward
const HEAD_SCAN_CHUNK: u64 = 1024;

const HEAD_PREFIX: &str = "head";
const GENERATION_PREFIX: &str = "gen";
const RUN_PREFIX: &str = "run";

/// Read handles on every file of the storage, taken at one instant
#[derive(Debug, Clone)]
pub struct StorageFiles {
    pub head: ReadHandle,
    /// Newest first
    pub generations: Vec<ReadHandle>,
}

/// Counters describing the storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub head_len: u64,
    pub generation_count: usize,
    pub sorted_len: u64,
    pub upper_size_bound: u64,
}

/// What happens to a winning tombstone during a merge
#[derive(Debug, Clone, Copy)]
enum Tombstones {
    /// Always written
    Keep,
    /// Written only if an older generation outside the merge holds the key
    KeepIfShadowing,
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (put/remove): serialized by `write_lock`, append to the head
/// - **Maintenance** (shrink/flush/compact_newest): serialized by
///   `maintenance_lock`; the sort and merge run without blocking writers,
///   which only wait for the final publication
/// - **Reads** (get/contains): pin the head file and a generation snapshot
///   under `publish_lock` (read), then search without any lock
///
/// Publication (head swap + generation list replacement) happens under
/// `write_lock` and `publish_lock` (write), so a reader sees either the whole
/// pre-shrink or the whole post-shrink file set.
pub struct ShrinkableStorage<const K: usize, const V: usize> {
    config: Config,
    directory: StoreDirectory,
    register_kind: RegisterKind,

    /// Unsorted records, latest wins
    head: IndexedStorage<HeadRecord<K, V>>,

    /// Sealed sorted storages, newest first
    generations: GenerationList<HeadRecord<K, V>>,

    write_lock: Mutex<()>,
    maintenance_lock: Mutex<()>,
    publish_lock: RwLock<()>,
}

impl<const K: usize, const V: usize> ShrinkableStorage<K, V> {
    /// Open or create a storage with the given config
    ///
    /// On startup (disk backend):
    /// 1. Validate the config
    /// 2. Load the manifest, or write a fresh one for an empty directory
    /// 3. Reopen the head and every generation, rebuilding registers
    /// 4. Remove files the manifest does not name
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let directory = match &config.backend {
            Backend::Disk { data_dir } => StoreDirectory::disk(data_dir)?,
            Backend::Memory => StoreDirectory::memory(),
        };
        Self::with_directory(config, directory)
    }

    /// Open on an existing directory; the config's backend is ignored
    pub fn with_directory(config: Config, directory: StoreDirectory) -> Result<Self> {
        config.validate()?;
        let register_kind = if config.use_filter {
            RegisterKind::Filtered {
                false_positive_rate: config.filter_false_positive_rate,
            }
        } else {
            RegisterKind::Counting
        };

        let manifest = match directory.root() {
            Some(root) => Manifest::load(root)?,
            None => None,
        };

        let (head, generations) = match manifest {
            Some(manifest) => {
                let head = IndexedStorage::<HeadRecord<K, V>>::open(directory.open(&manifest.head)?)?;
                let mut generations = Vec::with_capacity(manifest.generations.len());
                for name in &manifest.generations {
                    let storage =
                        SortedStorage::<HeadRecord<K, V>>::open(directory.open(name)?, register_kind)?;
                    generations.push(Arc::new(storage));
                }
                remove_orphans(&directory, &manifest)?;
                tracing::info!(
                    "Reopened storage: head={} records, {} generations",
                    head.len(),
                    generations.len()
                );
                (head, generations)
            }
            None => {
                let head_store = directory.create(&directory.unique_name(HEAD_PREFIX))?;
                if let Some(root) = directory.root() {
                    Manifest::new(head_store.name(), Vec::new()).save(root)?;
                }
                tracing::info!("Created new storage");
                (IndexedStorage::create(head_store), Vec::new())
            }
        };

        Ok(Self {
            config,
            directory,
            register_kind,
            head,
            generations: GenerationList::from_generations(generations),
            write_lock: Mutex::new(()),
            maintenance_lock: Mutex::new(()),
            publish_lock: RwLock::new(()),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `key`, shadowing any previous value
    pub fn put(&self, key: Key<K>, value: ByteArray<V>) -> Result<()> {
        self.append(KeyValue::new(key, MaybeRemovedValue::present(value)))
    }

    /// Mark `key` as removed
    pub fn remove(&self, key: Key<K>) -> Result<()> {
        self.append(KeyValue::new(key, MaybeRemovedValue::tombstone()))
    }

    fn append(&self, record: HeadRecord<K, V>) -> Result<()> {
        {
            let _write_guard = self.write_lock.lock();
            self.head.append(&record)?;
            if self.config.sync_on_write && self.directory.is_persistent() {
                self.head.store().sync()?;
            }
        }
        // The record is stored; a failed shrink leaves it in the head.
        if let Err(e) = self.maybe_auto_shrink() {
            tracing::warn!("Auto shrink failed: {}", e);
        }
        Ok(())
    }

    fn maybe_auto_shrink(&self) -> Result<()> {
        let ratio = match self.config.max_head_ratio {
            Some(ratio) => ratio,
            None => return Ok(()),
        };
        let head_len = self.head_len();
        let total = head_len + self.sorted_len();
        if head_len == 0 || (head_len as f64) < ratio * total as f64 {
            return Ok(());
        }

        // A maintenance run already in progress will pick the head up.
        if let Some(guard) = self.maintenance_lock.try_lock() {
            tracing::debug!("Auto shrink: head={} of {} records", head_len, total);
            self.compact_locked(
                &guard,
                true,
                usize::MAX,
                self.config.batch_size,
                Tombstones::KeepIfShadowing,
            )?;
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Value stored under `key`, or `None` if absent or removed
    ///
    /// Search order:
    /// 1. Head, from the newest record backward
    /// 2. Generations, newest to oldest
    pub fn get(&self, key: &Key<K>) -> Result<Option<ByteArray<V>>> {
        let (head, generations) = {
            let _pin = self.publish_lock.read();
            (self.head.view(), self.generations.snapshot())
        };

        if let Some(record) = scan_head_backward(&head, key)? {
            return Ok(record.value.into_option());
        }
        Ok(find_in(&generations, key)?.and_then(|record| record.value.into_option()))
    }

    pub fn contains(&self, key: &Key<K>) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Sort the head and merge it with every generation.
    ///
    /// Tombstones are purged since nothing older remains. Running it again
    /// with an empty head only rewrites the same key set.
    pub fn shrink(&self) -> Result<()> {
        let guard = self.maintenance_lock.lock();
        self.compact_locked(
            &guard,
            true,
            usize::MAX,
            self.config.batch_size,
            Tombstones::KeepIfShadowing,
        )
    }

    /// Seal the head as a single newest generation, then collapse it with
    /// older generations of the same rank
    pub fn flush(&self) -> Result<()> {
        let guard = self.maintenance_lock.lock();
        self.compact_locked(&guard, true, 0, u64::MAX, Tombstones::Keep)?;
        self.collapse_locked(&guard)
    }

    /// Merge the two newest generations while their ranks are equal.
    ///
    /// Rank is `floor(log2(ceil(len / batch_size)))`, so flushed generations
    /// combine like a binary counter and their number stays logarithmic.
    fn collapse_locked(&self, maintenance: &MutexGuard<'_, ()>) -> Result<()> {
        loop {
            let current = self.generations.snapshot();
            if current.len() < 2 || self.rank(&current[0]) != self.rank(&current[1]) {
                return Ok(());
            }
            tracing::debug!(
                "Collapsing generations {} and {} (rank {})",
                current[0].name(),
                current[1].name(),
                self.rank(&current[0])
            );
            drop(current);
            self.compact_locked(maintenance, false, 2, u64::MAX, Tombstones::KeepIfShadowing)?;
        }
    }

    fn rank(&self, generation: &SortedStorage<HeadRecord<K, V>>) -> u32 {
        let batch = self.config.batch_size;
        ((generation.len().max(1) + batch - 1) / batch).ilog2()
    }

    /// Merge the `count` newest generations into one.
    ///
    /// A tombstone survives only if a generation outside the merge may
    /// still hold its key.
    pub fn compact_newest(&self, count: usize) -> Result<()> {
        let guard = self.maintenance_lock.lock();
        self.compact_locked(&guard, false, count, u64::MAX, Tombstones::KeepIfShadowing)
    }

    /// Shared body of shrink, flush, and partial compaction.
    ///
    /// Sources are, newest first: the head (when `include_head`), then the
    /// `merge_count` newest generations. Output is split into generations of
    /// at most `segment_len` records that replace the sources at the front of
    /// the generation list.
    fn compact_locked(
        &self,
        _maintenance: &MutexGuard<'_, ()>,
        include_head: bool,
        merge_count: usize,
        segment_len: u64,
        tombstones: Tombstones,
    ) -> Result<()> {
        let head = self.head.view();
        let head_len = if include_head { head.len() } else { 0 };
        let current = self.generations.snapshot();
        let merge_count = merge_count.min(current.len());

        if head_len == 0 && merge_count == 0 {
            return Ok(());
        }
        if !include_head && merge_count < 2 {
            return Ok(());
        }

        let mut pending = PendingFiles::default();
        let runs = self.sort_head_runs(&head, head_len, &mut pending)?;

        let (merged, older) = current.split_at(merge_count);
        // Newest first: the latest head run, back to the oldest merged generation.
        let mut sources: Vec<&SortedStorage<HeadRecord<K, V>>> =
            runs.iter().rev().collect();
        sources.extend(merged.iter().map(|g| g.as_ref()));

        let segments = SortedStorage::merge_segmented(
            &sources,
            segment_len,
            || {
                let store = self
                    .directory
                    .create(&self.directory.unique_name(GENERATION_PREFIX))?;
                pending.track(store.share());
                Ok(store)
            },
            self.register_kind,
            |key| match tombstones {
                Tombstones::Keep => Ok(true),
                Tombstones::KeepIfShadowing => Ok(find_in(older, key)?.is_some()),
            },
        )?;

        // Runs were only an intermediate step.
        for run in &runs {
            run.discard();
        }

        let mut next: Vec<Generation<HeadRecord<K, V>>> =
            segments.into_iter().map(Arc::new).collect();
        let produced = next.len();
        next.extend(older.iter().cloned());

        self.publish(&mut pending, include_head.then_some(head_len), next)?;
        pending.commit();

        for generation in merged {
            generation.discard();
        }
        tracing::info!(
            "Compacted {} head records and {} generations into {} segments ({} generations total)",
            head_len,
            merge_count,
            produced,
            self.generations.len()
        );
        Ok(())
    }

    /// Split the first `head_len` head records into sorted runs of at most
    /// `batch_size` records, oldest run first
    fn sort_head_runs(
        &self,
        head: &RecordView<HeadRecord<K, V>>,
        head_len: u64,
        pending: &mut PendingFiles,
    ) -> Result<Vec<SortedStorage<HeadRecord<K, V>>>> {
        let mut runs = Vec::new();
        let mut start = 0u64;
        while start < head_len {
            let count = self.config.batch_size.min(head_len - start);
            let batch = head.get_range(start, count)?;
            let store = self.directory.create(&self.directory.unique_name(RUN_PREFIX))?;
            pending.track(store.share());
            runs.push(SortedStorage::from_records(
                batch,
                false,
                store,
                RegisterKind::Counting,
            )?);
            start += count;
        }
        Ok(runs)
    }

    /// Commit and publish a new file set.
    ///
    /// With `drained_head = Some(n)` the first `n` head records are now part
    /// of `generations`: records appended after them move to a fresh head file
    /// that replaces the current one.
    fn publish(
        &self,
        pending: &mut PendingFiles,
        drained_head: Option<u64>,
        generations: Vec<Generation<HeadRecord<K, V>>>,
    ) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        let fresh_head = match drained_head {
            Some(drained) => {
                let store = self.directory.create(&self.directory.unique_name(HEAD_PREFIX))?;
                pending.track(store.share());
                let fresh = IndexedStorage::<HeadRecord<K, V>>::create(store.share());
                let total = self.head.len();
                if total > drained {
                    fresh.append_all(self.head.get_range(drained, total - drained)?)?;
                }
                store.sync()?;
                Some(store)
            }
            None => None,
        };

        if let Some(root) = self.directory.root() {
            let head_name = match &fresh_head {
                Some(store) => store.name(),
                None => self.head.store().name(),
            };
            let names = generations.iter().map(|g| g.name()).collect();
            Manifest::new(head_name, names).save(root)?;
        }

        let _publish_guard = self.publish_lock.write();
        if let Some(store) = fresh_head {
            self.head.store().swap(&store);
            // `store` now holds the drained head.
            store.discard();
        }
        self.generations.replace(generations);
        Ok(())
    }

    /// fsync the head
    pub fn sync(&self) -> Result<()> {
        self.head.store().sync()
    }

    /// Sync and close
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    // =========================================================================
    // Sharing
    // =========================================================================

    /// Read-only handle on the head file as it is now
    pub fn share_not_sorted_storage_file(&self) -> ReadHandle {
        self.head.snapshot()
    }

    /// Read-only handles on the generation files, newest first
    pub fn share_sorted_storage_files(&self) -> Vec<ReadHandle> {
        self.generations
            .snapshot()
            .iter()
            .map(|g| g.snapshot())
            .collect()
    }

    /// Handles on the head and every generation from the same instant
    pub fn share_storage_files(&self) -> StorageFiles {
        let _pin = self.publish_lock.read();
        StorageFiles {
            head: self.share_not_sorted_storage_file(),
            generations: self.share_sorted_storage_files(),
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Records in the head, removes included
    pub fn head_len(&self) -> u64 {
        self.head.len()
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    /// Records across all generations
    pub fn sorted_len(&self) -> u64 {
        self.generations.total_records()
    }

    /// Upper bound on the number of distinct live keys
    pub fn upper_size_bound(&self) -> u64 {
        self.head_len() + self.sorted_len()
    }

    pub fn stats(&self) -> StorageStats {
        let _pin = self.publish_lock.read();
        let head_len = self.head_len();
        let sorted_len = self.sorted_len();
        StorageStats {
            head_len,
            generation_count: self.generation_count(),
            sorted_len,
            upper_size_bound: head_len + sorted_len,
        }
    }

    /// Record reads served by the generations still published
    pub fn sorted_read_count(&self) -> u64 {
        self.generations
            .snapshot()
            .iter()
            .map(|g| g.records().read_count())
            .sum()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn directory(&self) -> &StoreDirectory {
        &self.directory
    }
}

/// Newest head record for `key`, scanning backward in chunks
fn scan_head_backward<const K: usize, const V: usize>(
    head: &RecordView<HeadRecord<K, V>>,
    key: &Key<K>,
) -> Result<Option<HeadRecord<K, V>>> {
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(HEAD_SCAN_CHUNK);
        let chunk = head.get_range(start, end - start)?;
        if let Some(record) = chunk.into_iter().rev().find(|r| r.key() == key) {
            return Ok(Some(record));
        }
        end = start;
    }
    Ok(None)
}

/// Delete data files the manifest does not reference
fn remove_orphans(directory: &StoreDirectory, manifest: &Manifest) -> Result<()> {
    for name in directory.list()? {
        if !manifest.files().any(|file| file == name) {
            tracing::info!("Removing orphaned file {}", name);
            directory.remove(&name)?;
        }
    }
    Ok(())
}

/// Stores created by an unfinished compaction; discarded on drop unless
/// committed
#[derive(Default)]
struct PendingFiles {
    stores: Vec<ByteStore>,
}

impl PendingFiles {
    fn track(&mut self, store: ByteStore) {
        self.stores.push(store);
    }

    fn commit(&mut self) {
        self.stores.clear();
    }
}

impl Drop for PendingFiles {
    fn drop(&mut self) {
        for store in &self.stores {
            tracing::debug!("Discarding unpublished file {}", store.name());
            store.discard();
        }
    }
}
