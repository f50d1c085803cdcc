//! Tests for ShrinkableStorage
//!
//! These tests verify:
//! - Basic get/put/remove operations
//! - Shrink, flush and partial compaction
//! - Tombstone shadowing and purging
//! - Filter-driven read skipping
//! - Reopen from the manifest and orphan cleanup
//! - Concurrent access during shrink

use std::collections::HashMap;

use tempfile::TempDir;
use tierkv::codec::{deserialize, ByteArray, FixedCodec, Key, Record};
use tierkv::engine::HeadRecord;
use tierkv::manifest::{MANIFEST_FILENAME, MANIFEST_TMP_FILENAME};
use tierkv::store::{ReadHandle, StoreDirectory};
use tierkv::{Config, ShrinkableStorage, TierError};

type Storage = ShrinkableStorage<16, 16>;

// =============================================================================
// Helper Functions
// =============================================================================

fn key(s: &str) -> Key<16> {
    Key::from_padded(s.as_bytes()).unwrap()
}

fn val(s: &str) -> ByteArray<16> {
    ByteArray::from_padded(s.as_bytes()).unwrap()
}

fn get(storage: &Storage, k: &str) -> Option<String> {
    storage.get(&key(k)).unwrap().map(|v| v.to_string())
}

fn config_for(dir: &TempDir) -> Config {
    Config::builder().data_dir(dir.path()).build()
}

/// Rank of a generation is log2 of its size in batches; batch size 1 makes
/// ranks follow record counts directly
fn unit_batch_config(dir: &TempDir) -> Config {
    Config::builder().data_dir(dir.path()).batch_size(1).build()
}

fn setup_temp_storage() -> (TempDir, Storage) {
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::open(config_for(&temp_dir)).unwrap();
    (temp_dir, storage)
}

fn decode_all(handle: &ReadHandle) -> Vec<HeadRecord<16, 16>> {
    let bytes = handle.read_all().unwrap();
    bytes
        .chunks_exact(HeadRecord::<16, 16>::SIZE)
        .map(|chunk| deserialize(chunk).unwrap())
        .collect()
}

fn sorted_records(storage: &Storage) -> Vec<HeadRecord<16, 16>> {
    storage
        .share_sorted_storage_files()
        .iter()
        .flat_map(decode_all)
        .collect()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_open_creates_directory_and_manifest() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let _storage = Storage::open(Config::builder().data_dir(&data_dir).build()).unwrap();

    assert!(data_dir.exists());
    assert!(data_dir.join(MANIFEST_FILENAME).exists());
}

#[test]
fn test_put_get_remove() {
    let (_temp, storage) = setup_temp_storage();

    storage.put(key("hello"), val("world")).unwrap();
    assert_eq!(get(&storage, "hello"), Some("world".to_string()));
    assert!(storage.contains(&key("hello")).unwrap());

    storage.put(key("hello"), val("again")).unwrap();
    assert_eq!(get(&storage, "hello"), Some("again".to_string()));

    storage.remove(key("hello")).unwrap();
    assert_eq!(get(&storage, "hello"), None);
    assert!(!storage.contains(&key("hello")).unwrap());

    assert_eq!(get(&storage, "missing"), None);
    assert_eq!(storage.head_len(), 3);
}

#[test]
fn test_head_scan_crosses_chunks() {
    let storage = Storage::open(Config::builder().in_memory().build()).unwrap();
    storage.put(key("first"), val("1")).unwrap();
    for i in 0..3000u32 {
        storage.put(key(&format!("k{}", i)), val(&i.to_string())).unwrap();
    }

    assert_eq!(get(&storage, "first"), Some("1".to_string()));
    assert_eq!(get(&storage, "k2999"), Some("2999".to_string()));
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .batch_size(0)
        .build();

    assert!(matches!(Storage::open(config), Err(TierError::Config(_))));
}

// =============================================================================
// Shrink Tests
// =============================================================================

#[test]
fn test_alice_bob_scenario() {
    let (_temp, storage) = setup_temp_storage();

    storage.put(key("alice"), val("100")).unwrap();
    storage.put(key("bob"), val("200")).unwrap();
    storage.shrink().unwrap();
    storage.put(key("alice"), val("150")).unwrap();

    assert_eq!(get(&storage, "alice"), Some("150".to_string()));
    assert_eq!(get(&storage, "bob"), Some("200".to_string()));

    storage.shrink().unwrap();

    assert_eq!(get(&storage, "alice"), Some("150".to_string()));
    assert_eq!(get(&storage, "bob"), Some("200".to_string()));
    assert_eq!(storage.head_len(), 0);

    let alice_entries = sorted_records(&storage)
        .into_iter()
        .filter(|r| r.key == key("alice"))
        .count();
    assert_eq!(alice_entries, 1);
}

#[test]
fn test_tombstone_shadows_before_and_after_shrink() {
    let (_temp, storage) = setup_temp_storage();

    storage.put(key("a"), val("1")).unwrap();
    storage.put(key("b"), val("2")).unwrap();
    storage.shrink().unwrap();

    storage.remove(key("a")).unwrap();
    assert_eq!(get(&storage, "a"), None);

    storage.shrink().unwrap();
    assert_eq!(get(&storage, "a"), None);
    assert_eq!(get(&storage, "b"), Some("2".to_string()));

    // Full shrink purges tombstones.
    let records = sorted_records(&storage);
    assert_eq!(records.len(), 1);
    assert!(records.iter().all(|r| !r.is_tombstone()));
    assert_eq!(storage.sorted_len(), 1);
}

#[test]
fn test_shrink_is_idempotent_on_empty_head() {
    let (_temp, storage) = setup_temp_storage();
    for i in 0..50u32 {
        storage.put(key(&format!("k{:03}", i)), val(&i.to_string())).unwrap();
    }
    storage.shrink().unwrap();
    let before = sorted_records(&storage);

    storage.shrink().unwrap();
    storage.shrink().unwrap();

    assert_eq!(sorted_records(&storage), before);
    for i in 0..50u32 {
        assert_eq!(get(&storage, &format!("k{:03}", i)), Some(i.to_string()));
    }
}

#[test]
fn test_shrink_on_empty_storage_is_noop() {
    let (_temp, storage) = setup_temp_storage();
    storage.shrink().unwrap();
    assert_eq!(storage.generation_count(), 0);
    assert_eq!(storage.upper_size_bound(), 0);
}

#[test]
fn test_shrink_splits_into_segments() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .batch_size(100)
        .build();
    let storage = Storage::open(config).unwrap();

    for i in 0..350u32 {
        storage.put(key(&format!("k{:04}", i)), val("v")).unwrap();
    }
    storage.shrink().unwrap();

    assert_eq!(storage.generation_count(), 4);
    assert_eq!(storage.sorted_len(), 350);
    assert_eq!(storage.upper_size_bound(), 350);
    assert_eq!(get(&storage, "k0000"), Some("v".to_string()));
    assert_eq!(get(&storage, "k0349"), Some("v".to_string()));
}

#[test]
fn test_shrink_latest_write_wins_across_batches() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .batch_size(8)
        .build();
    let storage = Storage::open(config).unwrap();

    for round in 0..5u32 {
        for i in 0..10u32 {
            storage.put(key(&format!("k{}", i)), val(&round.to_string())).unwrap();
        }
    }
    storage.remove(key("k3")).unwrap();
    storage.shrink().unwrap();

    for i in 0..10u32 {
        let expected = if i == 3 { None } else { Some("4".to_string()) };
        assert_eq!(get(&storage, &format!("k{}", i)), expected);
    }
    assert_eq!(storage.sorted_len(), 9);
}

#[test]
fn test_memory_backend() {
    let storage = Storage::open(Config::builder().in_memory().build()).unwrap();
    storage.put(key("x"), val("1")).unwrap();
    storage.shrink().unwrap();
    storage.put(key("y"), val("2")).unwrap();

    assert_eq!(get(&storage, "x"), Some("1".to_string()));
    assert_eq!(get(&storage, "y"), Some("2".to_string()));
    assert!(storage.directory().root().is_none());
}

#[test]
fn test_temporary_directory() {
    let storage =
        Storage::with_directory(Config::default(), StoreDirectory::temporary().unwrap()).unwrap();
    storage.put(key("x"), val("1")).unwrap();
    storage.shrink().unwrap();
    assert_eq!(get(&storage, "x"), Some("1".to_string()));
}

// =============================================================================
// Flush / Partial Compaction Tests
// =============================================================================

#[test]
fn test_flush_seals_head_keeping_tombstones() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::open(unit_batch_config(&temp_dir)).unwrap();

    // Two records then one: different ranks, so nothing collapses.
    storage.put(key("a"), val("1")).unwrap();
    storage.put(key("b"), val("2")).unwrap();
    storage.flush().unwrap();
    storage.remove(key("a")).unwrap();
    storage.flush().unwrap();

    assert_eq!(storage.generation_count(), 2);
    assert_eq!(storage.head_len(), 0);
    assert_eq!(get(&storage, "a"), None);

    let newest = decode_all(&storage.share_sorted_storage_files()[0]);
    assert_eq!(newest.len(), 1);
    assert!(newest[0].is_tombstone());
}

#[test]
fn test_flush_with_empty_head_is_noop() {
    let (_temp, storage) = setup_temp_storage();
    storage.flush().unwrap();
    assert_eq!(storage.generation_count(), 0);
}

#[test]
fn test_compact_newest_retains_needed_tombstones() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::open(unit_batch_config(&temp_dir)).unwrap();

    // Oldest generation holds "a"; sizes 4, 2, 1 keep every rank distinct.
    for k in ["a", "c", "d", "e"] {
        storage.put(key(k), val("1")).unwrap();
    }
    storage.flush().unwrap();

    // Tombstones for "a" (shadows the oldest) and "zz" (shadows nothing).
    storage.put(key("zz"), val("9")).unwrap();
    storage.remove(key("zz")).unwrap();
    storage.remove(key("a")).unwrap();
    storage.flush().unwrap();

    storage.put(key("b"), val("2")).unwrap();
    storage.flush().unwrap();
    assert_eq!(storage.generation_count(), 3);

    storage.compact_newest(2).unwrap();

    assert_eq!(storage.generation_count(), 2);
    assert_eq!(get(&storage, "a"), None);
    assert_eq!(get(&storage, "zz"), None);
    assert_eq!(get(&storage, "b"), Some("2".to_string()));
    assert_eq!(get(&storage, "c"), Some("1".to_string()));

    let newest = decode_all(&storage.share_sorted_storage_files()[0]);
    let keys: Vec<String> = newest.iter().map(|r| r.key.to_string()).collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert!(newest[0].is_tombstone());
}

#[test]
fn test_compact_newest_single_generation_is_noop() {
    let (_temp, storage) = setup_temp_storage();
    storage.put(key("a"), val("1")).unwrap();
    storage.flush().unwrap();

    let before = storage.share_sorted_storage_files()[0].name().to_string();
    storage.compact_newest(1).unwrap();
    storage.compact_newest(0).unwrap();

    assert_eq!(storage.share_sorted_storage_files()[0].name(), before);
}

#[test]
fn test_auto_shrink_on_head_ratio() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_head_ratio(0.5)
        .build();
    let storage = Storage::open(config).unwrap();

    for i in 0..20u32 {
        storage.put(key(&format!("k{:02}", i)), val("v")).unwrap();
    }

    assert!(storage.generation_count() > 0);
    assert!(storage.head_len() < 20);
    for i in 0..20u32 {
        assert!(storage.contains(&key(&format!("k{:02}", i))).unwrap());
    }
}

#[test]
fn test_repeated_flushes_collapse_like_a_binary_counter() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Storage::open(unit_batch_config(&temp_dir)).unwrap();

    for i in 1..=13u64 {
        storage.put(key(&format!("k{:02}", i)), val("v")).unwrap();
        storage.flush().unwrap();
        assert_eq!(storage.generation_count(), i.count_ones() as usize, "after {} flushes", i);
    }

    assert_eq!(storage.sorted_len(), 13);
    for i in 1..=13u64 {
        assert!(storage.contains(&key(&format!("k{:02}", i))).unwrap());
    }
}

#[test]
fn test_small_flushes_stay_in_one_generation() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .batch_size(1024)
        .build();
    let storage = Storage::open(config).unwrap();

    for i in 0..64u32 {
        storage.put(key(&format!("k{:02}", i)), val(&i.to_string())).unwrap();
        if i % 8 == 7 {
            storage.remove(key(&format!("k{:02}", i - 4))).unwrap();
        }
        storage.flush().unwrap();
    }

    assert_eq!(storage.generation_count(), 1);
    // Nothing older remains, so every tombstone was purged.
    assert_eq!(storage.sorted_len(), 56);
    for i in 0..64u32 {
        let expected = if i % 8 == 3 { None } else { Some(i.to_string()) };
        assert_eq!(get(&storage, &format!("k{:02}", i)), expected);
    }
}

#[test]
fn test_failed_shrink_leaves_state_intact() {
    let (temp_dir, storage) = setup_temp_storage();
    storage.put(key("a"), val("1")).unwrap();
    storage.shrink().unwrap();
    storage.put(key("b"), val("2")).unwrap();
    storage.remove(key("a")).unwrap();

    let listing = StoreDirectory::disk(temp_dir.path()).unwrap();
    let files_before = listing.list().unwrap();
    let stats_before = storage.stats();

    // The manifest cannot be written while a directory holds its temp name.
    let blocker = temp_dir.path().join(MANIFEST_TMP_FILENAME);
    std::fs::create_dir(&blocker).unwrap();

    assert!(storage.shrink().is_err());
    assert!(storage.flush().is_err());

    assert_eq!(storage.stats(), stats_before);
    assert_eq!(listing.list().unwrap(), files_before);
    assert_eq!(get(&storage, "a"), None);
    assert_eq!(get(&storage, "b"), Some("2".to_string()));

    std::fs::remove_dir(&blocker).unwrap();
    storage.shrink().unwrap();

    assert_eq!(storage.head_len(), 0);
    assert_eq!(storage.sorted_len(), 1);
    assert_eq!(get(&storage, "a"), None);
    assert_eq!(get(&storage, "b"), Some("2".to_string()));

    drop(storage);
    let reopened = Storage::open(config_for(&temp_dir)).unwrap();
    assert_eq!(get(&reopened, "b"), Some("2".to_string()));
}

#[test]
fn test_failed_auto_shrink_keeps_write() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .max_head_ratio(0.5)
        .build();
    let storage = Storage::open(config).unwrap();

    let blocker = temp_dir.path().join(MANIFEST_TMP_FILENAME);
    std::fs::create_dir(&blocker).unwrap();

    storage.put(key("a"), val("1")).unwrap();
    storage.remove(key("a")).unwrap();
    storage.put(key("a"), val("2")).unwrap();
    assert_eq!(storage.head_len(), 3);
    assert_eq!(storage.generation_count(), 0);
    assert_eq!(get(&storage, "a"), Some("2".to_string()));

    std::fs::remove_dir(&blocker).unwrap();
    storage.put(key("b"), val("3")).unwrap();

    assert_eq!(storage.head_len(), 0);
    assert_eq!(get(&storage, "a"), Some("2".to_string()));
    assert_eq!(get(&storage, "b"), Some("3".to_string()));
}

#[test]
fn test_sync_on_write_without_persistent_files() {
    let config = Config::builder().sync_on_write(true).build();
    let temporary =
        Storage::with_directory(config.clone(), StoreDirectory::temporary().unwrap()).unwrap();
    let memory = Storage::with_directory(config, StoreDirectory::memory()).unwrap();

    for storage in [&temporary, &memory] {
        storage.put(key("x"), val("1")).unwrap();
        assert_eq!(get(storage, "x"), Some("1".to_string()));
    }
}

// =============================================================================
// Filter Tests
// =============================================================================

#[test]
fn test_negative_filter_answer_skips_reads() {
    let (_temp, storage) = setup_temp_storage();
    for i in 0..500u32 {
        storage.put(key(&format!("k{:05}", i * 2)), val("v")).unwrap();
    }
    storage.shrink().unwrap();

    let mut skipped = 0;
    for i in 0..500u32 {
        let before = storage.sorted_read_count();
        assert_eq!(get(&storage, &format!("k{:05}", i * 2 + 1)), None);
        if storage.sorted_read_count() == before {
            skipped += 1;
        }
    }
    assert!(skipped > 450, "only {} lookups skipped", skipped);
}

#[test]
fn test_without_filter_lookups_read() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .use_filter(false)
        .build();
    let storage = Storage::open(config).unwrap();
    storage.put(key("a"), val("1")).unwrap();
    storage.put(key("c"), val("1")).unwrap();
    storage.shrink().unwrap();

    let before = storage.sorted_read_count();
    assert_eq!(get(&storage, "b"), None);
    assert!(storage.sorted_read_count() > before);
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_restores_all_data() {
    let temp_dir = TempDir::new().unwrap();
    let generations;

    {
        let storage = Storage::open(config_for(&temp_dir)).unwrap();
        storage.put(key("shrunk"), val("1")).unwrap();
        storage.put(key("gone"), val("1")).unwrap();
        storage.shrink().unwrap();
        storage.put(key("flushed"), val("2")).unwrap();
        storage.remove(key("gone")).unwrap();
        storage.flush().unwrap();
        storage.put(key("head"), val("3")).unwrap();
        generations = storage.generation_count();
        storage.close().unwrap();
    }

    let storage = Storage::open(config_for(&temp_dir)).unwrap();
    assert_eq!(get(&storage, "shrunk"), Some("1".to_string()));
    assert_eq!(get(&storage, "flushed"), Some("2".to_string()));
    assert_eq!(get(&storage, "head"), Some("3".to_string()));
    assert_eq!(get(&storage, "gone"), None);
    assert_eq!(storage.generation_count(), generations);
    assert_eq!(storage.head_len(), 1);
}

#[test]
fn test_reopen_removes_orphaned_files() {
    let temp_dir = TempDir::new().unwrap();
    {
        let storage = Storage::open(config_for(&temp_dir)).unwrap();
        storage.put(key("a"), val("1")).unwrap();
        storage.shrink().unwrap();
    }
    let orphan = temp_dir.path().join("gen-999999.dat");
    std::fs::write(&orphan, b"left over by a crash").unwrap();

    let storage = Storage::open(config_for(&temp_dir)).unwrap();

    assert!(!orphan.exists());
    assert_eq!(get(&storage, "a"), Some("1".to_string()));
}

#[test]
fn test_replaced_files_are_deleted() {
    let (temp_dir, storage) = setup_temp_storage();
    storage.put(key("a"), val("1")).unwrap();
    storage.shrink().unwrap();
    storage.put(key("b"), val("1")).unwrap();
    storage.shrink().unwrap();

    let files = StoreDirectory::disk(temp_dir.path()).unwrap().list().unwrap();
    // One head and one generation.
    assert_eq!(files.len(), 2, "{:?}", files);
}

#[test]
fn test_corrupted_manifest_reported() {
    let temp_dir = TempDir::new().unwrap();
    {
        let storage = Storage::open(config_for(&temp_dir)).unwrap();
        storage.put(key("a"), val("1")).unwrap();
        storage.shrink().unwrap();
    }

    let path = temp_dir.path().join(MANIFEST_FILENAME);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    match Storage::open(config_for(&temp_dir)) {
        Err(e) => assert!(e.is_corruption(), "unexpected error: {}", e),
        Ok(_) => panic!("corrupted manifest accepted"),
    }
}

// =============================================================================
// Sharing Tests
// =============================================================================

#[test]
fn test_shared_handles_outlive_shrink() {
    let (_temp, storage) = setup_temp_storage();
    storage.put(key("a"), val("1")).unwrap();
    storage.put(key("b"), val("2")).unwrap();

    let files = storage.share_storage_files();
    assert_eq!(files.head.size(), 2 * HeadRecord::<16, 16>::SIZE as u64);
    assert!(files.generations.is_empty());

    storage.shrink().unwrap();

    // The old head is still readable through the handle.
    let old_head = decode_all(&files.head);
    assert_eq!(old_head.len(), 2);
    assert_eq!(storage.share_not_sorted_storage_file().size(), 0);
    assert_eq!(storage.share_sorted_storage_files().len(), 1);
}

#[test]
fn test_stats() {
    let (_temp, storage) = setup_temp_storage();
    storage.put(key("a"), val("1")).unwrap();
    storage.shrink().unwrap();
    storage.put(key("a"), val("2")).unwrap();

    let stats = storage.stats();
    assert_eq!(stats.head_len, 1);
    assert_eq!(stats.generation_count, 1);
    assert_eq!(stats.sorted_len, 1);
    assert_eq!(stats.upper_size_bound, 2);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_during_shrink() {
    let (_temp, storage) = setup_temp_storage();
    for i in 0..1000u32 {
        storage.put(key(&format!("k{:04}", i)), val(&i.to_string())).unwrap();
    }

    crossbeam::scope(|s| {
        for t in 0..4u32 {
            let storage = &storage;
            s.spawn(move |_| {
                for round in 0..5u32 {
                    for i in (t..1000).step_by(37) {
                        let found = storage.get(&key(&format!("k{:04}", i))).unwrap();
                        assert_eq!(
                            found.map(|v| v.to_string()),
                            Some(i.to_string()),
                            "round {}",
                            round
                        );
                    }
                }
            });
        }

        for _ in 0..5 {
            storage.shrink().unwrap();
        }
    })
    .unwrap();
}

#[test]
fn test_writes_during_shrink_are_kept() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .batch_size(64)
        .build();
    let storage = Storage::open(config).unwrap();

    crossbeam::scope(|s| {
        let writer = &storage;
        s.spawn(move |_| {
            for i in 0..2000u32 {
                writer.put(key(&format!("k{:05}", i)), val(&i.to_string())).unwrap();
            }
        });

        for _ in 0..10 {
            storage.shrink().unwrap();
        }
    })
    .unwrap();

    storage.shrink().unwrap();
    let mut expected = HashMap::new();
    for i in 0..2000u32 {
        expected.insert(format!("k{:05}", i), i.to_string());
    }
    for (k, v) in expected {
        assert_eq!(get(&storage, &k), Some(v));
    }
    assert_eq!(storage.head_len(), 0);
    assert_eq!(storage.sorted_len(), 2000);
}
