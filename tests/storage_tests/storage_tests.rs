//! Tests for indexed and sorted record storage
//!
//! These tests verify:
//! - Positional append/get on indexed storage
//! - Sorting with "latest wins" for repeated keys
//! - Binary search over sorted storage
//! - Merging with the newest storage winning
//! - Tombstone retention during merge
//! - Reopen checks on sorted files

use tierkv::codec::{ByteArray, FixedCodec, Key, KeyValue, MaybeRemovedValue, Record};
use tierkv::register::RegisterKind;
use tierkv::storage::{sorted_end, IndexedStorage, MergeIterator, SortedStorage};
use tierkv::store::StoreDirectory;
use tierkv::TierError;

type Entry = KeyValue<Key<8>, MaybeRemovedValue<ByteArray<8>>>;

const FILTERED: RegisterKind = RegisterKind::Filtered {
    false_positive_rate: 0.01,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn key(s: &str) -> Key<8> {
    Key::from_padded(s.as_bytes()).unwrap()
}

fn put(k: &str, v: &str) -> Entry {
    KeyValue::new(
        key(k),
        MaybeRemovedValue::present(ByteArray::from_padded(v.as_bytes()).unwrap()),
    )
}

fn tombstone(k: &str) -> Entry {
    KeyValue::new(key(k), MaybeRemovedValue::tombstone())
}

fn value_of(entry: &Entry) -> Option<String> {
    entry.value.into_option().map(|v| v.to_string())
}

fn sorted(dir: &StoreDirectory, records: Vec<Entry>) -> SortedStorage<Entry> {
    let store = dir.create(&dir.unique_name("gen")).unwrap();
    SortedStorage::from_records(records, false, store, FILTERED).unwrap()
}

// =============================================================================
// Indexed Storage Tests
// =============================================================================

#[test]
fn test_indexed_append_and_get() {
    let dir = StoreDirectory::memory();
    let storage = IndexedStorage::<u64>::create(dir.create("n.dat").unwrap());

    assert_eq!(storage.append(&10).unwrap(), 0);
    assert_eq!(storage.append(&20).unwrap(), 1);
    assert_eq!(storage.append_all(vec![30, 40, 50]).unwrap(), 3);

    assert_eq!(storage.len(), 5);
    assert_eq!(storage.get(3).unwrap(), 40);
    assert_eq!(storage.get_range(1, 3).unwrap(), vec![20, 30, 40]);
    assert!(matches!(
        storage.get(5).unwrap_err(),
        TierError::OutOfRange { .. }
    ));

    let all: Vec<u64> = storage.iter().collect::<tierkv::Result<_>>().unwrap();
    assert_eq!(all, vec![10, 20, 30, 40, 50]);
}

#[test]
fn test_indexed_share_sees_appends() {
    let dir = StoreDirectory::memory();
    let storage = IndexedStorage::<u32>::create(dir.create("n.dat").unwrap());
    let shared = storage.share();

    storage.append(&7).unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared.get(0).unwrap(), 7);

    // A snapshot does not see later appends.
    let snapshot = storage.snapshot();
    storage.append(&8).unwrap();
    assert_eq!(snapshot.size(), u32::SIZE as u64);
}

#[test]
fn test_indexed_open_rejects_partial_record() {
    let dir = StoreDirectory::temporary().unwrap();
    let store = dir.create("torn.dat").unwrap();
    store.append(&[1, 2, 3, 4, 5, 6]).unwrap();

    let err = IndexedStorage::<u32>::open(store).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_iter_spans_many_chunks() {
    let dir = StoreDirectory::memory();
    let storage = IndexedStorage::<u64>::create(dir.create("n.dat").unwrap());
    storage.append_all(0..5000u64).unwrap();

    let mut expected = 0u64;
    for value in storage.iter() {
        assert_eq!(value.unwrap(), expected);
        expected += 1;
    }
    assert_eq!(expected, 5000);
}

// =============================================================================
// Sorting Tests
// =============================================================================

#[test]
fn test_sorted_end_keeps_last_occurrence() {
    let mut items = vec![(3, 'a'), (1, 'b'), (3, 'c'), (2, 'd'), (1, 'e')];
    let end = sorted_end(&mut items, |a, b| a.0 < b.0, |a, b| a.0 == b.0);

    assert_eq!(end, 3);
    assert_eq!(&items[..end], &[(1, 'e'), (2, 'd'), (3, 'c')]);
}

#[test]
fn test_sorted_end_on_empty_input() {
    let mut items: Vec<u32> = Vec::new();
    assert_eq!(sorted_end(&mut items, |a, b| a < b, |a, b| a == b), 0);
}

#[test]
fn test_from_records_latest_wins() {
    let dir = StoreDirectory::memory();
    let storage = sorted(
        &dir,
        vec![put("b", "1"), put("a", "2"), put("b", "3"), tombstone("a")],
    );

    assert_eq!(storage.len(), 2);
    assert_eq!(storage.register().count(), 2);
    assert_eq!(storage.min_key(), Some(&key("a")));
    assert_eq!(storage.max_key(), Some(&key("b")));

    assert!(storage.find(&key("a")).unwrap().unwrap().is_tombstone());
    assert_eq!(value_of(&storage.find(&key("b")).unwrap().unwrap()), Some("3".into()));
}

#[test]
fn test_from_records_by_custom_order() {
    let dir = StoreDirectory::memory();
    let store = dir.create("desc.dat").unwrap();
    // Pre-sorted input is written as is.
    let storage = SortedStorage::from_records_by(
        vec![put("a", "1"), put("c", "2")],
        true,
        |a: &Entry, b: &Entry| a.key() < b.key(),
        |a: &Entry, b: &Entry| a.key() == b.key(),
        store,
        RegisterKind::Counting,
    )
    .unwrap();
    assert_eq!(storage.len(), 2);
    assert!(storage.register().filter().is_none());
}

#[test]
fn test_presorted_input_must_be_ascending() {
    let dir = StoreDirectory::memory();
    let store = dir.create("bad.dat").unwrap();
    let err = SortedStorage::from_records(
        vec![put("b", "1"), put("a", "2")],
        true,
        store,
        RegisterKind::Counting,
    )
    .unwrap_err();
    assert!(matches!(err, TierError::InvalidArgument(_)));
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_find_every_key_and_absent_keys() {
    let dir = StoreDirectory::memory();
    let records: Vec<Entry> = (0..500u32)
        .map(|i| put(&format!("k{:05}", i * 2), &i.to_string()))
        .collect();
    let storage = sorted(&dir, records);

    for i in 0..500u32 {
        let found = storage.find(&key(&format!("k{:05}", i * 2))).unwrap();
        assert_eq!(value_of(&found.unwrap()), Some(i.to_string()));

        let odd = format!("k{:05}", i * 2 + 1);
        assert!(storage.find(&key(&odd)).unwrap().is_none());
    }
    assert!(storage.find(&key("a")).unwrap().is_none());
    assert!(storage.find(&key("z")).unwrap().is_none());
}

#[test]
fn test_range_contains() {
    let dir = StoreDirectory::memory();
    let storage = sorted(&dir, vec![put("d", "1"), put("m", "2")]);
    assert!(storage.range_contains(&key("d")));
    assert!(storage.range_contains(&key("g")));
    assert!(!storage.range_contains(&key("a")));
    assert!(!storage.range_contains(&key("z")));

    let empty = sorted(&dir, Vec::new());
    assert!(empty.is_empty());
    assert!(!empty.range_contains(&key("d")));
    assert!(empty.find(&key("d")).unwrap().is_none());
}

#[test]
fn test_filter_has_no_false_negatives() {
    let dir = StoreDirectory::memory();
    let records: Vec<Entry> = (0..1000u32).map(|i| put(&i.to_string(), "v")).collect();
    let storage = sorted(&dir, records);

    for i in 0..1000u32 {
        assert!(storage.register().might_contain(&key(&i.to_string()).serialize()));
    }
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_newest_wins() {
    let dir = StoreDirectory::memory();
    let older = sorted(&dir, vec![put("a", "old"), put("b", "old"), put("c", "old")]);
    let newer = sorted(&dir, vec![put("b", "new"), put("d", "new")]);

    let merged = SortedStorage::merge(
        &[&newer, &older],
        dir.create("merged.dat").unwrap(),
        FILTERED,
        |_| Ok(true),
    )
    .unwrap();

    let values: Vec<(String, Option<String>)> = merged
        .iter()
        .map(|r| r.unwrap())
        .map(|r| (r.key.to_string(), value_of(&r)))
        .collect();
    assert_eq!(
        values,
        vec![
            ("a".to_string(), Some("old".to_string())),
            ("b".to_string(), Some("new".to_string())),
            ("c".to_string(), Some("old".to_string())),
            ("d".to_string(), Some("new".to_string())),
        ]
    );
}

#[test]
fn test_merge_drops_tombstones_unless_retained() {
    let dir = StoreDirectory::memory();
    let older = sorted(&dir, vec![put("a", "1"), put("b", "1")]);
    let newer = sorted(&dir, vec![tombstone("a"), tombstone("z")]);

    let purged = SortedStorage::merge(
        &[&newer, &older],
        dir.create("purged.dat").unwrap(),
        FILTERED,
        |_| Ok(false),
    )
    .unwrap();
    assert_eq!(purged.len(), 1);
    assert!(purged.find(&key("a")).unwrap().is_none());
    assert!(purged.iter().all(|r| !r.unwrap().is_tombstone()));

    let kept = SortedStorage::merge(
        &[&newer, &older],
        dir.create("kept.dat").unwrap(),
        FILTERED,
        |k| Ok(*k == key("z")),
    )
    .unwrap();
    assert_eq!(kept.len(), 2);
    assert!(kept.find(&key("z")).unwrap().unwrap().is_tombstone());
}

#[test]
fn test_merge_segmented_splits_disjoint_segments() {
    let dir = StoreDirectory::memory();
    let a = sorted(&dir, (0..25u32).map(|i| put(&format!("{:03}", i), "a")).collect());
    let b = sorted(&dir, (20..40u32).map(|i| put(&format!("{:03}", i), "b")).collect());

    let segments = SortedStorage::merge_segmented(
        &[&b, &a],
        16,
        || dir.create(&dir.unique_name("seg")),
        FILTERED,
        |_| Ok(false),
    )
    .unwrap();

    let lens: Vec<u64> = segments.iter().map(|s| s.len()).collect();
    assert_eq!(lens, vec![16, 16, 8]);
    for pair in segments.windows(2) {
        assert!(pair[0].max_key() < pair[1].min_key());
    }
    let hit = segments[1].find(&key("022")).unwrap().unwrap();
    assert_eq!(value_of(&hit), Some("b".to_string()));
}

#[test]
fn test_merge_segmented_rejects_zero_length() {
    let dir = StoreDirectory::memory();
    let a = sorted(&dir, vec![put("a", "1")]);
    let err = SortedStorage::merge_segmented(
        &[&a],
        0,
        || dir.create(&dir.unique_name("seg")),
        FILTERED,
        |_| Ok(false),
    )
    .unwrap_err();
    assert!(matches!(err, TierError::InvalidArgument(_)));
}

#[test]
fn test_merge_iterator_skips_shadowed() {
    let dir = StoreDirectory::memory();
    let older = sorted(&dir, vec![put("a", "1"), put("b", "1")]);
    let newer = sorted(&dir, vec![put("a", "2")]);

    let keys: Vec<String> = MergeIterator::new(&[&newer, &older])
        .unwrap()
        .map(|r| {
            let r = r.unwrap();
            format!("{}={}", r.key, value_of(&r).unwrap())
        })
        .collect();
    assert_eq!(keys, vec!["a=2", "b=1"]);
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_open_rebuilds_register() {
    let dir = StoreDirectory::temporary().unwrap();
    let name = {
        let storage = sorted(&dir, vec![put("x", "1"), put("y", "2")]);
        storage.name()
    };

    let reopened = SortedStorage::<Entry>::open(dir.open(&name).unwrap(), FILTERED).unwrap();
    assert_eq!(reopened.register().count(), 2);
    assert_eq!(reopened.min_key(), Some(&key("x")));
    assert!(reopened.register().might_contain(&key("y").serialize()));
}

#[test]
fn test_open_rejects_unsorted_file() {
    let dir = StoreDirectory::temporary().unwrap();
    let store = dir.create("unsorted.dat").unwrap();
    let raw = IndexedStorage::<Entry>::create(store.share());
    raw.append(&put("b", "1")).unwrap();
    raw.append(&put("a", "1")).unwrap();

    let err = SortedStorage::<Entry>::open(store, FILTERED).unwrap_err();
    assert!(err.is_corruption());
}
