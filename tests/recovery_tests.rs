//! Recovery tests for location-backed spilling maps
//! These tests reopen maps over the same directories to simulate restarts

use spillmap::{
    BincodeCodec, CollectingSink, LastWriteWins, LocationOptions, LocationSpillingMap, SpillEvent,
    SpillOptions, SpillingMap, SpillingMapBuilder, StorageLocation,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn init() {
    env_logger::try_init().ok();
}

fn builder(threshold: usize) -> SpillingMapBuilder<u64, String> {
    SpillingMap::builder(Arc::new(BincodeCodec::new()))
        .options(SpillOptions::new().buffer_persist_threshold(threshold))
}

fn local(dir: &Path, sub_path: &str) -> Arc<StorageLocation> {
    Arc::new(StorageLocation::local(dir, LocationOptions::new().sub_path(sub_path)).unwrap())
}

fn open(dir: &Path, threshold: usize) -> LocationSpillingMap<u64, String> {
    LocationSpillingMap::open(builder(threshold), vec![local(dir, "spill")]).unwrap()
}

fn seg_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".seg"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_reopen_recovers_persisted_data() {
    init();
    let dir = TempDir::new().unwrap();

    {
        let mut map = open(dir.path(), 10);
        for i in 0..50 {
            map.put(i, format!("value{}", i)).unwrap();
        }
        // Never persisted
        for i in 50..53 {
            map.put(i, format!("value{}", i)).unwrap();
        }
        assert_eq!(map.segment_count(), 5);
    }

    let map = open(dir.path(), 10);
    assert_eq!(map.segment_count(), 5);
    assert_eq!(map.len().unwrap(), 50);
    assert_eq!(map.get(&0).unwrap(), Some("value0".to_string()));
    assert_eq!(map.get(&49).unwrap(), Some("value49".to_string()));
    assert_eq!(map.get(&51).unwrap(), None);
    assert_eq!(map.last_key().unwrap(), 49);
}

#[test]
fn test_counter_continues_after_reopen() {
    init();
    let dir = TempDir::new().unwrap();

    {
        let mut map = open(dir.path(), 5);
        map.put_all((0..15).map(|i| (i, i.to_string()))).unwrap();
    }
    assert_eq!(seg_files(&dir.path().join("spill")).len(), 3);

    let mut map = open(dir.path(), 5);
    assert_eq!(map.locations()[0].counter(), 3);
    map.put_all((15..20).map(|i| (i, i.to_string()))).unwrap();

    let files = seg_files(&dir.path().join("spill"));
    assert_eq!(files.len(), 4);
    assert!(files[3].starts_with("000003-"), "unexpected name {}", files[3]);
    assert_eq!(map.len().unwrap(), 20);
}

#[test]
fn test_clear_deletes_files_on_disk() {
    init();
    let dir = TempDir::new().unwrap();
    let mut map = open(dir.path(), 4);
    map.put_all((0..12).map(|i| (i, i.to_string()))).unwrap();

    // A stray segment file from an unknown writer
    fs::write(dir.path().join("spill").join("000042-1.seg"), [0u8, 0, 0, 0]).unwrap();
    fs::write(dir.path().join("spill").join("notes.txt"), b"keep").unwrap();

    map.clear().unwrap();
    assert!(seg_files(&dir.path().join("spill")).is_empty());
    assert!(dir.path().join("spill").join("notes.txt").exists());
    assert!(map.is_empty().unwrap());
}

#[test]
fn test_truncated_file_is_skipped() {
    init();
    let dir = TempDir::new().unwrap();
    let spill = dir.path().join("spill");
    fs::create_dir_all(&spill).unwrap();
    fs::write(spill.join("000007-1700000000000.seg"), [1u8, 2]).unwrap();

    let sink = CollectingSink::new();
    let map =
        LocationSpillingMap::open(builder(10).sink(sink.clone()), vec![local(dir.path(), "spill")]).unwrap();

    assert_eq!(map.segment_count(), 0);
    assert_eq!(map.locations()[0].counter(), 8);
    let skipped = sink.count(|e| matches!(e, SpillEvent::RecoverySkipped { .. }));
    assert_eq!(skipped, 1);
}

#[test]
fn test_sub_paths_are_isolated() {
    init();
    let dir = TempDir::new().unwrap();

    {
        let mut a = LocationSpillingMap::open(builder(100), vec![local(dir.path(), "a")]).unwrap();
        let mut b = LocationSpillingMap::open(builder(100), vec![local(dir.path(), "b")]).unwrap();
        a.put(1, "a".to_string()).unwrap();
        b.put(1, "b".to_string()).unwrap();
        b.put(2, "b".to_string()).unwrap();
        a.persist().unwrap();
        b.persist().unwrap();
    }

    let a = LocationSpillingMap::open(builder(100), vec![local(dir.path(), "a")]).unwrap();
    let b = LocationSpillingMap::open(builder(100), vec![local(dir.path(), "b")]).unwrap();
    assert_eq!(a.len().unwrap(), 1);
    assert_eq!(b.len().unwrap(), 2);
    assert_eq!(a.get(&1).unwrap(), Some("a".to_string()));
    assert_eq!(b.get(&1).unwrap(), Some("b".to_string()));
}

#[test]
fn test_recovery_across_two_locations() {
    init();
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    {
        let mut map =
            LocationSpillingMap::open(builder(4), vec![local(&first, "spill"), local(&second, "spill")])
                .unwrap();
        map.put_all((0..8).map(|i| (i, i.to_string()))).unwrap();
    }
    // Move one file to the second location, as if it had been placed there
    let moved = seg_files(&first.join("spill")).remove(0);
    fs::rename(first.join("spill").join(&moved), second.join("spill").join(&moved)).unwrap();

    let map = LocationSpillingMap::open(builder(4), vec![local(&first, "spill"), local(&second, "spill")])
        .unwrap();
    assert_eq!(map.segment_count(), 2);
    assert_eq!(map.len().unwrap(), 8);
    assert_eq!(map.locations()[1].counter(), 1);
}

/// Test that overwrites are recovered in write order, not location order
#[test]
fn test_overwrite_in_preferred_location_survives_reopen() {
    init();
    let dir = TempDir::new().unwrap();
    let preferred = dir.path().join("preferred");
    let fallback = dir.path().join("fallback");

    // The first writer only reaches the fallback location
    {
        let mut map =
            LocationSpillingMap::open(builder(100).rewrite(Arc::new(LastWriteWins)), vec![local(&fallback, "spill")])
                .unwrap();
        map.put(1, "stale".to_string()).unwrap();
        map.put(2, "kept".to_string()).unwrap();
        map.persist().unwrap();
    }
    std::thread::sleep(Duration::from_millis(2));

    // A later writer overwrites key 1 in the preferred location
    {
        let mut map =
            LocationSpillingMap::open(builder(100).rewrite(Arc::new(LastWriteWins)), vec![local(&preferred, "spill")])
                .unwrap();
        map.put(1, "fresh".to_string()).unwrap();
        map.persist().unwrap();
    }

    let map = LocationSpillingMap::open(
        builder(100).rewrite(Arc::new(LastWriteWins)),
        vec![local(&preferred, "spill"), local(&fallback, "spill")],
    )
    .unwrap();
    assert_eq!(map.segment_count(), 2);
    assert_eq!(map.get(&1).unwrap(), Some("fresh".to_string()));
    assert_eq!(map.get(&2).unwrap(), Some("kept".to_string()));
    assert_eq!(map.len().unwrap(), 2);
}
