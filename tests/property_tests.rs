//! Property tests for spilling maps
//! Random operation sequences are checked against a BTreeMap model

use proptest::prelude::*;
use spillmap::{
    BincodeCodec, KeepExisting, KeepGreatest, LastWriteWins, LocationOptions, MemoryStore, Segment,
    SegmentFileFactory, SpillOptions, SpillingMap, StorageLocation,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn location(store: &MemoryStore) -> Arc<StorageLocation> {
    Arc::new(StorageLocation::new(Arc::new(store.clone()), LocationOptions::default()).unwrap())
}

fn map_with(
    store: &MemoryStore,
    threshold: usize,
    max_open_files: usize,
) -> spillmap::SpillingMapBuilder<u16, u32> {
    SpillingMap::builder(Arc::new(BincodeCodec::new()))
        .options(
            SpillOptions::new()
                .buffer_persist_threshold(threshold)
                .max_open_files(max_open_files),
        )
        .factory(location(store))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn keep_greatest_matches_model(
        writes in prop::collection::vec((0u16..64, any::<u32>()), 0..300),
        threshold in 1usize..16,
        max_open_files in 0usize..6,
    ) {
        let store = MemoryStore::new("prop");
        let mut map = map_with(&store, threshold, max_open_files)
            .rewrite(Arc::new(KeepGreatest))
            .build()
            .unwrap();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for (key, value) in writes {
            map.put(key, value).unwrap();
            let slot = model.entry(key).or_insert(value);
            *slot = (*slot).max(value);
        }

        if max_open_files > 0 {
            prop_assert!(map.segment_count() <= max_open_files);
        }
        prop_assert_eq!(map.len().unwrap(), model.len());
        for (key, value) in &model {
            prop_assert_eq!(map.get(key).unwrap(), Some(*value));
        }
        let expected: Vec<(u16, u32)> = model.into_iter().collect();
        prop_assert_eq!(map.entries().unwrap(), expected);
    }

    #[test]
    fn last_write_wins_matches_model(
        writes in prop::collection::vec((0u16..32, any::<u32>()), 0..200),
        removals in prop::collection::vec(0u16..32, 0..8),
        threshold in 1usize..10,
        max_open_files in 0usize..6,
    ) {
        let store = MemoryStore::new("prop");
        let mut map = map_with(&store, threshold, max_open_files)
            .rewrite(Arc::new(LastWriteWins))
            .build()
            .unwrap();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for (key, value) in writes {
            map.put(key, value).unwrap();
            model.insert(key, value);
        }
        if max_open_files > 0 {
            prop_assert!(map.segment_count() <= max_open_files);
        }
        for key in removals {
            prop_assert_eq!(map.remove(&key).unwrap(), model.remove(&key));
        }

        prop_assert_eq!(map.len().unwrap(), model.len());
        if let Some((first, _)) = model.iter().next() {
            prop_assert_eq!(map.first_key().unwrap(), *first);
        }
        if let Some((last, _)) = model.iter().next_back() {
            prop_assert_eq!(map.last_key().unwrap(), *last);
        }
        let expected: Vec<(u16, u32)> = model.into_iter().collect();
        prop_assert_eq!(map.entries().unwrap(), expected);
    }

    #[test]
    fn keep_existing_matches_model(
        writes in prop::collection::vec((0u16..32, any::<u32>()), 0..200),
        threshold in 1usize..10,
        max_open_files in 1usize..6,
    ) {
        let store = MemoryStore::new("prop");
        let mut map = map_with(&store, threshold, max_open_files)
            .rewrite(Arc::new(KeepExisting))
            .build()
            .unwrap();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for (key, value) in writes {
            map.put(key, value).unwrap();
            model.entry(key).or_insert(value);
        }

        prop_assert!(map.segment_count() <= max_open_files);
        for (key, value) in &model {
            prop_assert_eq!(map.get(key).unwrap(), Some(*value));
        }
        let expected: Vec<(u16, u32)> = model.into_iter().collect();
        prop_assert_eq!(map.entries().unwrap(), expected);
    }

    #[test]
    fn persist_then_load_round_trips(
        entries in prop::collection::btree_map(any::<u64>(), ".{0,24}", 0..120),
    ) {
        let store = MemoryStore::new("segment");
        let factory = location(&store);
        let mut segment = Segment::new(Arc::new(BincodeCodec::<u64, String>::new()));
        for (key, value) in &entries {
            segment.put(*key, value.clone()).unwrap();
        }

        segment.persist(factory.create_file().unwrap()).unwrap();
        prop_assert!(segment.is_persisted());
        prop_assert_eq!(segment.len().unwrap(), entries.len());

        segment.load().unwrap();
        let loaded: Vec<(u64, String)> = segment.iter().unwrap().map(|e| e.unwrap()).collect();
        let expected: Vec<(u64, String)> = entries.into_iter().collect();
        prop_assert_eq!(loaded, expected);
    }

    #[test]
    fn threshold_triggers_persist(
        count in 0u16..200,
        threshold in 1usize..20,
    ) {
        let store = MemoryStore::new("threshold");
        let mut map = map_with(&store, threshold, 0).build().unwrap();
        for key in 0..count {
            map.put(key, u32::from(key)).unwrap();
        }

        prop_assert_eq!(map.segment_count(), count as usize / threshold);
        prop_assert_eq!(map.buffer_len(), count as usize % threshold);
        prop_assert_eq!(store.file_count(), map.segment_count());
    }
}
