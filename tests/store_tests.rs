mod common;

use std::sync::Arc;

use common::image;
use imagesig_retrieval::{
    EngineConfig, Error, ImageEngine, IndexStore, MemoryStore, RecordId, RetryPolicy,
    RetryingStore,
};

#[test]
fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.json");

    let store = Arc::new(MemoryStore::new());
    let engine = ImageEngine::new(EngineConfig::default(), Arc::clone(&store)).unwrap();
    for seed in 1..5 {
        engine
            .add_image(&format!("/img{seed}.png"), &image(seed), None)
            .unwrap();
    }
    let removed = engine.add_image("/gone.png", &image(9), None).unwrap();
    engine.delete_id(removed.id).unwrap();
    store.save_snapshot(&path).unwrap();

    let restored = MemoryStore::load_snapshot(&path).unwrap();
    assert_eq!(restored.count().unwrap(), 4);
    assert_eq!(
        restored.query_page(0, 10).unwrap(),
        store.query_page(0, 10).unwrap()
    );

    // Postings are rebuilt, so searches work against the restored store.
    let engine = ImageEngine::new(EngineConfig::default(), restored).unwrap();
    let outcome = engine.search_image(&image(2), Some(false)).unwrap();
    assert_eq!(outcome.matches[0].path, "/img2.png");
    assert_eq!(outcome.matches[0].distance, 0.0);

    // Ids keep increasing past every id handed out before the snapshot.
    let added = engine.add_image("/new.png", &image(7), None).unwrap();
    assert!(added.id > removed.id);
}

#[test]
fn test_missing_snapshot_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = MemoryStore::load_snapshot(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert_eq!(err.error_code(), "IO_ERROR");
}

#[test]
fn test_corrupt_snapshot_is_serialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.json");
    std::fs::write(&path, b"{not json").unwrap();
    let err = MemoryStore::load_snapshot(&path).unwrap_err();
    assert!(matches!(err, Error::Serialization { .. }));
}

#[test]
fn test_path_lookup_and_paging() {
    let engine = ImageEngine::new(EngineConfig::default(), MemoryStore::new()).unwrap();
    for seed in 1..6 {
        engine
            .add_image(&format!("/p{seed}.png"), &image(seed), None)
            .unwrap();
    }
    assert_eq!(engine.count().unwrap(), 5);
    assert_eq!(
        engine.list(1, 2).unwrap(),
        vec!["/p2.png".to_string(), "/p3.png".to_string()]
    );
    assert!(engine.list(10, 5).unwrap().is_empty());
    assert_eq!(engine.store().query_by_path_exact("/p4.png").unwrap().len(), 1);
    assert!(engine.store().query_by_path_exact("/nope").unwrap().is_empty());
}

#[test]
fn test_delete_unknown_id_succeeds() {
    let store = MemoryStore::new();
    store.delete(RecordId(7)).unwrap();
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn test_engine_over_retrying_store() {
    let store = RetryingStore::new(MemoryStore::new(), RetryPolicy::default());
    let engine = ImageEngine::new(EngineConfig::default(), store).unwrap();
    engine.add_image("/a.png", &image(1), None).unwrap();
    engine.ping().unwrap();
    assert_eq!(engine.store().inner().count().unwrap(), 1);
}
