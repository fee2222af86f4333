//! Loading, reading and indexing datasets through the worker.

mod common;

use common::{DATASET, TestRepo};
use folio::Error;
use folio::index::{IndexError, IndexId, IndexStatus};
use folio::object::SpecRegistry;
use folio::query::QueryError;
use folio::worker::WorkerEvent;
use folio::Worker;
use serde_json::json;

fn four_objects() -> TestRepo {
    TestRepo::new(&[
        ("/data/a.json", r#"{"x": 1}"#),
        ("/data/b.json", r#"{"x": 2}"#),
        ("/data/c.json", r#"{"x": 0}"#),
        ("/data/d.json", r#"{"x": 5}"#),
        ("/README.md", "outside the dataset\n"),
    ])
}

// ---------------------------------------------------------------------------
// Loading and reads
// ---------------------------------------------------------------------------

#[test]
fn load_indexes_every_object() {
    let repo = four_objects();
    let worker = Worker::default();
    let count = worker
        .load(repo.path(), DATASET, SpecRegistry::builtin(), &repo.cache_root(DATASET))
        .unwrap();
    assert_eq!(count, 4);

    let status = worker
        .describe_index(repo.path(), DATASET, &IndexId::Default)
        .unwrap();
    assert_eq!(status.initial, IndexStatus::complete(4));
    assert!(repo.cache_root(DATASET).join("default.redb").exists());
}

#[test]
fn get_object_dataset_reports_absent_objects() {
    let repo = four_objects();
    let worker = repo.loaded_worker();
    let objects = worker
        .get_object_dataset(repo.path(), DATASET, &["/b.json", "missing.json"], false)
        .unwrap();
    assert_eq!(objects["/b.json"], Some(json!({"x": 2})));
    assert_eq!(objects["/missing.json"], None);
}

#[test]
fn reads_require_a_loaded_dataset() {
    let repo = four_objects();
    let worker = Worker::default();
    let err = worker
        .get_object_dataset(repo.path(), DATASET, &["/a.json"], false)
        .unwrap_err();
    assert!(matches!(err, Error::DatasetNotLoaded { .. }));
}

#[test]
fn unload_forgets_the_dataset() {
    let repo = four_objects();
    let worker = repo.loaded_worker();
    worker.unload(repo.path(), DATASET).unwrap();
    assert!(matches!(
        worker.unload(repo.path(), DATASET),
        Err(Error::DatasetNotLoaded { .. })
    ));
}

#[test]
fn reload_replaces_the_registration() {
    let repo = four_objects();
    let worker = repo.loaded_worker();
    repo.write("data/e.json", r#"{"x": 9}"#);
    let count = worker
        .load(repo.path(), DATASET, SpecRegistry::builtin(), &repo.cache_root(DATASET))
        .unwrap();
    assert_eq!(count, 5);
}

// ---------------------------------------------------------------------------
// Filtered indexes
// ---------------------------------------------------------------------------

#[test]
fn filtered_index_is_positional_in_path_order() {
    let repo = four_objects();
    let worker = repo.loaded_worker();
    let id = worker
        .get_or_create_filtered_index(repo.path(), DATASET, "obj.x > 1")
        .unwrap();
    assert_eq!(id, IndexId::Filtered("obj.x > 1".to_owned()));

    let at = |position| {
        worker
            .get_indexed_object(repo.path(), DATASET, &id, position)
            .unwrap()
    };
    assert_eq!(at(0).as_deref(), Some("/b.json"));
    assert_eq!(at(1).as_deref(), Some("/d.json"));
    assert_eq!(at(2), None);

    let status = worker.describe_index(repo.path(), DATASET, &id).unwrap();
    assert_eq!(status.initial, IndexStatus::complete(2));
}

#[test]
fn filtered_indexes_are_memoized_by_expression_text() {
    let repo = four_objects();
    let worker = repo.loaded_worker();
    let first = worker
        .get_or_create_filtered_index(repo.path(), DATASET, "obj.x > 1")
        .unwrap();
    let again = worker
        .get_or_create_filtered_index(repo.path(), DATASET, "obj.x > 1")
        .unwrap();
    assert_eq!(first, again);

    // Same meaning, different text: a separate index.
    let spaced = worker
        .get_or_create_filtered_index(repo.path(), DATASET, "obj.x>1")
        .unwrap();
    assert_ne!(first, spaced);
    let files = std::fs::read_dir(repo.cache_root(DATASET).join("filtered"))
        .unwrap()
        .count();
    assert_eq!(files, 2);
}

#[test]
fn default_index_is_not_positional() {
    let repo = four_objects();
    let worker = repo.loaded_worker();
    let err = worker
        .get_indexed_object(repo.path(), DATASET, &IndexId::Default, 0)
        .unwrap_err();
    assert!(matches!(err, Error::Index(IndexError::NotPositional)));
}

#[test]
fn unknown_filtered_index_is_an_error() {
    let repo = four_objects();
    let worker = repo.loaded_worker();
    let id = IndexId::Filtered("obj.x == 3".to_owned());
    assert!(matches!(
        worker.get_indexed_object(repo.path(), DATASET, &id, 0),
        Err(Error::Index(IndexError::Unknown { .. }))
    ));
    assert!(matches!(
        worker.describe_index(repo.path(), DATASET, &id),
        Err(Error::Index(IndexError::Unknown { .. }))
    ));
}

#[test]
fn bad_predicates_leave_no_index_behind() {
    let repo = four_objects();
    let worker = repo.loaded_worker();

    let syntax = worker
        .get_or_create_filtered_index(repo.path(), DATASET, "obj.x >")
        .unwrap_err();
    assert!(matches!(syntax, Error::Query(QueryError::Syntax { .. })));

    let not_boolean = worker
        .get_or_create_filtered_index(repo.path(), DATASET, "obj.x")
        .unwrap_err();
    assert!(matches!(not_boolean, Error::Query(QueryError::NotBoolean { .. })));

    let id = IndexId::Filtered("obj.x".to_owned());
    assert!(worker.describe_index(repo.path(), DATASET, &id).is_err());
}

#[test]
fn index_status_changes_are_broadcast() {
    let repo = four_objects();
    let worker = Worker::default();
    let mut events = worker.subscribe();
    worker
        .load(repo.path(), DATASET, SpecRegistry::builtin(), &repo.cache_root(DATASET))
        .unwrap();

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::IndexStatusChanged { index, status, .. } = event {
            assert_eq!(index, IndexId::Default);
            last = Some(status);
        }
    }
    assert_eq!(last, Some(IndexStatus::complete(4)));
}
