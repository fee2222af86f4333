use folio_lfs::{resolve_if_pointer, LfsError, LocalObjectStore, Pointer};
use proptest::prelude::*;

#[test]
fn pointer_in_work_dir_resolves_from_git_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalObjectStore::for_work_dir(dir.path());
    let pointer = store.insert(b"scan-0001.tiff bytes").unwrap();

    assert!(store
        .object_path(&pointer.oid)
        .starts_with(dir.path().join(".git/lfs/objects")));
    let resolved = resolve_if_pointer(&store, pointer.encode()).unwrap();
    assert_eq!(resolved, b"scan-0001.tiff bytes");
}

#[test]
fn non_pointer_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalObjectStore::for_work_dir(dir.path());
    let data = b"title = \"plain\"\n".to_vec();
    assert_eq!(resolve_if_pointer(&store, data.clone()).unwrap(), data);
}

#[test]
fn size_mismatch_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalObjectStore::for_work_dir(dir.path());
    let mut pointer = store.insert(b"12345").unwrap();
    pointer.size = 6;
    assert!(matches!(
        resolve_if_pointer(&store, pointer.encode()),
        Err(LfsError::SizeMismatch { expected: 6, actual: 5, .. })
    ));
}

proptest! {
    #[test]
    fn encoded_pointers_parse_back(oid in "[0-9a-f]{64}", size in any::<u64>()) {
        let pointer = Pointer { oid, size };
        prop_assert_eq!(Pointer::parse(&pointer.encode()), Some(pointer));
    }
}
