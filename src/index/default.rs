//! The default index: every object of a dataset, keyed by object path.
//!
//! A build runs in two phases. Counting walks the dataset and inserts a
//! placeholder per object path, so the total is known early and a path
//! seen twice is counted once. Filling pages through the stored keys in
//! order, reads each object cold, and writes values back a batch per
//! transaction. Status is published after every batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::status::{StatusChannel, StatusHook};
use super::store::{DefaultStore, IndexedValue};
use super::{IndexError, IndexStatus};
use crate::buffer;
use crate::error::Result;
use crate::object::{self, ObjectData, SpecRegistry};
use crate::paths;

/// Where a dataset's objects come from.
#[derive(Clone, Debug)]
pub struct DatasetSource {
    pub work_dir: PathBuf,
    /// Normalized dataset directory, relative to the working copy.
    pub dataset_dir: String,
    pub specs: SpecRegistry,
}

impl DatasetSource {
    /// Filesystem root of the dataset.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        paths::to_fs_path(&self.work_dir, &self.dataset_dir)
    }

    /// Read one object straight from the working tree.
    ///
    /// # Errors
    /// See [`object::read_object_cold`].
    pub fn read_cold(&self, object_path: &str) -> Result<Option<ObjectData>> {
        object::read_object_cold(&self.root(), object_path, &self.specs, None)
    }
}

struct BuildFlag<'a>(&'a AtomicBool);

impl Drop for BuildFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Path-keyed index of one dataset.
pub struct DefaultIndex {
    store: DefaultStore,
    status: StatusChannel,
    building: AtomicBool,
    // Held across each read-then-write batch so a refresh never interleaves
    // with a fill batch and gets overwritten by an older read.
    write_gate: Mutex<()>,
    batch_size: usize,
}

impl DefaultIndex {
    /// Create an empty index at `path`, replacing any previous file.
    ///
    /// # Errors
    /// I/O and database failures.
    pub fn create(
        path: &Path,
        batch_size: usize,
        throttle: Duration,
        hook: Option<StatusHook>,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            store: DefaultStore::create(path)?,
            status: StatusChannel::new(IndexStatus::counting(0), throttle, hook),
            building: AtomicBool::new(false),
            write_gate: Mutex::new(()),
            batch_size: batch_size.max(1),
        })
    }

    #[must_use]
    pub const fn status(&self) -> &StatusChannel {
        &self.status
    }

    #[must_use]
    pub const fn store(&self) -> &DefaultStore {
        &self.store
    }

    /// Tear down: running builds fail with [`IndexError::Closed`] at their
    /// next item and status streams end.
    pub fn close(&self) {
        self.store.close();
        self.status.close();
    }

    /// Count and fill. Returns the number of indexed objects.
    ///
    /// # Errors
    /// A build already running, walk and read failures (a matched path with
    /// no spec is one of them), storage failures, and
    /// [`IndexError::Closed`] when closed mid-build. Status streams end
    /// either way.
    pub fn build(&self, source: &DatasetSource) -> Result<u64> {
        if self.building.swap(true, Ordering::AcqRel) {
            return Err(IndexError::AlreadyBuilding {
                dataset_dir: source.dataset_dir.clone(),
            }
            .into());
        }
        let _flag = BuildFlag(&self.building);

        let started = std::time::Instant::now();
        let result = self.count(source).and_then(|total| self.fill(source, total));
        match &result {
            Ok(count) => {
                tracing::info!(
                    dataset = %source.dataset_dir,
                    objects = count,
                    elapsed_ms = started.elapsed().as_millis(),
                    "default index built"
                );
                self.status.complete(IndexStatus::complete(*count));
            }
            Err(e) => {
                tracing::warn!(dataset = %source.dataset_dir, "default index build failed: {e}");
                self.status.close();
            }
        }
        result
    }

    fn count(&self, source: &DatasetSource) -> Result<u64> {
        let walk = buffer::list_descendant_paths(&source.root())?;
        let mut total = 0;
        let mut batch = Vec::with_capacity(self.batch_size);
        for object_path in object::list_object_paths(walk, &source.specs) {
            self.store.check_open()?;
            batch.push(object_path?);
            if batch.len() >= self.batch_size {
                total += self.store.insert_placeholders(&batch)?;
                batch.clear();
                self.status.publish(IndexStatus::counting(total));
            }
        }
        if !batch.is_empty() {
            total += self.store.insert_placeholders(&batch)?;
        }
        self.status.publish(IndexStatus::counting(total));
        self.status.flush();
        tracing::debug!(dataset = %source.dataset_dir, total, "counted objects");
        Ok(total)
    }

    /// Replace placeholders with values, one key-ordered batch at a time.
    ///
    /// An object that reads as absent here (removed after counting) has its
    /// key deleted rather than kept as a placeholder, so a complete index
    /// only holds objects that exist.
    fn fill(&self, source: &DatasetSource, total: u64) -> Result<u64> {
        let root = source.root();
        let mut loaded = 0;
        let mut filled = 0;
        let mut after: Option<String> = None;
        loop {
            let keys = self.store.keys_after(after.as_deref(), self.batch_size)?;
            let Some(last) = keys.last().cloned() else {
                break;
            };
            {
                let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
                let mut writes = Vec::with_capacity(keys.len());
                for key in keys {
                    self.store.check_open()?;
                    let value = object::read_object_cold(&root, &key, &source.specs, None)?;
                    loaded += 1;
                    if value.is_some() {
                        filled += 1;
                    }
                    writes.push((key, value.map(IndexedValue::Object)));
                }
                self.store.write_batch(&writes)?;
            }
            self.status.publish(IndexStatus::indexing(filled, total, loaded));
            after = Some(last);
        }
        Ok(self.store.len()?)
    }

    /// Re-read the given objects from the working tree and update their
    /// entries. Objects that no longer exist, or that no spec claims, are
    /// dropped.
    ///
    /// # Errors
    /// Read and storage failures.
    pub fn refresh(&self, source: &DatasetSource, object_paths: &[String]) -> Result<()> {
        if object_paths.is_empty() {
            return Ok(());
        }
        let gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut writes = Vec::with_capacity(object_paths.len());
        for object_path in object_paths {
            let value = if source.specs.find(object_path).is_some() {
                source.read_cold(object_path)?
            } else {
                None
            };
            writes.push((object_path.clone(), value.map(IndexedValue::Object)));
        }
        self.store.write_batch(&writes)?;
        drop(gate);
        if self.status.is_complete() {
            self.status.publish(IndexStatus::complete(self.store.len()?));
            self.status.flush();
        }
        tracing::debug!(
            dataset = %source.dataset_dir,
            objects = object_paths.len(),
            "default index refreshed"
        );
        Ok(())
    }

    /// Indexed value of one object.
    ///
    /// # Errors
    /// Storage failures and [`IndexError::Closed`].
    pub fn get(&self, object_path: &str) -> Result<Option<IndexedValue>, IndexError> {
        self.store.get(object_path)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::object::{JsonFileSpec, ObjectError, ObjectSpec};

    fn source(work_dir: &Path, specs: Vec<Arc<dyn ObjectSpec>>) -> DatasetSource {
        DatasetSource {
            work_dir: work_dir.to_owned(),
            dataset_dir: "data".to_owned(),
            specs: SpecRegistry::new(specs),
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn build_counts_then_fills() {
        let wc = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write(wc.path(), &format!("data/p/{i}.json"), &format!(r#"{{"i":{i}}}"#));
        }
        write(wc.path(), "data/README.md", "ignored");
        let src = source(wc.path(), vec![Arc::new(JsonFileSpec)]);

        let index =
            DefaultIndex::create(&cache.path().join("default.redb"), 2, Duration::ZERO, None)
                .unwrap();
        let stream = index.status().subscribe();
        assert_eq!(index.build(&src).unwrap(), 5);

        assert_eq!(
            index.get("/p/3.json").unwrap(),
            Some(IndexedValue::Object(json!({"i": 3})))
        );
        assert_eq!(index.get("/README.md").unwrap(), None);
        assert_eq!(stream.wait_for_completion(), IndexStatus::complete(5));
    }

    #[test]
    fn counting_does_not_double_count() {
        let wc = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(wc.path(), "data/a.json", "1");
        let src = source(wc.path(), vec![Arc::new(JsonFileSpec)]);
        let index =
            DefaultIndex::create(&cache.path().join("d.redb"), 8, Duration::ZERO, None).unwrap();
        assert_eq!(index.count(&src).unwrap(), 1);
        assert_eq!(index.count(&src).unwrap(), 0);
        assert_eq!(index.store().len().unwrap(), 1);
    }

    #[derive(Debug)]
    struct Mismatched;

    impl ObjectSpec for Mismatched {
        fn name(&self) -> &str {
            "mismatched"
        }

        // Claims buffers for an object path that no spec matches.
        fn matches(&self, object_path: &str) -> bool {
            object_path.ends_with(".txt")
        }

        fn containing_object_path(&self, buffer_path: &str) -> Option<String> {
            buffer_path
                .strip_suffix(".txt")
                .map(|stem| format!("{stem}.orphan"))
        }

        fn serialize(&self, _: &ObjectData) -> Result<object::BufferDataset, object::SpecError> {
            Err("unused".into())
        }

        fn deserialize(&self, _: &object::BufferDataset) -> Result<ObjectData, object::SpecError> {
            Err("unused".into())
        }
    }

    #[test]
    fn objects_gone_before_fill_leave_the_index() {
        let wc = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(wc.path(), "data/a.json", "1");
        write(wc.path(), "data/b.json", "2");
        let src = source(wc.path(), vec![Arc::new(JsonFileSpec)]);
        let index =
            DefaultIndex::create(&cache.path().join("d.redb"), 8, Duration::ZERO, None).unwrap();
        let total = index.count(&src).unwrap();
        assert_eq!(total, 2);

        fs::remove_file(wc.path().join("data/b.json")).unwrap();
        assert_eq!(index.fill(&src, total).unwrap(), 1);
        assert_eq!(index.get("/a.json").unwrap(), Some(IndexedValue::Object(json!(1))));
        assert_eq!(index.get("/b.json").unwrap(), None);
    }

    #[test]
    fn fill_fails_on_path_without_spec() {
        let wc = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(wc.path(), "data/x.txt", "x");
        let src = source(wc.path(), vec![Arc::new(Mismatched)]);
        let index =
            DefaultIndex::create(&cache.path().join("d.redb"), 8, Duration::ZERO, None).unwrap();
        let err = index.build(&src).unwrap_err();
        assert!(matches!(
            err,
            Error::Object(ObjectError::NoMatchingSpec { ref object_path }) if object_path == "/x.orphan"
        ));
        assert!(index.status().is_complete());
    }

    #[test]
    fn corrupt_object_fails_build() {
        let wc = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(wc.path(), "data/ok.json", "{}");
        write(wc.path(), "data/bad.json", "{");
        let src = source(wc.path(), vec![Arc::new(JsonFileSpec)]);
        let index =
            DefaultIndex::create(&cache.path().join("d.redb"), 8, Duration::ZERO, None).unwrap();
        assert!(matches!(
            index.build(&src),
            Err(Error::Object(ObjectError::Deserialize { .. }))
        ));
    }

    #[test]
    fn closed_index_aborts_build() {
        let wc = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(wc.path(), "data/a.json", "1");
        let src = source(wc.path(), vec![Arc::new(JsonFileSpec)]);
        let index =
            DefaultIndex::create(&cache.path().join("d.redb"), 8, Duration::ZERO, None).unwrap();
        index.close();
        assert!(matches!(
            index.build(&src),
            Err(Error::Index(IndexError::Closed { .. }))
        ));
    }

    #[test]
    fn refresh_updates_and_drops_entries() {
        let wc = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(wc.path(), "data/a.json", "1");
        write(wc.path(), "data/b.json", "2");
        let src = source(wc.path(), vec![Arc::new(JsonFileSpec)]);
        let index =
            DefaultIndex::create(&cache.path().join("d.redb"), 8, Duration::ZERO, None).unwrap();
        index.build(&src).unwrap();

        write(wc.path(), "data/a.json", "10");
        fs::remove_file(wc.path().join("data/b.json")).unwrap();
        write(wc.path(), "data/c.json", "3");
        index
            .refresh(&src, &["/a.json", "/b.json", "/c.json"].map(String::from))
            .unwrap();

        assert_eq!(index.get("/a.json").unwrap(), Some(IndexedValue::Object(json!(10))));
        assert_eq!(index.get("/b.json").unwrap(), None);
        assert_eq!(index.get("/c.json").unwrap(), Some(IndexedValue::Object(json!(3))));
        assert_eq!(index.status().snapshot(), IndexStatus::complete(2));
    }
}
