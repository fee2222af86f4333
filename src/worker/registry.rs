//! Loaded datasets, keyed by working copy and dataset directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::index::{DatasetSource, DefaultIndex, FilteredIndex};

/// Identifies a dataset registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetKey {
    /// Working copy root, as given to `load`.
    pub work_dir: PathBuf,
    /// Bare dataset directory (`data/items`, empty for the root).
    pub dataset_dir: String,
}

impl DatasetKey {
    pub fn new(work_dir: &Path, dataset_dir: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.to_owned(),
            dataset_dir: dataset_dir.into(),
        }
    }
}

/// One loaded dataset and its indexes.
pub struct Dataset {
    pub source: DatasetSource,
    pub cache_root: PathBuf,
    pub default: DefaultIndex,
    filtered: Mutex<BTreeMap<String, Arc<FilteredIndex>>>,
}

impl Dataset {
    #[must_use]
    pub fn new(source: DatasetSource, cache_root: PathBuf, default: DefaultIndex) -> Self {
        Self {
            source,
            cache_root,
            default,
            filtered: Mutex::new(BTreeMap::new()),
        }
    }

    /// The filtered index table, keyed by verbatim expression.
    pub fn filtered(&self) -> MutexGuard<'_, BTreeMap<String, Arc<FilteredIndex>>> {
        self.filtered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every filtered index and delete its file. They are rebuilt on
    /// next request.
    pub fn invalidate_filtered(&self) {
        let dropped = std::mem::take(&mut *self.filtered());
        for index in dropped.values() {
            index.destroy();
        }
        if !dropped.is_empty() {
            tracing::debug!(
                dataset = %self.source.dataset_dir,
                count = dropped.len(),
                "filtered indexes invalidated"
            );
        }
    }

    /// Close every index. Running builds fail at their next item and status
    /// streams end.
    pub fn close(&self) {
        self.default.close();
        let filtered = std::mem::take(&mut *self.filtered());
        for index in filtered.values() {
            index.close();
        }
    }
}

/// The datasets a worker has loaded.
#[derive(Default)]
pub struct DatasetRegistry {
    datasets: RwLock<HashMap<DatasetKey, Arc<Dataset>>>,
}

impl DatasetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dataset`, returning the registration it replaces.
    pub fn insert(&self, key: DatasetKey, dataset: Arc<Dataset>) -> Option<Arc<Dataset>> {
        self.datasets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, dataset)
    }

    pub fn remove(&self, key: &DatasetKey) -> Option<Arc<Dataset>> {
        self.datasets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// # Errors
    /// [`Error::DatasetNotLoaded`] when nothing is registered under `key`.
    pub fn get(&self, key: &DatasetKey) -> Result<Arc<Dataset>> {
        self.datasets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::DatasetNotLoaded {
                work_dir: key.work_dir.clone(),
                dataset_dir: key.dataset_dir.clone(),
            })
    }

    /// Every dataset loaded from `work_dir`, ordered by dataset directory.
    #[must_use]
    pub fn in_work_dir(&self, work_dir: &Path) -> Vec<Arc<Dataset>> {
        let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<(&DatasetKey, &Arc<Dataset>)> = datasets
            .iter()
            .filter(|(key, _)| key.work_dir == work_dir)
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0));
        found.into_iter().map(|(_, d)| Arc::clone(d)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datasets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::object::SpecRegistry;

    fn dataset(cache: &Path, dataset_dir: &str) -> Arc<Dataset> {
        let source = DatasetSource {
            work_dir: PathBuf::from("/wc"),
            dataset_dir: dataset_dir.to_owned(),
            specs: SpecRegistry::builtin(),
        };
        let root = cache.join(dataset_dir.replace('/', "@"));
        let default =
            DefaultIndex::create(&root.join("default.redb"), 8, Duration::ZERO, None).unwrap();
        Arc::new(Dataset::new(source, root, default))
    }

    #[test]
    fn lookups_fail_loudly() {
        let registry = DatasetRegistry::new();
        let err = registry
            .get(&DatasetKey::new(Path::new("/wc"), "data"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::DatasetNotLoaded { ref dataset_dir, .. } if dataset_dir == "data"));
    }

    #[test]
    fn insert_returns_replaced_registration() {
        let cache = tempfile::tempdir().unwrap();
        let registry = DatasetRegistry::new();
        let key = DatasetKey::new(Path::new("/wc"), "data");
        assert!(registry.insert(key.clone(), dataset(cache.path(), "data")).is_none());
        assert!(registry.insert(key.clone(), dataset(cache.path(), "data2")).is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&key).unwrap().source.dataset_dir, "data2");
    }

    #[test]
    fn in_work_dir_filters_and_orders() {
        let cache = tempfile::tempdir().unwrap();
        let registry = DatasetRegistry::new();
        registry.insert(DatasetKey::new(Path::new("/wc"), "b"), dataset(cache.path(), "b"));
        registry.insert(DatasetKey::new(Path::new("/wc"), "a"), dataset(cache.path(), "a"));
        registry.insert(DatasetKey::new(Path::new("/other"), "c"), dataset(cache.path(), "c"));
        let dirs: Vec<String> = registry
            .in_work_dir(Path::new("/wc"))
            .iter()
            .map(|d| d.source.dataset_dir.clone())
            .collect();
        assert_eq!(dirs, vec!["a", "b"]);
    }

    #[test]
    fn close_ends_default_status() {
        let cache = tempfile::tempdir().unwrap();
        let d = dataset(cache.path(), "data");
        d.close();
        assert!(d.default.status().is_complete());
    }
}
