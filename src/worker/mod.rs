//! The [`Worker`]: the one entry point callers use.
//!
//! A worker owns the registry of loaded datasets and the per-working-copy
//! locks. Reads (object data, index lookups) take no lock. Commits,
//! repository init and re-indexing after history moves take the working
//! copy's lock and report `busy` while they hold it.
//!
//! Index builds run on the calling thread. Other threads can watch them
//! through [`Worker::describe_index`] or [`Worker::subscribe`].

pub mod events;
pub mod lock;
pub mod registry;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use folio_git::GixRepo;
use folio_lfs::{LfsResolver, LocalObjectStore};
use tokio::sync::broadcast;

pub use events::{RepoStatus, WorkerEvent};
pub use registry::{Dataset, DatasetKey, DatasetRegistry};

use self::lock::{RepoGuard, RepoLocks};
use crate::buffer::version::{self, VersionDiff};
use crate::commit::{self, BufferChangeset, Changeset, CommitOptions, CommitOutcome, ObjectChangeset};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::index::status::StatusHook;
use crate::index::{
    DatasetSource, DefaultIndex, FilteredIndex, IndexError, IndexId, IndexStatus, IndexedValue,
    StatusStream, filtered,
};
use crate::object::{self, ObjectData, SpecRegistry};
use crate::paths;

/// Loads datasets, serves reads, and serializes writes per working copy.
pub struct Worker {
    config: WorkerConfig,
    registry: DatasetRegistry,
    locks: RepoLocks,
    events: broadcast::Sender<WorkerEvent>,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

/// Holds a working copy for one operation and reports `ready` when done.
struct Operation<'w> {
    worker: &'w Worker,
    work_dir: PathBuf,
    guard: Option<RepoGuard>,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.worker.emit(WorkerEvent::RepositoryStatusChanged {
            work_dir: self.work_dir.clone(),
            status: RepoStatus::Ready,
        });
    }
}

impl Worker {
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(events::EVENT_CAPACITY);
        Self {
            locks: RepoLocks::new(config.max_waiters, config.lock_timeout()),
            registry: DatasetRegistry::new(),
            config,
            events,
        }
    }

    /// Events from now on. Slow subscribers skip ahead; nothing waits on
    /// them.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn status_hook(&self, work_dir: &Path, dataset_dir: &str, index: IndexId) -> StatusHook {
        let events = self.events.clone();
        let work_dir = work_dir.to_owned();
        let dataset_dir = dataset_dir.to_owned();
        Arc::new(move |status: &IndexStatus| {
            let _ = events.send(WorkerEvent::IndexStatusChanged {
                work_dir: work_dir.clone(),
                dataset_dir: dataset_dir.clone(),
                index: index.clone(),
                status: status.clone(),
            });
        })
    }

    fn begin(&self, work_dir: &Path, operation: &str, fail_if_busy: bool) -> Result<Operation<'_>> {
        let guard = self.locks.acquire(work_dir, operation, fail_if_busy)?;
        self.emit(WorkerEvent::RepositoryStatusChanged {
            work_dir: work_dir.to_owned(),
            status: RepoStatus::Busy {
                operation: operation.to_owned(),
            },
        });
        Ok(Operation {
            worker: self,
            work_dir: work_dir.to_owned(),
            guard: Some(guard),
        })
    }

    fn dataset(&self, work_dir: &Path, dataset_dir: &str) -> Result<Arc<Dataset>> {
        let dataset_dir = paths::normalize_dataset_dir(dataset_dir)?;
        self.registry.get(&DatasetKey::new(work_dir, dataset_dir))
    }

    // -----------------------------------------------------------------------
    // Dataset lifecycle
    // -----------------------------------------------------------------------

    /// Load a dataset and build its default index, replacing any previous
    /// registration of the same working copy and directory.
    ///
    /// The index lives in `cache_root/default.redb` and is rebuilt from
    /// scratch. Returns the number of indexed objects.
    ///
    /// # Errors
    /// Invalid paths, storage failures, and build failures. The dataset
    /// stays registered after a failed build so its status can be inspected;
    /// unload or reload it to recover.
    #[tracing::instrument(skip_all, fields(work_dir = %work_dir.display(), dataset = dataset_dir))]
    pub fn load(
        &self,
        work_dir: &Path,
        dataset_dir: &str,
        specs: SpecRegistry,
        cache_root: &Path,
    ) -> Result<u64> {
        let dataset_dir = paths::normalize_dataset_dir(dataset_dir)?;
        let key = DatasetKey::new(work_dir, dataset_dir.clone());
        if let Some(previous) = self.registry.remove(&key) {
            tracing::debug!("replacing loaded dataset");
            previous.close();
        }

        let default = DefaultIndex::create(
            &cache_root.join("default.redb"),
            self.config.fill_batch_size,
            self.config.status_throttle(),
            Some(self.status_hook(work_dir, &dataset_dir, IndexId::Default)),
        )?;
        let source = DatasetSource {
            work_dir: work_dir.to_owned(),
            dataset_dir,
            specs,
        };
        let dataset = Arc::new(Dataset::new(source, cache_root.to_owned(), default));
        self.registry.insert(key, Arc::clone(&dataset));
        dataset.default.build(&dataset.source)
    }

    /// Close every index of a dataset and forget it.
    ///
    /// # Errors
    /// [`Error::DatasetNotLoaded`].
    pub fn unload(&self, work_dir: &Path, dataset_dir: &str) -> Result<()> {
        let key = DatasetKey::new(work_dir, paths::normalize_dataset_dir(dataset_dir)?);
        let dataset = self.registry.remove(&key).ok_or_else(|| Error::DatasetNotLoaded {
            work_dir: key.work_dir.clone(),
            dataset_dir: key.dataset_dir.clone(),
        })?;
        dataset.close();
        tracing::debug!(work_dir = %work_dir.display(), dataset = %key.dataset_dir, "unloaded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Object reads
    // -----------------------------------------------------------------------

    /// Current data of `object_paths`, `None` for absent objects.
    ///
    /// Filled default-index entries are served from the index; everything
    /// else is read from the working tree. With `resolve_lfs`, every object
    /// is read from the working tree with LFS pointers resolved from the
    /// local object store.
    ///
    /// # Errors
    /// Invalid paths, an unloaded dataset, and read failures (including
    /// objects that exist but do not parse).
    pub fn get_object_dataset<S: AsRef<str>>(
        &self,
        work_dir: &Path,
        dataset_dir: &str,
        object_paths: &[S],
        resolve_lfs: bool,
    ) -> Result<BTreeMap<String, Option<ObjectData>>> {
        let dataset = self.dataset(work_dir, dataset_dir)?;
        let lfs = resolve_lfs.then(|| LocalObjectStore::for_work_dir(work_dir));
        let mut out = BTreeMap::new();
        for object_path in object_paths {
            let object_path = paths::normalize(object_path.as_ref())?;
            let value = match &lfs {
                Some(store) => object::read_object_cold(
                    &dataset.source.root(),
                    &object_path,
                    &dataset.source.specs,
                    Some(store as &dyn LfsResolver),
                )?,
                None => match dataset.default.get(&object_path)? {
                    Some(IndexedValue::Object(value)) => Some(value),
                    _ => dataset.source.read_cold(&object_path)?,
                },
            };
            out.insert(object_path, value);
        }
        Ok(out)
    }

    /// An object as of each of `commits`, positionally.
    ///
    /// # Errors
    /// [`Error::NoVersions`] when no commit has the object, unresolvable
    /// commits, and read failures.
    pub fn read_object_versions<S: AsRef<str>>(
        &self,
        work_dir: &Path,
        dataset_dir: &str,
        object_path: &str,
        commits: &[S],
    ) -> Result<Vec<Option<ObjectData>>> {
        let dataset = self.dataset(work_dir, dataset_dir)?;
        let object_path = paths::normalize(object_path)?;
        let repo = GixRepo::open(work_dir)?;
        let versions = commits
            .iter()
            .map(|commit| {
                object::read_object_at_version(
                    &repo,
                    &dataset.source.dataset_dir,
                    &object_path,
                    commit.as_ref(),
                    &dataset.source.specs,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        if versions.iter().all(Option::is_none) {
            return Err(Error::NoVersions {
                object_path,
                requested: commits.len(),
            });
        }
        Ok(versions)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Commit object changes to a loaded dataset.
    ///
    /// Unless `options.skip_validation` is set, the first change (in
    /// insertion order) whose expected old value differs from the working
    /// tree aborts the commit before anything is written, and comes back as
    /// [`CommitOutcome::Conflicted`]. After a commit the default index is
    /// refreshed for the touched objects, filtered indexes of the dataset are
    /// dropped, and [`WorkerEvent::ObjectsChanged`] is sent. If the refresh
    /// fails the event carries no paths, and the call still reports
    /// [`CommitOutcome::Committed`].
    ///
    /// # Errors
    /// Lock contention, an unloaded dataset, invalid paths, and commit
    /// failures (after which the touched paths are back at `HEAD`).
    #[tracing::instrument(skip_all, fields(work_dir = %work_dir.display(), dataset = dataset_dir, changes = changes.len()))]
    pub fn update_objects(
        &self,
        work_dir: &Path,
        dataset_dir: &str,
        changes: &ObjectChangeset,
        options: &CommitOptions,
    ) -> Result<CommitOutcome> {
        let dataset = self.dataset(work_dir, dataset_dir)?;
        let changes = normalized(changes)?;
        let _operation = self.begin(work_dir, "committing", options.fail_if_busy)?;
        let repo = GixRepo::open(work_dir)?;
        let outcome = commit::commit_objects(&repo, &dataset.source, &changes, options)?;
        if let CommitOutcome::Committed {
            changed_buffers, ..
        } = &outcome
        {
            self.buffers_changed(work_dir, changed_buffers);
        }
        Ok(outcome)
    }

    /// Commit buffer changes to a working copy. Conflict handling and index
    /// upkeep are as for [`update_objects`](Self::update_objects), applied to
    /// every loaded dataset the buffers fall in.
    ///
    /// # Errors
    /// Lock contention, invalid paths, and commit failures.
    #[tracing::instrument(skip_all, fields(work_dir = %work_dir.display(), changes = changes.len()))]
    pub fn update_buffers(
        &self,
        work_dir: &Path,
        changes: &BufferChangeset,
        options: &CommitOptions,
    ) -> Result<CommitOutcome> {
        let changes = normalized(changes)?;
        let _operation = self.begin(work_dir, "committing", options.fail_if_busy)?;
        let repo = GixRepo::open(work_dir)?;
        let outcome = commit::commit_buffers(&repo, &changes, options)?;
        if let CommitOutcome::Committed {
            changed_buffers, ..
        } = &outcome
        {
            self.buffers_changed(work_dir, changed_buffers);
        }
        Ok(outcome)
    }

    /// Refresh indexes of every dataset loaded from `work_dir` for objects
    /// that differ between commits `from` and `to`. Call after the working
    /// tree moved from one to the other, for example after a pull.
    ///
    /// # Errors
    /// Lock contention, unresolvable commits, and read failures.
    #[tracing::instrument(skip(self, work_dir), fields(work_dir = %work_dir.display()))]
    pub fn reindex_between(&self, work_dir: &Path, from: &str, to: &str) -> Result<()> {
        let _operation = self.begin(work_dir, "reindexing", false)?;
        let repo = GixRepo::open(work_dir)?;
        for dataset in self.registry.in_work_dir(work_dir) {
            let root = format!("/{}", dataset.source.dataset_dir);
            let changed = version::list_descendant_paths_at_version(
                &repo,
                &root,
                to,
                Some(VersionDiff {
                    against: from,
                    only_changed: true,
                }),
            )?;
            let object_paths: BTreeSet<String> = changed
                .into_iter()
                .filter_map(|(path, _)| dataset.source.specs.belongs_to_object(&path))
                .collect();
            self.objects_changed(&dataset, object_paths)?;
        }
        Ok(())
    }

    /// Create a git repository at `work_dir`.
    ///
    /// # Errors
    /// Lock contention and git failures.
    pub fn init_repository(&self, work_dir: &Path) -> Result<()> {
        let _operation = self.begin(work_dir, "initializing", true)?;
        GixRepo::init(work_dir)?;
        Ok(())
    }

    /// Index upkeep after a commit. The commit has already landed, so a
    /// failed refresh is logged and reported as "anything may have changed"
    /// instead of failing the call.
    fn buffers_changed(&self, work_dir: &Path, buffer_paths: &[String]) {
        for dataset in self.registry.in_work_dir(work_dir) {
            let prefix = format!("/{}", dataset.source.dataset_dir);
            let object_paths: BTreeSet<String> = buffer_paths
                .iter()
                .filter_map(|path| paths::strip_prefix(&prefix, path))
                .filter_map(|path| dataset.source.specs.belongs_to_object(&path))
                .collect();
            if let Err(error) = self.objects_changed(&dataset, object_paths) {
                tracing::warn!(
                    dataset = %dataset.source.dataset_dir,
                    %error,
                    "index refresh after commit failed"
                );
                dataset.invalidate_filtered();
                self.emit(WorkerEvent::ObjectsChanged {
                    work_dir: dataset.source.work_dir.clone(),
                    dataset_dir: dataset.source.dataset_dir.clone(),
                    object_paths: None,
                });
            }
        }
    }

    fn objects_changed(&self, dataset: &Dataset, object_paths: BTreeSet<String>) -> Result<()> {
        if object_paths.is_empty() {
            return Ok(());
        }
        let object_paths: Vec<String> = object_paths.into_iter().collect();
        dataset.default.refresh(&dataset.source, &object_paths)?;
        dataset.invalidate_filtered();
        self.emit(WorkerEvent::ObjectsChanged {
            work_dir: dataset.source.work_dir.clone(),
            dataset_dir: dataset.source.dataset_dir.clone(),
            object_paths: Some(object_paths),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    /// The filtered index for `expression`, built on first request.
    ///
    /// Indexes are memoized by the exact expression text. A request for an
    /// existing index returns at once, even while it is still building. A
    /// failed build is forgotten so the next request starts over.
    ///
    /// # Errors
    /// An unloaded dataset, predicate compile errors, storage failures, and
    /// predicate evaluation errors during the build.
    #[tracing::instrument(skip(self, work_dir), fields(work_dir = %work_dir.display()))]
    pub fn get_or_create_filtered_index(
        &self,
        work_dir: &Path,
        dataset_dir: &str,
        expression: &str,
    ) -> Result<IndexId> {
        let dataset = self.dataset(work_dir, dataset_dir)?;
        let id = IndexId::Filtered(expression.to_owned());
        let index = {
            let mut filtered = dataset.filtered();
            if filtered.contains_key(expression) {
                return Ok(id);
            }
            let index = Arc::new(FilteredIndex::create(
                expression,
                &filtered::index_path(&dataset.cache_root, expression),
                self.config.fill_batch_size,
                self.config.status_throttle(),
                Some(self.status_hook(work_dir, &dataset.source.dataset_dir, id.clone())),
            )?);
            filtered.insert(expression.to_owned(), Arc::clone(&index));
            index
        };

        if let Err(e) = index.build(&dataset.default) {
            let mut filtered = dataset.filtered();
            if filtered
                .get(expression)
                .is_some_and(|current| Arc::ptr_eq(current, &index))
            {
                filtered.remove(expression);
            }
            drop(filtered);
            index.destroy();
            return Err(e);
        }
        Ok(id)
    }

    /// Status of an index now, plus its later updates.
    ///
    /// # Errors
    /// An unloaded dataset or an unknown index.
    pub fn describe_index(&self, work_dir: &Path, dataset_dir: &str, id: &IndexId) -> Result<StatusStream> {
        let dataset = self.dataset(work_dir, dataset_dir)?;
        match id {
            IndexId::Default => Ok(dataset.default.status().subscribe()),
            IndexId::Filtered(expression) => Ok(filtered_index(&dataset, id, expression)?
                .status()
                .subscribe()),
        }
    }

    /// Object path at `position` of a filtered index, `None` past the end.
    ///
    /// # Errors
    /// [`IndexError::NotPositional`] for the default index, an unloaded
    /// dataset, an unknown index, and storage failures.
    pub fn get_indexed_object(
        &self,
        work_dir: &Path,
        dataset_dir: &str,
        id: &IndexId,
        position: u64,
    ) -> Result<Option<String>> {
        let dataset = self.dataset(work_dir, dataset_dir)?;
        match id {
            IndexId::Default => Err(IndexError::NotPositional.into()),
            IndexId::Filtered(expression) => {
                Ok(filtered_index(&dataset, id, expression)?.object_path_at(position)?)
            }
        }
    }

    /// What the working copy is doing.
    #[must_use]
    pub fn repository_status(&self, work_dir: &Path) -> RepoStatus {
        self.locks.status(work_dir)
    }
}

fn filtered_index(dataset: &Dataset, id: &IndexId, expression: &str) -> Result<Arc<FilteredIndex>> {
    dataset.filtered().get(expression).cloned().ok_or_else(|| {
        IndexError::Unknown {
            id: id.clone(),
            dataset_dir: dataset.source.dataset_dir.clone(),
        }
        .into()
    })
}

fn normalized<T: Clone>(changes: &Changeset<T>) -> Result<Changeset<T>> {
    let mut out = Changeset::new();
    for (path, change) in changes.iter() {
        out.insert(
            paths::normalize(path)?,
            change.old_value.clone(),
            change.new_value.clone(),
        );
    }
    Ok(out)
}
