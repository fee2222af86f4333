//! Conflict-aware commits of object and buffer changesets.
//!
//! A commit runs in phases:
//!
//! 1. **Validate**: compare each change's expected old value with what is in
//!    the working tree now, in changeset order, and stop at the first
//!    difference. A conflict aborts before anything is written.
//! 2. **Write**: apply the buffer writes to the working tree, one atomic
//!    file replacement each.
//! 3. **Stage**: write blobs, build the new tree from `HEAD`'s, and update
//!    the git index for the touched paths.
//! 4. **Check**: dry-run the commit preconditions (author, message).
//! 5. **Commit**: create the commit and advance the branch `HEAD` points to.
//!
//! Any failure in phases 2 to 5 puts the touched files back to the bytes
//! they had before the call and resets their index entries to `HEAD`, then
//! returns the error.

use std::collections::BTreeMap;

use folio_git::{EntryMode, GitOid, GitRepo, IndexEntry, Signature, TreeEdit};

use crate::buffer::{self, BufferWrite};
use crate::diff::{self, ChangeStatus};
use crate::error::{Error, Result};
use crate::index::DatasetSource;
use crate::object::{self, ObjectData};
use crate::paths;

// ---------------------------------------------------------------------------
// Changesets
// ---------------------------------------------------------------------------

/// One change: the value the caller last saw and the value to write. `None`
/// on either side means absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change<T> {
    pub old_value: Option<T>,
    pub new_value: Option<T>,
}

/// Changes keyed by path, in insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Changeset<T> {
    entries: Vec<(String, Change<T>)>,
}

impl<T> Default for Changeset<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Changeset<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a change. A path already present keeps its position and takes the
    /// new change.
    pub fn insert(&mut self, path: impl Into<String>, old_value: Option<T>, new_value: Option<T>) {
        let path = path.into();
        let change = Change {
            old_value,
            new_value,
        };
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some((_, existing)) => *existing = change,
            None => self.entries.push((path, change)),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, old_value: Option<T>, new_value: Option<T>) -> Self {
        self.insert(path, old_value, new_value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change<T>)> {
        self.entries.iter().map(|(path, change)| (path.as_str(), change))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(path, _)| path.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Object changes, keyed by object path.
pub type ObjectChangeset = Changeset<ObjectData>;

/// Buffer changes, keyed by buffer path.
pub type BufferChangeset = Changeset<Vec<u8>>;

/// Conflicting paths and how the working tree differs from what the caller
/// expected (going from expected to actual).
pub type Conflicts = BTreeMap<String, ChangeStatus>;

/// Author, message and validation switch for one commit.
#[derive(Clone, Debug)]
pub struct CommitOptions {
    pub author: Signature,
    pub message: String,
    /// Write even when the working tree differs from the expected old
    /// values.
    pub skip_validation: bool,
    /// Fail with [`Error::Busy`] instead of queuing when another operation
    /// holds the working copy.
    pub fail_if_busy: bool,
}

impl CommitOptions {
    pub fn new(author: Signature, message: impl Into<String>) -> Self {
        Self {
            author,
            message: message.into(),
            skip_validation: false,
            fail_if_busy: false,
        }
    }

    #[must_use]
    pub fn skipping_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    #[must_use]
    pub fn failing_if_busy(mut self) -> Self {
        self.fail_if_busy = true;
        self
    }
}

/// Result of a commit attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The changes are committed.
    Committed {
        commit: GitOid,
        /// Buffer paths written or deleted, relative to the working copy.
        changed_buffers: Vec<String>,
    },
    /// Nothing was written.
    Conflicted(Conflicts),
}

impl CommitOutcome {
    #[must_use]
    pub const fn commit(&self) -> Option<GitOid> {
        match self {
            Self::Committed { commit, .. } => Some(*commit),
            Self::Conflicted(_) => None,
        }
    }

    #[must_use]
    pub const fn conflicts(&self) -> Option<&Conflicts> {
        match self {
            Self::Committed { .. } => None,
            Self::Conflicted(conflicts) => Some(conflicts),
        }
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// First path, in changeset order, whose current value differs from the
/// change's expected old value.
///
/// `current` reads the value in the working tree now. A path absent both in
/// the expectation and on disk cannot conflict and is passed over.
///
/// # Errors
/// Whatever `current` returns.
pub fn first_conflict<T, R, Q>(
    changes: &Changeset<T>,
    mut current: R,
    eq: Q,
) -> Result<Option<(String, ChangeStatus)>>
where
    T: Clone,
    R: FnMut(&str) -> Result<Option<T>>,
    Q: Fn(&T, &T) -> bool,
{
    let expected: BTreeMap<&str, &Option<T>> = changes
        .iter()
        .map(|(path, change)| (path, &change.old_value))
        .collect();
    let paths = changes.paths().map(str::to_owned);
    let reader = |path: &str| -> Result<(Option<T>, Option<T>)> {
        let old = expected.get(path).and_then(|v| (*v).clone());
        Ok((old, current(path)?))
    };
    for item in diff::diff(paths, reader, eq, false) {
        match item {
            Ok(conflict) => return Ok(Some(conflict)),
            Err(Error::AbsentOnBothSides { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// First conflicting object of `changes` against cold reads of `source`.
///
/// # Errors
/// Read failures, including objects that exist but do not parse.
pub fn first_object_conflict(
    source: &DatasetSource,
    changes: &ObjectChangeset,
) -> Result<Option<(String, ChangeStatus)>> {
    first_conflict(changes, |path| source.read_cold(path), diff::objects_equal)
}

/// First conflicting buffer of `changes` against the working tree.
///
/// # Errors
/// Read failures.
pub fn first_buffer_conflict(
    work_dir: &std::path::Path,
    changes: &BufferChangeset,
) -> Result<Option<(String, ChangeStatus)>> {
    first_conflict(
        changes,
        |path| buffer::read_buffer(work_dir, path),
        |a: &Vec<u8>, b: &Vec<u8>| diff::buffers_equal(a, b),
    )
}

// ---------------------------------------------------------------------------
// Objects to buffers
// ---------------------------------------------------------------------------

/// Buffer writes that turn the working tree's objects into the changeset's
/// new values.
///
/// New values are serialized by their specs. Buffers an object has on disk
/// that its new serialization no longer produces are deleted, as are all
/// buffers of objects whose new value is `None`.
///
/// # Errors
/// An object path without a spec, a spec refusing an object, and walk
/// failures.
pub fn object_buffer_writes(
    source: &DatasetSource,
    changes: &ObjectChangeset,
) -> Result<Vec<BufferWrite>> {
    let new_values = changes
        .iter()
        .filter_map(|(path, change)| change.new_value.as_ref().map(|value| (path, value)));
    let serialized = object::to_buffer_dataset(&source.dataset_dir, new_values, &source.specs)?;

    let mut writes = Vec::new();
    for object_path in changes.paths() {
        source.specs.require(object_path)?;
        let object_buffer_path = paths::dataset_buffer_path(&source.dataset_dir, object_path);
        let object_root = paths::to_fs_path(&source.root(), object_path);
        for relative in buffer::list_descendant_paths(&object_root)? {
            let buffer_path = paths::join(&object_buffer_path, &relative?);
            if !serialized.contains_key(&buffer_path) {
                writes.push(BufferWrite::delete(buffer_path));
            }
        }
    }
    writes.extend(
        serialized
            .into_iter()
            .map(|(path, bytes)| BufferWrite::put(path, bytes)),
    );
    Ok(writes)
}

/// Buffer writes of a buffer changeset, in changeset order.
#[must_use]
pub fn buffer_writes(changes: &BufferChangeset) -> Vec<BufferWrite> {
    changes
        .iter()
        .map(|(path, change)| BufferWrite {
            path: path.to_owned(),
            new_value: change.new_value.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Write, stage, check, commit
// ---------------------------------------------------------------------------

/// Write `writes` to the working tree of `repo` and commit them.
///
/// Returns the new commit. An empty `writes` still produces a commit with
/// `HEAD`'s tree.
///
/// # Errors
/// I/O, object store and index failures, and
/// [`GitError::InvalidCommit`](folio_git::GitError::InvalidCommit) from the
/// precondition check. On failure the touched files get back the bytes they
/// had before the call, uncommitted edits included, and their index entries
/// are reset to `HEAD`.
pub fn commit_buffer_writes(
    repo: &dyn GitRepo,
    writes: &[BufferWrite],
    message: &str,
    author: &Signature,
) -> Result<GitOid> {
    let work_dir = repo
        .workdir()
        .ok_or_else(|| Error::invalid_path("/", "repository has no working tree"))?
        .to_path_buf();

    let snapshot = snapshot_buffers(&work_dir, writes)?;
    let result = write_and_commit(repo, &work_dir, writes, message, author);
    if let Err(e) = &result {
        tracing::warn!(
            work_dir = %work_dir.display(),
            buffers = writes.len(),
            "commit failed, restoring touched paths: {e}"
        );
        if let Err(restore_error) = restore_buffers(repo, &work_dir, &snapshot) {
            tracing::error!(
                work_dir = %work_dir.display(),
                "could not restore touched paths: {restore_error}"
            );
        }
    }
    result
}

/// Current working-tree content of every path `writes` touches, as writes
/// that would put it back.
fn snapshot_buffers(
    work_dir: &std::path::Path,
    writes: &[BufferWrite],
) -> Result<Vec<BufferWrite>> {
    writes
        .iter()
        .map(|w| {
            Ok(BufferWrite {
                path: w.path.clone(),
                new_value: buffer::read_buffer(work_dir, &w.path)?,
            })
        })
        .collect()
}

fn write_and_commit(
    repo: &dyn GitRepo,
    work_dir: &std::path::Path,
    writes: &[BufferWrite],
    message: &str,
    author: &Signature,
) -> Result<GitOid> {
    buffer::apply_changeset(work_dir, writes)?;
    tracing::debug!(buffers = writes.len(), "wrote buffers");

    let head = repo.rev_parse_opt("HEAD")?;
    let base_tree = match head {
        Some(commit) => repo.read_commit(commit)?.tree_oid,
        None => repo.write_tree(&[])?,
    };
    let tree = stage(repo, base_tree, writes)?;
    tracing::debug!(%tree, "staged");

    repo.validate_commit(message, author)?;

    let head_ref = repo.head_ref()?;
    let parents: Vec<GitOid> = head.into_iter().collect();
    let commit = repo.create_commit(tree, &parents, message, author, head_ref.as_ref())?;
    tracing::info!(%commit, buffers = writes.len(), "committed");
    Ok(commit)
}

fn stage(repo: &dyn GitRepo, base_tree: GitOid, writes: &[BufferWrite]) -> Result<GitOid> {
    let mut edits = Vec::with_capacity(writes.len());
    let mut index: BTreeMap<String, IndexEntry> = repo
        .read_index()?
        .into_iter()
        .map(|entry| (entry.path.clone(), entry))
        .collect();

    for write in writes {
        let path = paths::to_git_path(&write.path).to_owned();
        match &write.new_value {
            Some(content) => {
                let mode = match repo.entry_at_path(base_tree, &path)? {
                    Some(entry) if entry.mode == EntryMode::BlobExecutable => entry.mode,
                    _ => EntryMode::Blob,
                };
                let oid = repo.write_blob(content)?;
                index.insert(
                    path.clone(),
                    IndexEntry {
                        path: path.clone(),
                        mode,
                        oid,
                    },
                );
                edits.push(TreeEdit::Upsert { path, mode, oid });
            }
            None => {
                index.remove(&path);
                edits.push(TreeEdit::Remove { path });
            }
        }
    }

    let tree = repo.edit_tree(base_tree, &edits)?;
    let entries: Vec<IndexEntry> = index.into_values().collect();
    repo.write_index(&entries)?;
    Ok(tree)
}

/// Put the working-tree files in `snapshot` back to the recorded bytes and
/// reset their index entries to `HEAD`. Paths `HEAD` does not have leave the
/// index.
///
/// # Errors
/// I/O and index failures. Restoration stops at the first.
pub fn restore_buffers(
    repo: &dyn GitRepo,
    work_dir: &std::path::Path,
    snapshot: &[BufferWrite],
) -> Result<()> {
    buffer::apply_changeset(work_dir, snapshot)?;
    let git_paths: Vec<String> = snapshot
        .iter()
        .map(|w| paths::to_git_path(&w.path).to_owned())
        .collect();
    repo.reset_index_paths(&git_paths)?;
    tracing::debug!(paths = snapshot.len(), "restored touched paths");
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// Validate, serialize and commit object changes to one dataset.
///
/// # Errors
/// See [`object_buffer_writes`] and [`commit_buffer_writes`]. Conflicts are
/// an [`CommitOutcome::Conflicted`] result, not an error.
pub fn commit_objects(
    repo: &dyn GitRepo,
    source: &DatasetSource,
    changes: &ObjectChangeset,
    options: &CommitOptions,
) -> Result<CommitOutcome> {
    if !options.skip_validation
        && let Some((path, status)) = first_object_conflict(source, changes)?
    {
        tracing::info!(dataset = %source.dataset_dir, %path, %status, "object conflict");
        return Ok(CommitOutcome::Conflicted(Conflicts::from([(path, status)])));
    }
    let writes = object_buffer_writes(source, changes)?;
    let commit = commit_buffer_writes(repo, &writes, &options.message, &options.author)?;
    Ok(CommitOutcome::Committed {
        commit,
        changed_buffers: writes.into_iter().map(|w| w.path).collect(),
    })
}

/// Validate and commit buffer changes to the working tree of `repo`.
///
/// # Errors
/// See [`commit_buffer_writes`].
pub fn commit_buffers(
    repo: &dyn GitRepo,
    changes: &BufferChangeset,
    options: &CommitOptions,
) -> Result<CommitOutcome> {
    let work_dir = repo
        .workdir()
        .ok_or_else(|| Error::invalid_path("/", "repository has no working tree"))?;
    if !options.skip_validation
        && let Some((path, status)) = first_buffer_conflict(work_dir, changes)?
    {
        tracing::info!(%path, %status, "buffer conflict");
        return Ok(CommitOutcome::Conflicted(Conflicts::from([(path, status)])));
    }
    let writes = buffer_writes(changes);
    let commit = commit_buffer_writes(repo, &writes, &options.message, &options.author)?;
    Ok(CommitOutcome::Committed {
        commit,
        changed_buffers: writes.into_iter().map(|w| w.path).collect(),
    })
}
