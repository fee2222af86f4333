//! The gix-backed implementation of [`GitRepo`].

use std::path::{Path, PathBuf};

use crate::error::GitError;
use crate::repo::GitRepo;
use crate::types::{CommitInfo, GitOid, IndexEntry, RefName, Signature, TreeEdit, TreeEntry};

/// A [`GitRepo`] implementation backed by [gix](https://github.com/GitoxideLabs/gitoxide).
///
/// Construct via [`GixRepo::open`], [`GixRepo::open_at`] or [`GixRepo::init`].
/// Cheap enough to open per operation; it is not shared between threads.
pub struct GixRepo {
    pub(crate) repo: gix::Repository,
    pub(crate) workdir: Option<PathBuf>,
}

impl GixRepo {
    /// Open the git repository at or above `path`.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = gix::open(path).map_err(GitError::backend)?;
        Ok(Self::wrap(repo))
    }

    /// Open a git repository at exactly `path`, ignoring global and system
    /// configuration.
    pub fn open_at(path: &Path) -> Result<Self, GitError> {
        let repo =
            gix::open_opts(path, gix::open::Options::isolated()).map_err(GitError::backend)?;
        Ok(Self::wrap(repo))
    }

    /// Create a new non-bare repository with an unborn `HEAD` at `path`.
    pub fn init(path: &Path) -> Result<Self, GitError> {
        std::fs::create_dir_all(path)?;
        let repo = gix::init(path).map_err(GitError::backend)?;
        tracing::debug!(path = %path.display(), "initialized repository");
        Ok(Self::wrap(repo))
    }

    fn wrap(repo: gix::Repository) -> Self {
        let workdir = repo.workdir().map(Path::to_path_buf);
        Self { repo, workdir }
    }
}

impl GitRepo for GixRepo {
    fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    // === Refs ===
    fn head_ref(&self) -> Result<Option<RefName>, GitError> {
        crate::refs_impl::head_ref(self)
    }

    fn write_ref(&self, name: &RefName, oid: GitOid, log_message: &str) -> Result<(), GitError> {
        crate::refs_impl::write_ref(self, name, oid, log_message)
    }

    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError> {
        crate::refs_impl::rev_parse(self, spec)
    }

    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError> {
        crate::refs_impl::rev_parse_opt(self, spec)
    }

    // === Object read ===
    fn read_blob(&self, oid: GitOid) -> Result<Vec<u8>, GitError> {
        crate::objects_impl::read_blob(self, oid)
    }

    fn read_tree(&self, oid: GitOid) -> Result<Vec<TreeEntry>, GitError> {
        crate::objects_impl::read_tree(self, oid)
    }

    fn read_commit(&self, oid: GitOid) -> Result<CommitInfo, GitError> {
        crate::objects_impl::read_commit(self, oid)
    }

    fn entry_at_path(&self, tree: GitOid, path: &str) -> Result<Option<TreeEntry>, GitError> {
        crate::objects_impl::entry_at_path(self, tree, path)
    }

    // === Object write ===
    fn write_blob(&self, data: &[u8]) -> Result<GitOid, GitError> {
        crate::objects_impl::write_blob(self, data)
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<GitOid, GitError> {
        crate::objects_impl::write_tree(self, entries)
    }

    fn validate_commit(&self, message: &str, author: &Signature) -> Result<(), GitError> {
        crate::objects_impl::validate_commit(message, author)
    }

    fn create_commit(
        &self,
        tree: GitOid,
        parents: &[GitOid],
        message: &str,
        author: &Signature,
        update_ref: Option<&RefName>,
    ) -> Result<GitOid, GitError> {
        crate::objects_impl::create_commit(self, tree, parents, message, author, update_ref)
    }

    // === Tree editing ===
    fn edit_tree(&self, base: GitOid, edits: &[TreeEdit]) -> Result<GitOid, GitError> {
        crate::objects_impl::edit_tree(self, base, edits)
    }

    // === Index ===
    fn read_index(&self) -> Result<Vec<IndexEntry>, GitError> {
        crate::index_impl::read_index(self)
    }

    fn write_index(&self, entries: &[IndexEntry]) -> Result<(), GitError> {
        crate::index_impl::write_index(self, entries)
    }

    fn reset_index_paths(&self, paths: &[String]) -> Result<(), GitError> {
        crate::index_impl::reset_index_paths(self, paths)
    }
}
