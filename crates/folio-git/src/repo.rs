//! The [`GitRepo`] trait: the boundary between the dataset engine and git.
//!
//! The trait is object-safe so callers can hold `&dyn GitRepo` or
//! `Box<dyn GitRepo>`; tests may substitute a double.
//!
//! | Group        | Methods                                               |
//! |--------------|-------------------------------------------------------|
//! | Refs         | `head_ref`, `write_ref`, `rev_parse`, `rev_parse_opt` |
//! | Object read  | `read_blob`, `read_tree`, `read_commit`, `entry_at_path` |
//! | Object write | `write_blob`, `write_tree`, `create_commit`           |
//! | Tree editing | `edit_tree`                                           |
//! | Index        | `read_index`, `write_index`, `reset_index_paths`      |

use std::path::Path;

use crate::error::GitError;
use crate::types::{CommitInfo, GitOid, IndexEntry, RefName, Signature, TreeEdit, TreeEntry};

/// The git abstraction trait used by the dataset engine.
pub trait GitRepo {
    /// Root of the working tree, or `None` for a bare repository.
    fn workdir(&self) -> Option<&Path>;

    // -----------------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------------

    /// The ref `HEAD` points to (`refs/heads/main`), even if that branch is
    /// unborn. `None` when `HEAD` is detached.
    fn head_ref(&self) -> Result<Option<RefName>, GitError>;

    /// Create or overwrite a ref unconditionally.
    fn write_ref(&self, name: &RefName, oid: GitOid, log_message: &str) -> Result<(), GitError>;

    /// Resolve a revision specification (`HEAD`, a hex hash, `main~2`).
    ///
    /// Returns [`GitError::NotFound`] if the spec cannot be resolved.
    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError>;

    /// Like [`rev_parse`](Self::rev_parse) but returns `None` when the spec
    /// cannot be resolved (unborn `HEAD`, unknown ref).
    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError>;

    // -----------------------------------------------------------------------
    // Object read
    // -----------------------------------------------------------------------

    /// Read the contents of a blob object.
    fn read_blob(&self, oid: GitOid) -> Result<Vec<u8>, GitError>;

    /// Read the entries of a tree object (one level, not recursive).
    fn read_tree(&self, oid: GitOid) -> Result<Vec<TreeEntry>, GitError>;

    /// Read a commit object's metadata.
    fn read_commit(&self, oid: GitOid) -> Result<CommitInfo, GitError>;

    /// Look up the entry at a slash-separated `path` below `tree`.
    ///
    /// Returns `None` when any segment is missing or an intermediate entry
    /// is not a tree.
    fn entry_at_path(&self, tree: GitOid, path: &str) -> Result<Option<TreeEntry>, GitError>;

    // -----------------------------------------------------------------------
    // Object write
    // -----------------------------------------------------------------------

    /// Write a blob to the object store and return its OID.
    fn write_blob(&self, data: &[u8]) -> Result<GitOid, GitError>;

    /// Write a tree object from a list of entries and return its OID.
    fn write_tree(&self, entries: &[TreeEntry]) -> Result<GitOid, GitError>;

    /// Check that a commit with this author and message would be accepted,
    /// without writing anything.
    fn validate_commit(&self, message: &str, author: &Signature) -> Result<(), GitError>;

    /// Create a commit object authored and committed by `author`, and
    /// optionally point `update_ref` at it.
    fn create_commit(
        &self,
        tree: GitOid,
        parents: &[GitOid],
        message: &str,
        author: &Signature,
        update_ref: Option<&RefName>,
    ) -> Result<GitOid, GitError>;

    // -----------------------------------------------------------------------
    // Tree editing
    // -----------------------------------------------------------------------

    /// Apply a set of edits to an existing tree and return the new tree's OID.
    /// Pass the empty tree OID (see [`write_tree`](Self::write_tree) with no
    /// entries) to build from scratch.
    fn edit_tree(&self, base: GitOid, edits: &[TreeEdit]) -> Result<GitOid, GitError>;

    // -----------------------------------------------------------------------
    // Index
    // -----------------------------------------------------------------------

    /// Read the current index entries. A missing index file reads as empty.
    fn read_index(&self) -> Result<Vec<IndexEntry>, GitError>;

    /// Replace the index with the given entries.
    fn write_index(&self, entries: &[IndexEntry]) -> Result<(), GitError>;

    /// Reset the index entries of `paths` to their state in `HEAD`
    /// (`git reset HEAD -- <paths>`). Paths absent from `HEAD` are dropped
    /// from the index.
    fn reset_index_paths(&self, paths: &[String]) -> Result<(), GitError>;
}
