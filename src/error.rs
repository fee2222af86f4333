//! Error type shared by the folio library.
//!
//! Each layer has its own error enum ([`ObjectError`], [`IndexError`],
//! [`QueryError`], plus [`GitError`] and [`LfsError`] from the sibling crates).
//! [`Error`] wraps them all so worker operations return one type, and adds
//! the variants that only make sense at the worker boundary.

use std::path::PathBuf;
use std::time::Duration;

use folio_git::GitError;
use folio_lfs::LfsError;
use thiserror::Error;

use crate::index::IndexError;
use crate::object::ObjectError;
use crate::query::QueryError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by folio operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Lfs(#[from] LfsError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Query(#[from] QueryError),

    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A slash path could not be used (empty segment, `..`, and so on).
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath {
        /// The offending path as given.
        path: String,
        /// Why it was refused.
        reason: String,
    },

    /// No dataset is registered under this working copy and directory.
    #[error("dataset `{dataset_dir}` in {} is not loaded", work_dir.display())]
    DatasetNotLoaded {
        /// Working copy root.
        work_dir: PathBuf,
        /// Dataset directory relative to the working copy.
        dataset_dir: String,
    },

    /// The working copy is locked by another operation and the caller asked
    /// not to wait.
    #[error("working copy {} is busy", work_dir.display())]
    Busy {
        /// Working copy root.
        work_dir: PathBuf,
    },

    /// Waiting for the working copy lock took longer than allowed.
    #[error("timed out after {waited:?} waiting for the lock on {}", work_dir.display())]
    LockTimeout {
        /// Working copy root.
        work_dir: PathBuf,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Too many operations are already queued on the working copy.
    #[error("too many operations queued on {} (limit {limit})", work_dir.display())]
    TooManyWaiters {
        /// Working copy root.
        work_dir: PathBuf,
        /// Configured queue bound.
        limit: usize,
    },

    /// Neither of the requested commits has a version of the object.
    #[error("`{object_path}` exists at none of the {requested} requested commits")]
    NoVersions {
        /// Object path relative to the dataset root.
        object_path: String,
        /// Number of commits asked about.
        requested: usize,
    },

    /// A comparison was asked to classify a path that is absent on both
    /// sides.
    #[error("`{path}` is absent in both snapshots")]
    AbsentOnBothSides {
        /// The path being compared.
        path: String,
    },

    /// `.folio/config.toml` could not be loaded.
    #[error("config error in {}: {message}", path.display())]
    Config {
        /// The config file.
        path: PathBuf,
        /// Parser or I/O message, with a line number when available.
        message: String,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` when the error means "someone else holds the working
    /// copy", as opposed to a failure of the operation itself.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::LockTimeout { .. } | Self::TooManyWaiters { .. }
        )
    }
}
