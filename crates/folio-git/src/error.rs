//! Error types for git operations.
//!
//! [`GitError`] is the single error type returned by all [`GitRepo`](crate::GitRepo) trait
//! methods. Callers match on the variant (missing object, invalid identity,
//! backend failure) instead of parsing messages.

use thiserror::Error;

/// Errors returned by [`GitRepo`](crate::GitRepo) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A requested object, ref, or path was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// An OID string could not be parsed or was otherwise invalid.
    #[error("invalid OID `{value}`: {reason}")]
    InvalidOid {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// A commit was refused because its author or message is unusable.
    #[error("invalid commit: {message}")]
    InvalidCommit {
        /// Which precondition failed.
        message: String,
    },

    /// An advisory lock on the working copy could not be taken.
    #[error("could not lock {}: {message}", path.display())]
    Locked {
        /// The resource the lock guards.
        path: std::path::PathBuf,
        /// Why acquisition failed.
        message: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The underlying git backend returned an unclassified error.
    #[error("git backend error: {message}")]
    BackendError {
        /// Freeform error description from the backend.
        message: String,
    },
}

impl GitError {
    /// Returns `true` for [`GitError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn backend(e: impl std::fmt::Display) -> Self {
        Self::BackendError {
            message: e.to_string(),
        }
    }
}
