//! Advisory locks on a working copy.
//!
//! A [`WorktreeLock`] holds `<resource>.lock` for as long as it lives, using
//! the same lock-file protocol git uses for refs. Dropping it releases the
//! lock. Threads and processes contend on the same file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gix::lock::acquire::Fail;

use crate::error::GitError;

/// How long [`WorktreeLock::acquire`] waits for a held lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockWait {
    /// Fail at once if another holder exists.
    Immediately,
    /// Retry with backoff until the duration has passed.
    Timeout(Duration),
}

impl From<LockWait> for Fail {
    fn from(wait: LockWait) -> Self {
        match wait {
            LockWait::Immediately => Self::Immediately,
            LockWait::Timeout(d) => Self::AfterDurationWithBackoff(d),
        }
    }
}

/// A held lock on `resource`. Released on drop.
#[derive(Debug)]
pub struct WorktreeLock {
    resource: PathBuf,
    _marker: gix::lock::Marker,
}

impl WorktreeLock {
    /// Acquire the lock guarding `resource`, creating its parent directory
    /// when missing.
    ///
    /// # Errors
    /// Returns [`GitError::Locked`] when another holder keeps the lock past
    /// `wait`, or [`GitError::IoError`] when the parent cannot be created.
    pub fn acquire(resource: &Path, wait: LockWait) -> Result<Self, GitError> {
        if let Some(parent) = resource.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let marker = gix::lock::Marker::acquire_to_hold_resource(resource, wait.into(), None)
            .map_err(|e| GitError::Locked {
                path: resource.to_owned(),
                message: e.to_string(),
            })?;
        tracing::trace!(resource = %resource.display(), "lock acquired");
        Ok(Self {
            resource: resource.to_owned(),
            _marker: marker,
        })
    }

    /// The resource this lock guards.
    #[must_use]
    pub fn resource(&self) -> &Path {
        &self.resource
    }
}

impl Drop for WorktreeLock {
    fn drop(&mut self) {
        tracing::trace!(resource = %self.resource.display(), "lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("state").join("worker");
        let first = WorktreeLock::acquire(&resource, LockWait::Immediately).unwrap();
        let err = WorktreeLock::acquire(&resource, LockWait::Immediately).unwrap_err();
        assert!(matches!(err, GitError::Locked { .. }), "{err}");
        drop(first);
        WorktreeLock::acquire(&resource, LockWait::Immediately).unwrap();
    }

    #[test]
    fn waiting_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("worker");
        let _held = WorktreeLock::acquire(&resource, LockWait::Immediately).unwrap();
        let err =
            WorktreeLock::acquire(&resource, LockWait::Timeout(Duration::from_millis(50)))
                .unwrap_err();
        assert!(matches!(err, GitError::Locked { .. }));
    }
}
