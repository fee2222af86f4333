//! Per-working-copy serialization of mutating operations.
//!
//! Threads of one process queue on an in-memory slot per working copy,
//! bounded by `max_waiters` and `timeout`. The holder then also takes the
//! advisory file lock `<work_dir>/.folio/worker.lock`, so separate
//! processes exclude each other too.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use folio_git::{GitError, LockWait, WorktreeLock};

use super::events::RepoStatus;
use crate::config::STATE_DIR;
use crate::error::{Error, Result};

#[derive(Default)]
struct SlotState {
    operation: Option<String>,
    waiters: usize,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    released: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        self.lock().operation = None;
        self.released.notify_one();
    }
}

/// Keyed lock over working copies.
pub struct RepoLocks {
    slots: Mutex<HashMap<PathBuf, Arc<Slot>>>,
    max_waiters: usize,
    timeout: Duration,
}

/// Proof of holding a working copy. Released on drop.
pub struct RepoGuard {
    // Dropped before the slot is released.
    file: Option<WorktreeLock>,
    slot: Arc<Slot>,
}

impl Drop for RepoGuard {
    fn drop(&mut self) {
        drop(self.file.take());
        self.slot.release();
    }
}

impl RepoLocks {
    #[must_use]
    pub fn new(max_waiters: usize, timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_waiters,
            timeout,
        }
    }

    fn slot(&self, work_dir: &Path) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(work_dir.to_owned()).or_default())
    }

    /// What the working copy is doing.
    #[must_use]
    pub fn status(&self, work_dir: &Path) -> RepoStatus {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(work_dir)
            .and_then(|slot| slot.lock().operation.clone())
            .map_or(RepoStatus::Ready, |operation| RepoStatus::Busy { operation })
    }

    /// Take the working copy for `operation`.
    ///
    /// With `fail_if_busy`, a held lock fails at once instead of queuing.
    ///
    /// # Errors
    /// [`Error::Busy`], [`Error::TooManyWaiters`] and [`Error::LockTimeout`].
    pub fn acquire(&self, work_dir: &Path, operation: &str, fail_if_busy: bool) -> Result<RepoGuard> {
        let started = Instant::now();
        let slot = self.slot(work_dir);
        {
            let mut state = slot.lock();
            if state.operation.is_some() {
                if fail_if_busy {
                    return Err(Error::Busy {
                        work_dir: work_dir.to_owned(),
                    });
                }
                if state.waiters >= self.max_waiters {
                    return Err(Error::TooManyWaiters {
                        work_dir: work_dir.to_owned(),
                        limit: self.max_waiters,
                    });
                }
                state.waiters += 1;
                while state.operation.is_some() {
                    let remaining = self.timeout.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        state.waiters -= 1;
                        return Err(Error::LockTimeout {
                            work_dir: work_dir.to_owned(),
                            waited: started.elapsed(),
                        });
                    }
                    state = slot
                        .released
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                state.waiters -= 1;
            }
            state.operation = Some(operation.to_owned());
        }

        let wait = if fail_if_busy {
            LockWait::Immediately
        } else {
            LockWait::Timeout(self.timeout.saturating_sub(started.elapsed()))
        };
        let resource = work_dir.join(STATE_DIR).join("worker");
        match WorktreeLock::acquire(&resource, wait) {
            Ok(file) => {
                tracing::debug!(work_dir = %work_dir.display(), operation, "working copy acquired");
                Ok(RepoGuard {
                    file: Some(file),
                    slot,
                })
            }
            Err(e) => {
                slot.release();
                Err(match e {
                    GitError::Locked { .. } if fail_if_busy => Error::Busy {
                        work_dir: work_dir.to_owned(),
                    },
                    GitError::Locked { .. } => Error::LockTimeout {
                        work_dir: work_dir.to_owned(),
                        waited: started.elapsed(),
                    },
                    other => other.into(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn fail_if_busy_does_not_queue() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RepoLocks::new(4, Duration::from_secs(5));
        let guard = locks.acquire(dir.path(), "committing", false).unwrap();
        assert_eq!(
            locks.status(dir.path()),
            RepoStatus::Busy {
                operation: "committing".into()
            }
        );
        assert!(matches!(
            locks.acquire(dir.path(), "other", true),
            Err(Error::Busy { .. })
        ));
        drop(guard);
        assert_eq!(locks.status(dir.path()), RepoStatus::Ready);
        assert!(locks.acquire(dir.path(), "other", true).is_ok());
    }

    #[test]
    fn waiting_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RepoLocks::new(4, Duration::from_millis(50));
        let _guard = locks.acquire(dir.path(), "committing", false).unwrap();
        assert!(matches!(
            locks.acquire(dir.path(), "other", false),
            Err(Error::LockTimeout { .. })
        ));
    }

    #[test]
    fn queue_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RepoLocks::new(0, Duration::from_secs(5));
        let _guard = locks.acquire(dir.path(), "committing", false).unwrap();
        assert!(matches!(
            locks.acquire(dir.path(), "other", false),
            Err(Error::TooManyWaiters { limit: 0, .. })
        ));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let locks = Arc::new(RepoLocks::new(4, Duration::from_secs(10)));
        let guard = locks.acquire(dir.path(), "first", false).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let waiter = {
            let locks = Arc::clone(&locks);
            let done = Arc::clone(&done);
            let work_dir = dir.path().to_owned();
            thread::spawn(move || {
                let _guard = locks.acquire(&work_dir, "second", false).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        drop(guard);
        waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn working_copies_are_independent() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let locks = RepoLocks::new(4, Duration::from_secs(1));
        let _a = locks.acquire(a.path(), "committing", false).unwrap();
        assert!(locks.acquire(b.path(), "committing", true).is_ok());
    }
}
