//! Buffer layer: raw files addressed by slash paths.
//!
//! Working-tree access lives here. Reads at historical commits live in
//! [`version`].

pub mod version;

use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths;

/// Directory names the walker never descends into.
pub const IGNORED_NAMES: [&str; 2] = [".git", crate::config::STATE_DIR];

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Lazy walk over every regular file under a root, yielding slash paths
/// relative to that root.
///
/// A root that is itself a file yields `/` once. A missing root yields
/// nothing. Symlinks are not followed. Entries are visited in file-name
/// order so two walks over an unchanged tree agree.
pub struct DescendantPaths {
    root: PathBuf,
    state: WalkState,
}

enum WalkState {
    Single,
    Walk(walkdir::IntoIter),
    Done,
}

/// Start a lazy walk under `root`.
///
/// # Errors
/// Fails only when `root`'s metadata cannot be read for a reason other than
/// absence. Errors met during the walk are yielded as items.
pub fn list_descendant_paths(root: &Path) -> Result<DescendantPaths> {
    let state = match fs::symlink_metadata(root) {
        Ok(meta) if meta.is_dir() => WalkState::Walk(
            walkdir::WalkDir::new(root)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        ),
        Ok(meta) if meta.is_file() => WalkState::Single,
        Ok(_) => WalkState::Done,
        Err(e) if is_absent(&e) => WalkState::Done,
        Err(e) => return Err(Error::io(root, e)),
    };
    Ok(DescendantPaths {
        root: root.to_path_buf(),
        state,
    })
}

impl DescendantPaths {
    fn relative(&self, path: &Path) -> Result<String> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| Error::invalid_path(path.display().to_string(), "outside walk root"))?;
        let mut out = String::new();
        for component in rel.components() {
            let segment = component.as_os_str().to_str().ok_or_else(|| {
                Error::invalid_path(path.display().to_string(), "not valid UTF-8")
            })?;
            out.push('/');
            out.push_str(segment);
        }
        Ok(out)
    }
}

impl Iterator for DescendantPaths {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                WalkState::Done => return None,
                WalkState::Single => {
                    self.state = WalkState::Done;
                    return Some(Ok("/".to_owned()));
                }
                WalkState::Walk(walk) => {
                    let entry = match walk.next()? {
                        Ok(entry) => entry,
                        Err(e) => {
                            let path = e.path().map_or_else(|| self.root.clone(), Path::to_path_buf);
                            return Some(Err(Error::io(path, e.into())));
                        }
                    };
                    if entry.file_type().is_dir() {
                        if IGNORED_NAMES.iter().any(|n| entry.file_name() == *n) {
                            walk.skip_current_dir();
                        }
                        continue;
                    }
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    return Some(self.relative(entry.path()));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read one buffer from the working tree. Absence is `Ok(None)`.
///
/// # Errors
/// Any I/O failure other than the file (or one of its parents) being absent.
pub fn read_buffer(work_dir: &Path, buffer_path: &str) -> Result<Option<Vec<u8>>> {
    let path = paths::to_fs_path(work_dir, buffer_path);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if is_absent(&e) => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn is_absent(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// One buffer write: new content, or `None` to delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferWrite {
    /// Buffer path relative to the working copy.
    pub path: String,
    /// New content, `None` to delete.
    pub new_value: Option<Vec<u8>>,
}

impl BufferWrite {
    pub fn put(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            new_value: Some(content.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            new_value: None,
        }
    }
}

/// Apply writes to the working tree.
///
/// Each file is replaced atomically (written to a sibling temp file, then
/// renamed over the target). Parent directories are created as needed.
/// Deleting an absent file is not an error, and directories left empty by a
/// deletion are removed up to `work_dir`.
///
/// # Errors
/// The first I/O failure. Writes before it stay applied.
pub fn apply_changeset(work_dir: &Path, writes: &[BufferWrite]) -> Result<()> {
    for write in writes {
        let target = paths::to_fs_path(work_dir, &write.path);
        if target == work_dir {
            return Err(Error::invalid_path(&write.path, "cannot write the working copy root"));
        }
        match &write.new_value {
            Some(content) => write_atomic(&target, content)?,
            None => {
                match fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if is_absent(&e) => continue,
                    Err(e) => return Err(Error::io(target, e)),
                }
                prune_empty_parents(work_dir, &target);
            }
        }
    }
    Ok(())
}

pub(crate) fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| Error::invalid_path(target.display().to_string(), "no parent"))?;
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
    tmp.write_all(content).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(target).map_err(|e| Error::io(target, e.error))?;
    Ok(())
}

pub(crate) fn prune_empty_parents(work_dir: &Path, removed: &Path) {
    let mut dir = removed.parent();
    while let Some(d) = dir {
        if d == work_dir || !d.starts_with(work_dir) {
            break;
        }
        // Fails on non-empty directories, which ends the climb.
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(root: &Path) -> Vec<String> {
        list_descendant_paths(root)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn walk_lists_files_in_order_and_skips_git() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/c")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join("b/c/d.json"), "{}").unwrap();
        fs::write(root.join("a.json"), "{}").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();

        assert_eq!(collect(root), vec!["/a.json", "/b/c/d.json"]);
    }

    #[test]
    fn walk_of_file_yields_root_and_missing_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("one.json");
        fs::write(&file, "1").unwrap();
        assert_eq!(collect(&file), vec!["/"]);
        assert!(collect(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn walk_restarts_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x"), "1").unwrap();
        let first = collect(dir.path());
        let second = collect(dir.path());
        assert_eq!(first, second);
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file"), "x").unwrap();
        assert_eq!(read_buffer(dir.path(), "/absent").unwrap(), None);
        assert_eq!(read_buffer(dir.path(), "/file/below").unwrap(), None);
        assert_eq!(read_buffer(dir.path(), "/file").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn apply_writes_and_deletes_with_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        apply_changeset(
            root,
            &[
                BufferWrite::put("/d/e/f.txt", "hello"),
                BufferWrite::put("/top.txt", "top"),
            ],
        )
        .unwrap();
        assert_eq!(fs::read_to_string(root.join("d/e/f.txt")).unwrap(), "hello");

        apply_changeset(
            root,
            &[BufferWrite::delete("/d/e/f.txt"), BufferWrite::delete("/never")],
        )
        .unwrap();
        assert!(!root.join("d").exists());
        assert!(root.join("top.txt").exists());
    }
}
