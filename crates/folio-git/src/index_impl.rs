//! Index (staging area) operations for [`GixRepo`].

use std::collections::BTreeMap;

use gix::bstr::ByteSlice;

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::objects_impl::{entry_at_path, from_gix_oid, to_gix_oid};
use crate::types::{EntryMode, IndexEntry};

/// Read the index from disk. A missing index file reads as empty.
///
/// The file is loaded fresh on every call. The repository's shared index
/// snapshot is not reloaded after `write_index` replaces the file.
pub fn read_index(repo: &GixRepo) -> Result<Vec<IndexEntry>, GitError> {
    if !repo.repo.index_path().is_file() {
        return Ok(Vec::new());
    }
    let index = repo
        .repo
        .open_index()
        .map_err(|e| GitError::BackendError {
            message: format!("failed to open index: {e}"),
        })?;

    let entries = index
        .entries()
        .iter()
        .filter_map(|entry| {
            let path = entry.path(&index).to_str().ok()?.to_owned();
            let mode = gix_mode_to_entry_mode(entry.mode)?;
            Some(IndexEntry {
                path,
                mode,
                oid: from_gix_oid(&entry.id),
            })
        })
        .collect();

    Ok(entries)
}

pub fn write_index(repo: &GixRepo, entries: &[IndexEntry]) -> Result<(), GitError> {
    let mut state = gix::index::State::new(repo.repo.object_hash());

    for ie in entries {
        state.dangerously_push_entry(
            gix::index::entry::Stat::default(),
            to_gix_oid(ie.oid),
            gix::index::entry::Flags::empty(),
            entry_mode_to_gix_mode(ie.mode),
            ie.path.as_str().into(),
        );
    }
    state.sort_entries();

    let mut index_file = gix::index::File::from_state(state, repo.repo.index_path());
    index_file
        .write(Default::default())
        .map_err(|e| GitError::BackendError {
            message: format!("failed to write index: {e}"),
        })?;
    Ok(())
}

pub fn reset_index_paths(repo: &GixRepo, paths: &[String]) -> Result<(), GitError> {
    let head_tree = match crate::refs_impl::rev_parse_opt(repo, "HEAD")? {
        Some(head) => Some(crate::objects_impl::read_commit(repo, head)?.tree_oid),
        None => None,
    };

    let mut entries: BTreeMap<String, IndexEntry> = read_index(repo)?
        .into_iter()
        .map(|e| (e.path.clone(), e))
        .collect();

    for path in paths {
        let path = path.trim_start_matches('/');
        let at_head = match head_tree {
            Some(tree) => entry_at_path(repo, tree, path)?,
            None => None,
        };
        match at_head {
            Some(entry) if entry.mode.is_blob_like() => {
                entries.insert(
                    path.to_owned(),
                    IndexEntry {
                        path: path.to_owned(),
                        mode: entry.mode,
                        oid: entry.oid,
                    },
                );
            }
            _ => {
                entries.remove(path);
            }
        }
    }

    let entries: Vec<IndexEntry> = entries.into_values().collect();
    write_index(repo, &entries)
}

fn gix_mode_to_entry_mode(mode: gix::index::entry::Mode) -> Option<EntryMode> {
    Some(match mode {
        gix::index::entry::Mode::FILE => EntryMode::Blob,
        gix::index::entry::Mode::FILE_EXECUTABLE => EntryMode::BlobExecutable,
        gix::index::entry::Mode::SYMLINK => EntryMode::Link,
        gix::index::entry::Mode::DIR => EntryMode::Tree,
        gix::index::entry::Mode::COMMIT => EntryMode::Commit,
        _ => return None,
    })
}

const fn entry_mode_to_gix_mode(mode: EntryMode) -> gix::index::entry::Mode {
    match mode {
        EntryMode::Blob => gix::index::entry::Mode::FILE,
        EntryMode::BlobExecutable => gix::index::entry::Mode::FILE_EXECUTABLE,
        EntryMode::Link => gix::index::entry::Mode::SYMLINK,
        EntryMode::Tree => gix::index::entry::Mode::DIR,
        EntryMode::Commit => gix::index::entry::Mode::COMMIT,
    }
}
