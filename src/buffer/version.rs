//! Buffers at historical commits.

use std::collections::BTreeMap;

use folio_git::{EntryMode, GitOid, GitRepo, TreeEntry};

use crate::diff::ChangeStatus;
use crate::error::Result;
use crate::paths;

use super::IGNORED_NAMES;

/// Root tree of the commit `spec` resolves to.
///
/// # Errors
/// Fails when `spec` does not resolve to a commit.
pub fn tree_at(repo: &dyn GitRepo, spec: &str) -> Result<GitOid> {
    let commit = repo.rev_parse(spec)?;
    Ok(repo.read_commit(commit)?.tree_oid)
}

/// Read one buffer as of a commit. A path missing from that commit's tree is
/// `Ok(None)`.
///
/// # Errors
/// Fails when the commit cannot be resolved or an object cannot be read.
pub fn read_buffer_at_version(
    repo: &dyn GitRepo,
    commit: &str,
    buffer_path: &str,
) -> Result<Option<Vec<u8>>> {
    let tree = tree_at(repo, commit)?;
    read_buffer_in_tree(repo, tree, buffer_path)
}

pub(crate) fn read_buffer_in_tree(
    repo: &dyn GitRepo,
    tree: GitOid,
    buffer_path: &str,
) -> Result<Option<Vec<u8>>> {
    match repo.entry_at_path(tree, paths::to_git_path(buffer_path))? {
        Some(entry) if is_file(entry.mode) => Ok(Some(repo.read_blob(entry.oid)?)),
        _ => Ok(None),
    }
}

/// Every file under `root` as of a commit, keyed by path relative to `root`.
///
/// # Errors
/// Fails when the commit cannot be resolved or an object cannot be read.
pub fn read_buffers_at_version(
    repo: &dyn GitRepo,
    commit: &str,
    root: &str,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let tree = tree_at(repo, commit)?;
    let mut out = BTreeMap::new();
    for (path, _) in list_in_tree(repo, tree, root, None)? {
        let buffer_path = paths::join(root, &path);
        if let Some(bytes) = read_buffer_in_tree(repo, tree, &buffer_path)? {
            out.insert(path, bytes);
        }
    }
    Ok(out)
}

/// Comparison settings for [`list_descendant_paths_at_version`].
#[derive(Clone, Copy, Debug)]
pub struct VersionDiff<'a> {
    /// The commit to compare against (side A).
    pub against: &'a str,
    /// Drop unchanged paths from the listing.
    pub only_changed: bool,
}

/// List files under `root` as of `commit`, with paths relative to `root`.
///
/// Without `diff`, every status is `None`. With it, the listing covers both
/// commits and each path is classified going from `diff.against` to
/// `commit`, so a file only `commit` has is [`ChangeStatus::Added`].
///
/// # Errors
/// Fails when either commit cannot be resolved or a tree cannot be read.
pub fn list_descendant_paths_at_version(
    repo: &dyn GitRepo,
    root: &str,
    commit: &str,
    diff: Option<VersionDiff<'_>>,
) -> Result<Vec<(String, Option<ChangeStatus>)>> {
    let tree = tree_at(repo, commit)?;
    let against = diff.map(|d| tree_at(repo, d.against)).transpose()?;
    list_in_tree(repo, tree, root, against.zip(diff.map(|d| d.only_changed)))
}

fn list_in_tree(
    repo: &dyn GitRepo,
    tree: GitOid,
    root: &str,
    against: Option<(GitOid, bool)>,
) -> Result<Vec<(String, Option<ChangeStatus>)>> {
    let git_root = paths::to_git_path(root);
    let new = node_at(repo, tree, git_root)?;
    let mut out = Vec::new();
    match against {
        None => walk(repo, String::new(), new, None, Mode::List, &mut out)?,
        Some((old_tree, only_changed)) => {
            let old = node_at(repo, old_tree, git_root)?;
            walk(repo, String::new(), new, old, Mode::Diff { only_changed }, &mut out)?;
        }
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    Tree(GitOid),
    File(GitOid),
}

#[derive(Clone, Copy)]
enum Mode {
    List,
    Diff { only_changed: bool },
}

const fn is_file(mode: EntryMode) -> bool {
    matches!(mode, EntryMode::Blob | EntryMode::BlobExecutable)
}

fn node_of(entry: &TreeEntry) -> Option<Node> {
    match entry.mode {
        EntryMode::Tree => Some(Node::Tree(entry.oid)),
        mode if is_file(mode) => Some(Node::File(entry.oid)),
        _ => None,
    }
}

fn node_at(repo: &dyn GitRepo, tree: GitOid, path: &str) -> Result<Option<Node>> {
    Ok(repo.entry_at_path(tree, path)?.as_ref().and_then(node_of))
}

fn children(repo: &dyn GitRepo, tree: GitOid) -> Result<BTreeMap<String, Node>> {
    Ok(repo
        .read_tree(tree)?
        .iter()
        .filter(|e| !IGNORED_NAMES.contains(&e.name.as_str()))
        .filter_map(|e| node_of(e).map(|n| (e.name.clone(), n)))
        .collect())
}

fn walk(
    repo: &dyn GitRepo,
    prefix: String,
    new: Option<Node>,
    old: Option<Node>,
    mode: Mode,
    out: &mut Vec<(String, Option<ChangeStatus>)>,
) -> Result<()> {
    let here = || {
        if prefix.is_empty() {
            "/".to_owned()
        } else {
            prefix.clone()
        }
    };
    let status = |s: ChangeStatus| match mode {
        Mode::List => None,
        Mode::Diff { .. } => Some(s),
    };
    let only_changed = matches!(mode, Mode::Diff { only_changed: true });

    match (new, old) {
        (None, None) => {}
        (Some(Node::File(a)), Some(Node::File(b))) => {
            if a == b {
                if !only_changed {
                    out.push((here(), status(ChangeStatus::Unchanged)));
                }
            } else {
                out.push((here(), status(ChangeStatus::Modified)));
            }
        }
        (Some(Node::File(_)), None) => out.push((here(), status(ChangeStatus::Added))),
        (None, Some(Node::File(_))) => out.push((here(), status(ChangeStatus::Removed))),
        (Some(Node::Tree(a)), Some(Node::Tree(b))) if a == b && only_changed => {}
        (new_tree, old_tree) if is_tree(new_tree) || is_tree(old_tree) => {
            // A file replaced by a directory (or the reverse) shows up as a
            // removal at this path plus additions below it.
            if let Some(file @ Node::File(_)) = new_tree {
                walk(repo, prefix.clone(), Some(file), None, mode, out)?;
            }
            if let Some(file @ Node::File(_)) = old_tree {
                walk(repo, prefix.clone(), None, Some(file), mode, out)?;
            }
            let new_children = match new_tree {
                Some(Node::Tree(t)) => children(repo, t)?,
                _ => BTreeMap::new(),
            };
            let old_children = match old_tree {
                Some(Node::Tree(t)) => children(repo, t)?,
                _ => BTreeMap::new(),
            };
            let mut names: Vec<&String> = new_children.keys().chain(old_children.keys()).collect();
            names.sort();
            names.dedup();
            for name in names {
                walk(
                    repo,
                    format!("{prefix}/{name}"),
                    new_children.get(name).copied(),
                    old_children.get(name).copied(),
                    mode,
                    out,
                )?;
            }
        }
        _ => {}
    }
    Ok(())
}

const fn is_tree(node: Option<Node>) -> bool {
    matches!(node, Some(Node::Tree(_)))
}
