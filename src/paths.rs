//! Slash-path helpers.
//!
//! Every path that crosses a folio API is a forward-slash path with a
//! leading `/`, relative to some root: buffer paths are relative to the
//! working copy, object paths to the dataset root, and buffer-dataset keys
//! to the object's own path. `/` alone names the root itself.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Normalize a slash path: leading `/`, no trailing `/`, repeated slashes
/// collapsed.
///
/// # Errors
/// Returns [`Error::InvalidPath`] for `.` or `..` segments and for
/// backslashes.
pub fn normalize(path: &str) -> Result<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(Error::invalid_path(path, "relative segments are not allowed"));
        }
        if segment.contains('\\') {
            return Err(Error::invalid_path(path, "use `/` as the separator"));
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Normalize a dataset directory to its bare relative form: no leading or
/// trailing `/`. The empty string means the working copy root.
///
/// # Errors
/// Same as [`normalize`].
pub fn normalize_dataset_dir(dir: &str) -> Result<String> {
    let normalized = normalize(dir)?;
    Ok(normalized.trim_start_matches('/').to_owned())
}

/// Join a relative slash path onto a base. A relative path of `/` yields the
/// base itself.
#[must_use]
pub fn join(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    match (base.is_empty(), relative) {
        (true, "/" | "") => "/".to_owned(),
        (true, rel) if rel.starts_with('/') => rel.to_owned(),
        (true, rel) => format!("/{rel}"),
        (false, "/" | "") => base.to_owned(),
        (false, rel) if rel.starts_with('/') => format!("{base}{rel}"),
        (false, rel) => format!("{base}/{rel}"),
    }
}

/// Buffer path (relative to the working copy) of an object path inside a
/// dataset directory.
#[must_use]
pub fn dataset_buffer_path(dataset_dir: &str, object_path: &str) -> String {
    join(&format!("/{dataset_dir}"), object_path)
}

/// Strip `prefix` from `path`, returning the remainder as a slash path, or
/// `None` when `path` is not at or under `prefix`.
#[must_use]
pub fn strip_prefix(prefix: &str, path: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path.to_owned());
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_owned())
    } else if rest.starts_with('/') {
        Some(rest.to_owned())
    } else {
        None
    }
}

/// Filesystem location of a slash path under `root`.
#[must_use]
pub fn to_fs_path(root: &Path, path: &str) -> PathBuf {
    path.split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Git tree path (no leading slash) for a buffer path.
#[must_use]
pub fn to_git_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_and_roots() {
        assert_eq!(normalize("a//b/").unwrap(), "/a/b");
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("///").unwrap(), "/");
        assert!(normalize("/a/../b").is_err());
        assert!(normalize("/a/./b").is_err());
    }

    #[test]
    fn dataset_dir_is_bare() {
        assert_eq!(normalize_dataset_dir("/data/").unwrap(), "data");
        assert_eq!(normalize_dataset_dir("/").unwrap(), "");
        assert_eq!(normalize_dataset_dir("a/b").unwrap(), "a/b");
    }

    #[test]
    fn join_handles_roots() {
        assert_eq!(join("/", "/x.json"), "/x.json");
        assert_eq!(join("/obj", "/"), "/obj");
        assert_eq!(join("/obj", "/meta.json"), "/obj/meta.json");
        assert_eq!(join("", "/"), "/");
        assert_eq!(dataset_buffer_path("data", "/a.json"), "/data/a.json");
        assert_eq!(dataset_buffer_path("", "/a.json"), "/a.json");
    }

    #[test]
    fn strip_prefix_respects_segment_boundaries() {
        assert_eq!(strip_prefix("/data", "/data/a.json").as_deref(), Some("/a.json"));
        assert_eq!(strip_prefix("/data", "/data").as_deref(), Some("/"));
        assert_eq!(strip_prefix("/data", "/database/a.json"), None);
        assert_eq!(strip_prefix("/", "/a").as_deref(), Some("/a"));
    }

    #[test]
    fn fs_and_git_paths() {
        let root = Path::new("/tmp/wc");
        assert_eq!(to_fs_path(root, "/a/b.json"), Path::new("/tmp/wc/a/b.json"));
        assert_eq!(to_fs_path(root, "/"), root);
        assert_eq!(to_git_path("/a/b.json"), "a/b.json");
    }
}
