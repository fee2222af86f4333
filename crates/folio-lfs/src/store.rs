//! The local LFS object store (`.git/lfs/objects`).

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::LfsError;
use crate::pointer::Pointer;
use crate::LfsResolver;

/// Content-addressed objects under `<root>/<aa>/<bb>/<oid>`.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// A store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store of the working copy at `work_dir` (`<work_dir>/.git/lfs/objects`).
    pub fn for_work_dir(work_dir: &Path) -> Self {
        Self::new(work_dir.join(".git").join("lfs").join("objects"))
    }

    /// Where the object with `oid` lives.
    #[must_use]
    pub fn object_path(&self, oid: &str) -> PathBuf {
        let fan_a = oid.get(..2).unwrap_or_default();
        let fan_b = oid.get(2..4).unwrap_or_default();
        self.root.join(fan_a).join(fan_b).join(oid)
    }

    /// Store `content` and return its pointer. Writes through a temp file so
    /// readers never see a partial object.
    pub fn insert(&self, content: &[u8]) -> Result<Pointer, LfsError> {
        let pointer = Pointer {
            oid: sha256_hex(content),
            size: content.len() as u64,
        };
        let path = self.object_path(&pointer.oid);
        if path.exists() {
            return Ok(pointer);
        }
        let dir = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content)?;
        tmp.persist(&path).map_err(|e| LfsError::Io(e.error))?;
        Ok(pointer)
    }
}

impl LfsResolver for LocalObjectStore {
    fn resolve(&self, pointer: &Pointer) -> Result<Vec<u8>, LfsError> {
        let path = self.object_path(&pointer.oid);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LfsError::MissingObject {
                    oid: pointer.oid.clone(),
                    path,
                });
            }
            Err(e) => return Err(LfsError::Io(e)),
        };

        let actual_size = data.len() as u64;
        if actual_size != pointer.size {
            return Err(LfsError::SizeMismatch {
                oid: pointer.oid.clone(),
                expected: pointer.size,
                actual: actual_size,
            });
        }
        let digest = sha256_hex(&data);
        if digest != pointer.oid {
            return Err(LfsError::DigestMismatch {
                oid: pointer.oid.clone(),
                actual: digest,
            });
        }
        Ok(data)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_fans_out() {
        let store = LocalObjectStore::new("/lfs");
        assert_eq!(
            store.object_path("abcdef"),
            PathBuf::from("/lfs/ab/cd/abcdef")
        );
    }

    #[test]
    fn insert_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let pointer = store.insert(b"large payload").unwrap();
        assert_eq!(pointer.size, 13);
        assert_eq!(store.resolve(&pointer).unwrap(), b"large payload");
    }

    #[test]
    fn missing_object_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let pointer = Pointer {
            oid: "0".repeat(64),
            size: 3,
        };
        assert!(matches!(
            store.resolve(&pointer),
            Err(LfsError::MissingObject { .. })
        ));
    }

    #[test]
    fn corrupt_object_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let pointer = store.insert(b"abc").unwrap();
        std::fs::write(store.object_path(&pointer.oid), b"abd").unwrap();
        assert!(matches!(
            store.resolve(&pointer),
            Err(LfsError::DigestMismatch { .. })
        ));
    }
}
