use std::path::PathBuf;

use thiserror::Error;

/// Errors from pointer resolution.
#[derive(Debug, Error)]
pub enum LfsError {
    /// The pointer's object is not in the local store.
    #[error("lfs object {oid} is not available locally (expected at {})", path.display())]
    MissingObject {
        /// The SHA-256 object id from the pointer.
        oid: String,
        /// Where the object was looked for.
        path: PathBuf,
    },

    /// The stored object has a different size than the pointer declares.
    #[error("lfs object {oid} has size {actual}, pointer declares {expected}")]
    SizeMismatch {
        /// The object id.
        oid: String,
        /// Size from the pointer.
        expected: u64,
        /// Size on disk.
        actual: u64,
    },

    /// The stored object does not hash to its id.
    #[error("lfs object {oid} is corrupt (sha256 {actual})")]
    DigestMismatch {
        /// The object id.
        oid: String,
        /// Digest of the bytes actually read.
        actual: String,
    },

    /// An I/O error while reading or writing the store.
    #[error("lfs I/O error: {0}")]
    Io(#[from] std::io::Error),
}
