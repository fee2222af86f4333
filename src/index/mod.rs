//! Persistent indexes over a dataset.
//!
//! Each loaded dataset has one [`DefaultIndex`] (object path to object data)
//! and any number of memoized [`FilteredIndex`]es (position to object path,
//! for the objects a predicate accepts). Both live in redb files under the
//! dataset's cache root and publish their build progress through a
//! [`StatusChannel`].

pub mod default;
pub mod filtered;
pub mod status;
pub mod store;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub use default::{DatasetSource, DefaultIndex};
pub use filtered::FilteredIndex;
pub use status::{StatusChannel, StatusStream, Throttle};
pub use store::IndexedValue;

/// Names an index within a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "expression", rename_all = "lowercase")]
pub enum IndexId {
    /// The path-keyed index every loaded dataset has.
    Default,
    /// A filtered index, identified by its predicate text exactly as given.
    Filtered(String),
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Filtered(expression) => write!(f, "filter `{expression}`"),
        }
    }
}

/// Build phase of an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Discovering which objects exist.
    Counting,
    /// Reading objects (default index) or evaluating the predicate
    /// (filtered index).
    Indexing,
}

/// Progress of a running build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub phase: Phase,
    pub total: u64,
    pub loaded: u64,
}

/// Point-in-time status of an index. `progress` is `None` once the index is
/// complete.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub object_count: u64,
    pub progress: Option<Progress>,
}

impl IndexStatus {
    #[must_use]
    pub const fn counting(total: u64) -> Self {
        Self {
            object_count: total,
            progress: Some(Progress {
                phase: Phase::Counting,
                total,
                loaded: 0,
            }),
        }
    }

    #[must_use]
    pub const fn indexing(object_count: u64, total: u64, loaded: u64) -> Self {
        Self {
            object_count,
            progress: Some(Progress {
                phase: Phase::Indexing,
                total,
                loaded,
            }),
        }
    }

    #[must_use]
    pub const fn complete(object_count: u64) -> Self {
        Self {
            object_count,
            progress: None,
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.progress.is_none()
    }
}

/// Errors from index storage and builds.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index storage error: {0}")]
    Store(#[from] redb::Error),

    /// The index was torn down, typically by an unload racing a build.
    #[error("index at {} is closed", path.display())]
    Closed { path: PathBuf },

    #[error("corrupt index entry `{key}`: {message}")]
    Corrupt { key: String, message: String },

    #[error("index I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Positional lookups only exist on filtered indexes.
    #[error("the default index is keyed by object path and has no positions")]
    NotPositional,

    #[error("the default index of `{dataset_dir}` is already being built")]
    AlreadyBuilding { dataset_dir: String },

    /// No index with this ID exists in the dataset.
    #[error("no {id} index in `{dataset_dir}`")]
    Unknown { id: IndexId, dataset_dir: String },
}

macro_rules! store_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for IndexError {
                fn from(e: $source) -> Self {
                    Self::Store(redb::Error::from(e))
                }
            }
        )*
    };
}

store_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
