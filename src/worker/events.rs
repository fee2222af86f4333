//! Events the worker broadcasts to its subscribers.

use std::path::PathBuf;

use serde::Serialize;

use crate::index::{IndexId, IndexStatus};

/// Subscribers that fall further behind than this skip to newer events.
pub const EVENT_CAPACITY: usize = 256;

/// What a working copy is doing right now.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RepoStatus {
    #[default]
    Ready,
    /// A mutating operation holds the working copy.
    Busy { operation: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    IndexStatusChanged {
        work_dir: PathBuf,
        dataset_dir: String,
        index: IndexId,
        status: IndexStatus,
    },
    /// Objects of a dataset changed. `None` means anything may have changed.
    ObjectsChanged {
        work_dir: PathBuf,
        dataset_dir: String,
        object_paths: Option<Vec<String>>,
    },
    RepositoryStatusChanged {
        work_dir: PathBuf,
        status: RepoStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged() {
        let event = WorkerEvent::RepositoryStatusChanged {
            work_dir: PathBuf::from("/wc"),
            status: RepoStatus::Busy {
                operation: "committing".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "event": "repository_status_changed",
                "work_dir": "/wc",
                "status": {"status": "busy", "operation": "committing"}
            })
        );
    }
}
