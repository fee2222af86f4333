//! Filtered indexes: positions of the objects a predicate accepts.
//!
//! A build iterates the default index in key order inside one read
//! transaction and assigns positions `0, 1, 2, ...` to accepted objects, so
//! position order is object-path order. Objects still waiting to be filled
//! in the default index are skipped. The first evaluation error aborts the
//! build.

use std::fmt::Write as _;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::default::DefaultIndex;
use super::status::{StatusChannel, StatusHook};
use super::store::{FilteredStore, IndexedValue};
use super::{IndexError, IndexStatus};
use crate::error::{Error, Result};
use crate::query::Predicate;

/// File for the filtered index of `expression` under a cache root. Distinct
/// texts, even ones differing only in whitespace, get distinct files.
#[must_use]
pub fn index_path(cache_root: &Path, expression: &str) -> PathBuf {
    let digest = Sha256::digest(expression.as_bytes());
    let mut name = String::with_capacity(24);
    for byte in digest.iter().take(12) {
        let _ = write!(name, "{byte:02x}");
    }
    cache_root.join("filtered").join(format!("{name}.redb"))
}

/// One filtered index.
pub struct FilteredIndex {
    predicate: Predicate,
    store: FilteredStore,
    status: StatusChannel,
    batch_size: usize,
}

impl FilteredIndex {
    /// Compile `expression` and create empty storage for it.
    ///
    /// # Errors
    /// Compile errors (before anything touches disk), then I/O and database
    /// failures.
    pub fn create(
        expression: &str,
        path: &Path,
        batch_size: usize,
        throttle: Duration,
        hook: Option<StatusHook>,
    ) -> Result<Self> {
        let predicate = Predicate::compile(expression)?;
        Ok(Self {
            predicate,
            store: FilteredStore::create(path)?,
            status: StatusChannel::new(IndexStatus::indexing(0, 0, 0), throttle, hook),
            batch_size: batch_size.max(1),
        })
    }

    /// The expression, verbatim.
    #[must_use]
    pub fn expression(&self) -> &str {
        self.predicate.source()
    }

    #[must_use]
    pub const fn status(&self) -> &StatusChannel {
        &self.status
    }

    /// Evaluate the predicate over `default` and record matches. Returns
    /// the number of matches.
    ///
    /// # Errors
    /// Predicate errors, storage failures, and [`IndexError::Closed`] when
    /// either index is closed mid-build.
    pub fn build(&self, default: &DefaultIndex) -> Result<u64> {
        let result = self.fill(default);
        match &result {
            Ok(matched) => {
                tracing::debug!(expression = self.expression(), matched, "filtered index built");
                self.status.complete(IndexStatus::complete(*matched));
            }
            Err(e) => {
                tracing::warn!(expression = self.expression(), "filtered index build failed: {e}");
                self.status.close();
            }
        }
        result
    }

    fn fill(&self, default: &DefaultIndex) -> Result<u64> {
        let total = default.store().len()?;
        let mut loaded = 0;
        let mut next_position = 0;
        let mut batch = Vec::with_capacity(self.batch_size);
        self.status.publish(IndexStatus::indexing(0, total, 0));

        default.store().for_each(|object_path, value| {
            self.store.check_open()?;
            loaded += 1;
            if let IndexedValue::Object(object) = value
                && self.predicate.matches(&object)?
            {
                batch.push((next_position, object_path.to_owned()));
                next_position += 1;
            }
            if batch.len() >= self.batch_size {
                self.store.append(&batch)?;
                batch.clear();
            }
            self.status
                .publish(IndexStatus::indexing(next_position, total, loaded));
            Ok::<_, Error>(ControlFlow::Continue(()))
        })?;

        if !batch.is_empty() {
            self.store.append(&batch)?;
        }
        Ok(next_position)
    }

    /// Object path at `position`, or `None` past the end.
    ///
    /// # Errors
    /// Storage failures and [`IndexError::Closed`].
    pub fn object_path_at(&self, position: u64) -> Result<Option<String>, IndexError> {
        self.store.get(position)
    }

    /// All object paths in position order.
    ///
    /// # Errors
    /// Storage failures and [`IndexError::Closed`].
    pub fn object_paths(&self) -> Result<Vec<String>, IndexError> {
        Ok(self
            .store
            .entries()?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    /// End status streams and release the store. The file stays.
    pub fn close(&self) {
        self.store.close();
        self.status.close();
    }

    /// Close and delete the backing file.
    pub fn destroy(&self) {
        self.store.destroy();
        self.status.close();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;
    use crate::index::default::DatasetSource;
    use crate::object::SpecRegistry;
    use crate::query::QueryError;

    fn built_default(objects: &[(&str, serde_json::Value)]) -> (tempfile::TempDir, DefaultIndex) {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in objects {
            let path = dir.path().join("ds").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, value.to_string()).unwrap();
        }
        let source = DatasetSource {
            work_dir: dir.path().to_owned(),
            dataset_dir: "ds".to_owned(),
            specs: SpecRegistry::builtin(),
        };
        let index = DefaultIndex::create(
            &dir.path().join("cache/default.redb"),
            2,
            Duration::ZERO,
            None,
        )
        .unwrap();
        index.build(&source).unwrap();
        (dir, index)
    }

    #[test]
    fn positions_follow_path_order() {
        let (dir, default) = built_default(&[
            ("c.json", json!({"keep": true})),
            ("a.json", json!({"keep": true})),
            ("b.json", json!({"keep": false})),
            ("d.json", json!({"keep": true})),
        ]);
        let filtered = FilteredIndex::create(
            "obj.keep",
            &index_path(&dir.path().join("cache"), "obj.keep"),
            2,
            Duration::ZERO,
            None,
        )
        .unwrap();
        assert_eq!(filtered.build(&default).unwrap(), 3);
        assert_eq!(
            filtered.object_paths().unwrap(),
            vec!["/a.json", "/c.json", "/d.json"]
        );
        assert_eq!(filtered.object_path_at(1).unwrap().as_deref(), Some("/c.json"));
        assert_eq!(filtered.object_path_at(3).unwrap(), None);
        assert_eq!(filtered.status().snapshot(), IndexStatus::complete(3));
    }

    #[test]
    fn evaluation_error_aborts_build() {
        let (dir, default) = built_default(&[("a.json", json!({"n": 1}))]);
        let filtered = FilteredIndex::create(
            "obj.n",
            &index_path(dir.path(), "obj.n"),
            8,
            Duration::ZERO,
            None,
        )
        .unwrap();
        assert!(matches!(
            filtered.build(&default),
            Err(Error::Query(QueryError::NotBoolean { .. }))
        ));
        assert!(filtered.status().is_complete());
    }

    #[test]
    fn syntax_error_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = index_path(dir.path(), "obj.");
        let err = FilteredIndex::create("obj.", &path, 8, Duration::ZERO, None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Query(QueryError::Syntax { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn whitespace_variants_get_distinct_files() {
        let root = Path::new("/cache");
        assert_ne!(index_path(root, "obj.a"), index_path(root, "obj.a "));
        assert_eq!(index_path(root, "obj.a"), index_path(root, "obj.a"));
    }
}
