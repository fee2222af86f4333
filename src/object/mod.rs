//! Object layer: typed objects assembled from buffers.
//!
//! An [`ObjectSpec`] claims object paths and knows how to turn an object into
//! a [`BufferDataset`] and back. A [`SpecRegistry`] holds the specs of one
//! dataset in priority order; the first spec that matches a path wins.
//!
//! Object paths are relative to the dataset root. Keys of a
//! [`BufferDataset`] are relative to the object path, with `/` for an object
//! stored as a single file.

pub mod builtin;
pub mod mapper;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use builtin::{DirectorySpec, JsonFileSpec, TomlFileSpec};
pub use mapper::{
    list_object_paths, read_object_at_version, read_object_cold, to_buffer_dataset,
};

/// Object payload. Objects are JSON-shaped trees.
pub type ObjectData = serde_json::Value;

/// Buffers of one object, keyed by path relative to the object.
pub type BufferDataset = BTreeMap<String, Vec<u8>>;

/// Error produced by a spec's own (de)serialization code.
pub type SpecError = Box<dyn std::error::Error + Send + Sync>;

/// Maps a family of object paths to and from buffers.
pub trait ObjectSpec: Send + Sync {
    /// Short name used in errors and logs.
    fn name(&self) -> &str;

    /// Whether this spec owns the object at `object_path`.
    fn matches(&self, object_path: &str) -> bool;

    /// Object path that owns `buffer_path` when the object spans several
    /// buffers. Single-file specs keep the default, which means "the buffer
    /// path is the object path".
    fn containing_object_path(&self, buffer_path: &str) -> Option<String> {
        let _ = buffer_path;
        None
    }

    /// Turn an object into its buffers.
    ///
    /// # Errors
    /// Objects whose shape the spec cannot store.
    fn serialize(&self, object: &ObjectData) -> Result<BufferDataset, SpecError>;

    /// Assemble an object from its buffers.
    ///
    /// # Errors
    /// Buffers that do not parse.
    fn deserialize(&self, buffers: &BufferDataset) -> Result<ObjectData, SpecError>;
}

/// Errors from the object layer.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// No registered spec matches an object path.
    #[error("no object spec matches `{object_path}`")]
    NoMatchingSpec { object_path: String },

    /// Buffers exist but the spec could not assemble an object from them.
    #[error("spec `{spec}` cannot read `{object_path}`: {source}")]
    Deserialize {
        object_path: String,
        spec: String,
        #[source]
        source: SpecError,
    },

    /// The spec refused to store an object.
    #[error("spec `{spec}` cannot write `{object_path}`: {source}")]
    Serialize {
        object_path: String,
        spec: String,
        #[source]
        source: SpecError,
    },
}

/// Specs of one dataset, in priority order.
#[derive(Clone, Default)]
pub struct SpecRegistry {
    specs: Vec<Arc<dyn ObjectSpec>>,
}

impl fmt::Debug for SpecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.specs.iter().map(|s| s.name()))
            .finish()
    }
}

impl SpecRegistry {
    #[must_use]
    pub fn new(specs: Vec<Arc<dyn ObjectSpec>>) -> Self {
        Self { specs }
    }

    /// The JSON and TOML single-file specs.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![Arc::new(JsonFileSpec), Arc::new(TomlFileSpec)])
    }

    /// First spec that matches `object_path`.
    #[must_use]
    pub fn find(&self, object_path: &str) -> Option<&Arc<dyn ObjectSpec>> {
        self.specs.iter().find(|s| s.matches(object_path))
    }

    /// Like [`find`](Self::find), as an error when nothing matches.
    ///
    /// # Errors
    /// [`ObjectError::NoMatchingSpec`].
    pub fn require(&self, object_path: &str) -> Result<&Arc<dyn ObjectSpec>, ObjectError> {
        self.find(object_path)
            .ok_or_else(|| ObjectError::NoMatchingSpec {
                object_path: object_path.to_owned(),
            })
    }

    /// Object path that owns `buffer_path` (both relative to the dataset
    /// root), or `None` when the buffer belongs to no object.
    ///
    /// A spec that reports a containing object path wins first. Otherwise
    /// the buffer is an object of its own if some spec matches it.
    #[must_use]
    pub fn belongs_to_object(&self, buffer_path: &str) -> Option<String> {
        self.specs
            .iter()
            .find_map(|s| s.containing_object_path(buffer_path))
            .or_else(|| self.find(buffer_path).map(|_| buffer_path.to_owned()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_spec_wins() {
        let registry = SpecRegistry::new(vec![
            Arc::new(DirectorySpec::new("/items")),
            Arc::new(JsonFileSpec),
        ]);
        assert_eq!(registry.find("/items/a").unwrap().name(), "directory");
        assert_eq!(registry.find("/a.json").unwrap().name(), "json");
        assert!(registry.find("/a.bin").is_none());
        assert!(matches!(
            registry.require("/a.bin"),
            Err(ObjectError::NoMatchingSpec { .. })
        ));
    }

    #[test]
    fn belongs_to_object_prefers_containing_path() {
        let registry = SpecRegistry::new(vec![
            Arc::new(DirectorySpec::new("/items")),
            Arc::new(JsonFileSpec),
        ]);
        assert_eq!(
            registry.belongs_to_object("/items/a/meta.json").as_deref(),
            Some("/items/a")
        );
        assert_eq!(
            registry.belongs_to_object("/people/b.json").as_deref(),
            Some("/people/b.json")
        );
        assert_eq!(registry.belongs_to_object("/README.md"), None);
    }

    #[test]
    fn debug_lists_spec_names() {
        assert_eq!(format!("{:?}", SpecRegistry::builtin()), r#"["json", "toml"]"#);
    }
}
