//! Reading objects from buffers and writing them back.

use std::collections::BTreeMap;
use std::path::Path;

use folio_git::GitRepo;
use folio_lfs::LfsResolver;

use super::{BufferDataset, ObjectData, ObjectError, ObjectSpec, SpecRegistry};
use crate::buffer::{self, version};
use crate::error::Result;
use crate::paths;

/// Map buffer paths (relative to the dataset root) to the object paths that
/// own them, dropping buffers no spec claims.
///
/// Adjacent duplicates are collapsed, so the files of one directory object
/// produce its path once when the input is in walk order.
pub fn list_object_paths<'a, I>(
    buffer_paths: I,
    specs: &'a SpecRegistry,
) -> impl Iterator<Item = Result<String>> + 'a
where
    I: IntoIterator<Item = Result<String>>,
    I::IntoIter: 'a,
{
    let mut last: Option<String> = None;
    buffer_paths.into_iter().filter_map(move |item| match item {
        Err(e) => Some(Err(e)),
        Ok(buffer_path) => {
            let object_path = specs.belongs_to_object(&buffer_path)?;
            if last.as_deref() == Some(object_path.as_str()) {
                return None;
            }
            last = Some(object_path.clone());
            Some(Ok(object_path))
        }
    })
}

fn deserialize(
    spec: &dyn ObjectSpec,
    object_path: &str,
    buffers: &BufferDataset,
) -> Result<Option<ObjectData>> {
    if buffers.is_empty() {
        return Ok(None);
    }
    spec.deserialize(buffers)
        .map(Some)
        .map_err(|source| {
            ObjectError::Deserialize {
                object_path: object_path.to_owned(),
                spec: spec.name().to_owned(),
                source,
            }
            .into()
        })
}

/// Read an object straight from the working tree, bypassing any index.
///
/// No buffers under the object path means `Ok(None)`. Buffers that exist but
/// do not parse are an error, never `None`. With a resolver, LFS pointer
/// files are replaced by their content before the spec sees them.
///
/// # Errors
/// No matching spec, I/O failures, LFS resolution failures, and spec
/// deserialization failures.
pub fn read_object_cold(
    dataset_root: &Path,
    object_path: &str,
    specs: &SpecRegistry,
    lfs: Option<&dyn LfsResolver>,
) -> Result<Option<ObjectData>> {
    let spec = specs.require(object_path)?;
    let object_root = paths::to_fs_path(dataset_root, object_path);
    let mut buffers = BufferDataset::new();
    for relative in buffer::list_descendant_paths(&object_root)? {
        let relative = relative?;
        let Some(bytes) = buffer::read_buffer(&object_root, &relative)? else {
            continue;
        };
        let bytes = match lfs {
            Some(resolver) => folio_lfs::resolve_if_pointer(resolver, bytes)?,
            None => bytes,
        };
        buffers.insert(relative, bytes);
    }
    deserialize(spec.as_ref(), object_path, &buffers)
}

/// Read an object as of a commit.
///
/// # Errors
/// No matching spec, an unresolvable commit, object store failures, and spec
/// deserialization failures.
pub fn read_object_at_version(
    repo: &dyn GitRepo,
    dataset_dir: &str,
    object_path: &str,
    commit: &str,
    specs: &SpecRegistry,
) -> Result<Option<ObjectData>> {
    let spec = specs.require(object_path)?;
    let root = paths::dataset_buffer_path(dataset_dir, object_path);
    let buffers = version::read_buffers_at_version(repo, commit, &root)?;
    deserialize(spec.as_ref(), object_path, &buffers)
}

/// Serialize objects into buffers keyed by working-copy buffer path.
///
/// # Errors
/// No matching spec for an object path, or a spec refusing an object.
pub fn to_buffer_dataset<'a>(
    dataset_dir: &str,
    objects: impl IntoIterator<Item = (&'a str, &'a ObjectData)>,
    specs: &SpecRegistry,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut out = BTreeMap::new();
    for (object_path, object) in objects {
        let spec = specs.require(object_path)?;
        let buffers = spec
            .serialize(object)
            .map_err(|source| ObjectError::Serialize {
                object_path: object_path.to_owned(),
                spec: spec.name().to_owned(),
                source,
            })?;
        let object_buffer_path = paths::dataset_buffer_path(dataset_dir, object_path);
        for (relative, bytes) in buffers {
            out.insert(paths::join(&object_buffer_path, &relative), bytes);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::object::{DirectorySpec, JsonFileSpec};

    fn registry() -> SpecRegistry {
        SpecRegistry::new(vec![
            Arc::new(DirectorySpec::new("/items")),
            Arc::new(JsonFileSpec),
        ])
    }

    #[test]
    fn object_paths_skip_unclaimed_and_collapse_directories() {
        let specs = registry();
        let input = ["/a.json", "/items/x/1.json", "/items/x/2.txt", "/notes.md", "/b.json"]
            .map(|p| Ok(p.to_owned()));
        let out: Vec<String> = list_object_paths(input, &specs)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out, vec!["/a.json", "/items/x", "/b.json"]);
    }

    #[test]
    fn cold_read_distinguishes_absence_from_corruption() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.json"), r#"{"a":1}"#).unwrap();
        fs::write(dir.path().join("bad.json"), "{oops").unwrap();
        let specs = registry();

        assert_eq!(
            read_object_cold(dir.path(), "/good.json", &specs, None).unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            read_object_cold(dir.path(), "/missing.json", &specs, None).unwrap(),
            None
        );
        let err = read_object_cold(dir.path(), "/bad.json", &specs, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Object(ObjectError::Deserialize { ref spec, .. }) if spec == "json"
        ));
    }

    #[test]
    fn cold_read_requires_a_spec() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_object_cold(dir.path(), "/x.bin", &registry(), None).unwrap_err();
        assert!(matches!(err, Error::Object(ObjectError::NoMatchingSpec { .. })));
    }

    #[test]
    fn cold_read_assembles_directory_objects() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("items/x")).unwrap();
        fs::write(dir.path().join("items/x/meta.json"), "[1]").unwrap();
        fs::write(dir.path().join("items/x/body.txt"), "text").unwrap();
        let object = read_object_cold(dir.path(), "/items/x", &registry(), None)
            .unwrap()
            .unwrap();
        assert_eq!(object, json!({"/meta.json": [1], "/body.txt": "text"}));
    }

    #[test]
    fn buffer_dataset_is_prefixed_with_dataset_dir() {
        let a = json!({"n": 1});
        let dir_obj = json!({"/meta.json": {}});
        let out = to_buffer_dataset(
            "data",
            [("/a.json", &a), ("/items/x", &dir_obj)],
            &registry(),
        )
        .unwrap();
        assert_eq!(
            out.keys().collect::<Vec<_>>(),
            vec!["/data/a.json", "/data/items/x/meta.json"]
        );
    }
}
