//! Stock object specs.

use serde_json::{Map, Value};

use super::{BufferDataset, ObjectData, ObjectSpec, SpecError};
use crate::paths;

fn single_buffer(buffers: &BufferDataset) -> Result<&[u8], SpecError> {
    match buffers.get("/") {
        Some(bytes) if buffers.len() == 1 => Ok(bytes),
        _ => Err("expected exactly one file".into()),
    }
}

fn has_extension(path: &str, extension: &str) -> bool {
    path.rsplit('/')
        .next()
        .and_then(|name| name.strip_suffix(extension))
        .is_some_and(|stem| !stem.is_empty())
}

fn pretty_json(value: &Value) -> Result<Vec<u8>, SpecError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// One object per `.json` file.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFileSpec;

impl ObjectSpec for JsonFileSpec {
    fn name(&self) -> &str {
        "json"
    }

    fn matches(&self, object_path: &str) -> bool {
        has_extension(object_path, ".json")
    }

    fn serialize(&self, object: &ObjectData) -> Result<BufferDataset, SpecError> {
        Ok(BufferDataset::from([("/".to_owned(), pretty_json(object)?)]))
    }

    fn deserialize(&self, buffers: &BufferDataset) -> Result<ObjectData, SpecError> {
        Ok(serde_json::from_slice(single_buffer(buffers)?)?)
    }
}

/// One object per `.toml` file. Objects must be tables.
#[derive(Clone, Copy, Debug, Default)]
pub struct TomlFileSpec;

impl ObjectSpec for TomlFileSpec {
    fn name(&self) -> &str {
        "toml"
    }

    fn matches(&self, object_path: &str) -> bool {
        has_extension(object_path, ".toml")
    }

    fn serialize(&self, object: &ObjectData) -> Result<BufferDataset, SpecError> {
        if !object.is_object() {
            return Err("TOML objects must be tables".into());
        }
        let text = toml::to_string_pretty(object)?;
        Ok(BufferDataset::from([("/".to_owned(), text.into_bytes())]))
    }

    fn deserialize(&self, buffers: &BufferDataset) -> Result<ObjectData, SpecError> {
        let text = std::str::from_utf8(single_buffer(buffers)?)?;
        Ok(toml::from_str(text)?)
    }
}

/// One object per immediate subdirectory of `prefix`.
///
/// The object is a map from file path (relative to the object directory) to
/// content: parsed JSON for `.json` files, a string for everything else.
#[derive(Clone, Debug)]
pub struct DirectorySpec {
    prefix: String,
}

impl DirectorySpec {
    /// `prefix` is relative to the dataset root, e.g. `/items`.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }
}

impl ObjectSpec for DirectorySpec {
    fn name(&self) -> &str {
        "directory"
    }

    fn matches(&self, object_path: &str) -> bool {
        paths::strip_prefix(&self.prefix, object_path)
            .is_some_and(|rest| rest.len() > 1 && !rest[1..].contains('/'))
    }

    fn containing_object_path(&self, buffer_path: &str) -> Option<String> {
        let rest = paths::strip_prefix(&self.prefix, buffer_path)?;
        let (object, below) = rest.get(1..)?.split_once('/')?;
        if object.is_empty() || below.is_empty() {
            return None;
        }
        Some(paths::join(&self.prefix, &format!("/{object}")))
    }

    fn serialize(&self, object: &ObjectData) -> Result<BufferDataset, SpecError> {
        let files = object
            .as_object()
            .ok_or("directory objects must be maps of file path to content")?;
        let mut out = BufferDataset::new();
        for (path, content) in files {
            if !path.starts_with('/') || path == "/" {
                return Err(format!("file key `{path}` must be a slash path below the object").into());
            }
            let bytes = if has_extension(path, ".json") {
                pretty_json(content)?
            } else {
                content
                    .as_str()
                    .ok_or_else(|| format!("file `{path}` must hold a string"))?
                    .as_bytes()
                    .to_vec()
            };
            out.insert(path.clone(), bytes);
        }
        Ok(out)
    }

    fn deserialize(&self, buffers: &BufferDataset) -> Result<ObjectData, SpecError> {
        let mut files = Map::new();
        for (path, bytes) in buffers {
            let value = if has_extension(path, ".json") {
                serde_json::from_slice(bytes)?
            } else {
                Value::String(
                    String::from_utf8(bytes.clone())
                        .map_err(|_| format!("file `{path}` is not UTF-8"))?,
                )
            };
            files.insert(path.clone(), value);
        }
        Ok(Value::Object(files))
    }
}
