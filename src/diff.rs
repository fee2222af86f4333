//! Change classification between two snapshots.
//!
//! [`diff`] walks a sequence of paths, reads both sides of each through a
//! caller-supplied reader, and yields the paths whose values differ. Callers
//! decide what "side A" and "side B" mean: the commit pipeline compares the
//! caller's expected old values against what is on disk now.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// How a path differs between side A and side B.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Absent on A, present on B.
    Added,
    /// Present on A, absent on B.
    Removed,
    /// Present on both, not equal.
    Modified,
    /// Present on both, equal.
    Unchanged,
}

impl ChangeStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged",
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one pair. `None` when both sides are absent.
pub fn classify<T: ?Sized>(
    a: Option<&T>,
    b: Option<&T>,
    eq: impl FnOnce(&T, &T) -> bool,
) -> Option<ChangeStatus> {
    match (a, b) {
        (None, None) => None,
        (None, Some(_)) => Some(ChangeStatus::Added),
        (Some(_), None) => Some(ChangeStatus::Removed),
        (Some(a), Some(b)) if eq(a, b) => Some(ChangeStatus::Unchanged),
        (Some(_), Some(_)) => Some(ChangeStatus::Modified),
    }
}

/// Lazily diff `paths`.
///
/// `read` returns `(side_a, side_b)` for a path. Unchanged paths are skipped
/// unless `include_unchanged` is set. A path absent on both sides yields
/// [`Error::AbsentOnBothSides`]. Reader errors are yielded as-is; the
/// iterator may be resumed after either.
pub fn diff<T, I, R, Q>(
    paths: I,
    mut read: R,
    eq: Q,
    include_unchanged: bool,
) -> impl Iterator<Item = Result<(String, ChangeStatus)>>
where
    I: IntoIterator<Item = String>,
    R: FnMut(&str) -> Result<(Option<T>, Option<T>)>,
    Q: Fn(&T, &T) -> bool,
{
    paths.into_iter().filter_map(move |path| {
        let (a, b) = match read(&path) {
            Ok(pair) => pair,
            Err(e) => return Some(Err(e)),
        };
        match classify(a.as_ref(), b.as_ref(), &eq) {
            None => Some(Err(Error::AbsentOnBothSides { path })),
            Some(ChangeStatus::Unchanged) if !include_unchanged => None,
            Some(status) => Some(Ok((path, status))),
        }
    })
}

/// Byte equality of two buffers.
#[must_use]
pub fn buffers_equal(a: &[u8], b: &[u8]) -> bool {
    a == b
}

/// Structural equality of two objects via their canonical serialization.
#[must_use]
pub fn objects_equal(a: &Value, b: &Value) -> bool {
    canonical_json(a) == canonical_json(b)
}

/// Compact JSON with object keys in sorted order at every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn classify_covers_all_pairs() {
        let eq = |a: &i32, b: &i32| a == b;
        assert_eq!(classify(None, Some(&1), eq), Some(ChangeStatus::Added));
        assert_eq!(classify(Some(&1), None, eq), Some(ChangeStatus::Removed));
        assert_eq!(classify(Some(&1), Some(&2), eq), Some(ChangeStatus::Modified));
        assert_eq!(classify(Some(&1), Some(&1), eq), Some(ChangeStatus::Unchanged));
        assert_eq!(classify::<i32>(None, None, eq), None);
    }

    #[test]
    fn canonical_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":[3,{"q":1,"p":2}]}}"#).unwrap();
        let b = json!({"a": {"x": [3, {"p": 2, "q": 1}], "y": 2}, "b": 1});
        assert!(objects_equal(&a, &b));
        assert_eq!(canonical_json(&b), r#"{"a":{"x":[3,{"p":2,"q":1}],"y":2},"b":1}"#);
        assert!(!objects_equal(&json!({"a": 1}), &json!({"a": 2})));
    }

    #[test]
    fn diff_skips_unchanged_and_flags_double_absence() {
        let a: BTreeMap<&str, i32> = [("/same", 1), ("/mod", 1), ("/gone", 1)].into();
        let b: BTreeMap<&str, i32> = [("/same", 1), ("/mod", 2), ("/new", 1)].into();
        let paths = ["/same", "/mod", "/gone", "/new", "/nowhere"].map(String::from);

        let results: Vec<_> = diff(
            paths,
            |p| Ok((a.get(p).copied(), b.get(p).copied())),
            |x: &i32, y: &i32| x == y,
            false,
        )
        .collect();

        assert_eq!(results.len(), 4);
        assert_eq!(
            results[..3]
                .iter()
                .map(|r| r.as_ref().unwrap().clone())
                .collect::<Vec<_>>(),
            vec![
                ("/mod".to_owned(), ChangeStatus::Modified),
                ("/gone".to_owned(), ChangeStatus::Removed),
                ("/new".to_owned(), ChangeStatus::Added),
            ]
        );
        assert!(matches!(
            results[3],
            Err(Error::AbsentOnBothSides { ref path }) if path == "/nowhere"
        ));
    }

    #[test]
    fn diff_can_include_unchanged() {
        let results: Vec<_> = diff(
            vec!["/x".to_owned()],
            |_| Ok((Some(b"a".to_vec()), Some(b"a".to_vec()))),
            |x: &Vec<u8>, y: &Vec<u8>| buffers_equal(x, y),
            true,
        )
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(results, vec![("/x".to_owned(), ChangeStatus::Unchanged)]);
    }
}
