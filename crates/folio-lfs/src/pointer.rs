//! The LFS pointer file format (`version` / `oid sha256:` / `size` lines).

use std::fmt;

/// The only pointer spec version in use.
pub const SPEC_V1: &str = "https://git-lfs.github.com/spec/v1";

/// Pointer files are tiny; anything larger is real content.
const MAX_POINTER_LEN: usize = 1024;

/// A parsed LFS pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pointer {
    /// Lowercase hex SHA-256 of the content.
    pub oid: String,
    /// Content size in bytes.
    pub size: u64,
}

impl Pointer {
    /// Parse `data` as a pointer file. Returns `None` if it is not one.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_POINTER_LEN {
            return None;
        }
        let text = std::str::from_utf8(data).ok()?;
        let mut lines = text.lines();

        let version = lines.next()?.strip_prefix("version ")?;
        if version != SPEC_V1 {
            return None;
        }

        let mut oid = None;
        let mut size = None;
        for line in lines {
            if let Some(rest) = line.strip_prefix("oid sha256:") {
                oid = Some(rest);
            } else if let Some(rest) = line.strip_prefix("size ") {
                size = Some(rest.parse::<u64>().ok()?);
            }
        }

        let oid = oid?;
        if oid.len() != 64 || !oid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        Some(Self {
            oid: oid.to_owned(),
            size: size?,
        })
    }

    /// Encode the pointer in canonical form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version {SPEC_V1}")?;
        writeln!(f, "oid sha256:{}", self.oid)?;
        writeln!(f, "size {}", self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID: &str = "4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393";

    #[test]
    fn parses_canonical_pointer() {
        let text = format!("version {SPEC_V1}\noid sha256:{OID}\nsize 12345\n");
        let pointer = Pointer::parse(text.as_bytes()).unwrap();
        assert_eq!(pointer.oid, OID);
        assert_eq!(pointer.size, 12345);
        assert_eq!(pointer.encode(), text.into_bytes());
    }

    #[test]
    fn plain_content_is_not_a_pointer() {
        assert!(Pointer::parse(b"{\"title\": \"hello\"}").is_none());
        assert!(Pointer::parse(b"").is_none());
    }

    #[test]
    fn rejects_unknown_version() {
        let text = format!("version https://example.com/v9\noid sha256:{OID}\nsize 1\n");
        assert!(Pointer::parse(text.as_bytes()).is_none());
    }

    #[test]
    fn rejects_bad_oid_and_missing_size() {
        let short = format!("version {SPEC_V1}\noid sha256:abc\nsize 1\n");
        assert!(Pointer::parse(short.as_bytes()).is_none());
        let no_size = format!("version {SPEC_V1}\noid sha256:{OID}\n");
        assert!(Pointer::parse(no_size.as_bytes()).is_none());
    }
}
