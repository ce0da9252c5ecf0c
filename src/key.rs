//! Blob keys and key normalization
//!
//! A [`BlobKey`] is the backend-independent name of a blob: forward-slash
//! separated, never starting with a separator. Keys produced on Windows
//! (`a\b.txt`) and on Unix (`/a/b.txt`) name the same object.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Canonicalize a raw key.
///
/// Backslashes become forward slashes, leading separators are stripped and
/// empty or `.` segments are dropped. A trailing separator is kept so that
/// directory-style prefixes survive. Idempotent.
pub fn normalize(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let segments: Vec<&str> = unified
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    let mut key = segments.join("/");
    if unified.ends_with('/') && !key.is_empty() {
        key.push('/');
    }
    key
}

/// A normalized blob key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobKey(String);

impl BlobKey {
    /// Normalize `raw` into a key
    pub fn new(raw: impl AsRef<str>) -> Self {
        BlobKey(normalize(raw.as_ref()))
    }

    /// Wrap a key exactly as a backend reported it.
    ///
    /// Object storage may hold names that normalize to something else
    /// (`logs//run.txt`); those must be addressed by their stored spelling.
    pub fn verbatim(stored: impl Into<String>) -> Self {
        BlobKey(stored.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this key falls under `prefix` (plain string-prefix semantics,
    /// the same rule object storage applies when listing)
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Whether this is a directory placeholder (`photos/`) rather than a blob
    pub fn is_dir_marker(&self) -> bool {
        self.0.ends_with('/')
    }

    /// Convert to a relative filesystem path.
    ///
    /// Fails for empty keys, directory markers, and keys with `..` segments,
    /// which would escape whatever directory the path is joined onto.
    pub fn to_relative_path(&self) -> Result<PathBuf> {
        if self.0.is_empty() || self.is_dir_marker() {
            return Err(Error::InvalidKey(format!("'{}' does not name a blob", self.0)));
        }

        let mut path = PathBuf::new();
        for segment in self.0.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                return Err(Error::InvalidKey(format!(
                    "'{}' escapes its root directory",
                    self.0
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Build a key from a path relative to some root directory
    pub fn from_relative_path(path: &Path) -> Option<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(BlobKey::new(parts.join("/")))
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.0)
    }
}

impl AsRef<str> for BlobKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlobKey {
    fn from(raw: &str) -> Self {
        BlobKey::new(raw)
    }
}

impl From<String> for BlobKey {
    fn from(raw: String) -> Self {
        BlobKey::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize("a\\b\\c.txt"), "a/b/c.txt");
        assert_eq!(normalize("/a/b.txt"), "a/b.txt");
        assert_eq!(normalize("\\\\a\\b.txt"), "a/b.txt");
        assert_eq!(normalize("a//b/./c"), "a/b/c");
        assert_eq!(normalize("builds/"), "builds/");
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "",
            "/",
            "a",
            "/a/b/",
            "\\a\\b",
            "./x//y/./z",
            "dir\\/file",
            "///lead/trail///",
            "a/../b",
        ];
        for raw in samples {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", raw);
            assert!(!once.starts_with('/'));
        }
    }

    #[test]
    fn test_relative_path_rejects_escape() {
        assert!(BlobKey::new("a/../../etc/passwd")
            .to_relative_path()
            .is_err());
        assert!(BlobKey::new("").to_relative_path().is_err());
        assert!(BlobKey::new("dir/").to_relative_path().is_err());

        let path = BlobKey::new("a/b.txt").to_relative_path().unwrap();
        assert_eq!(path, Path::new("a").join("b.txt"));
    }

    #[test]
    fn test_verbatim_keeps_stored_spelling() {
        let key = BlobKey::verbatim("logs//run.txt");
        assert_eq!(key.as_str(), "logs//run.txt");
        assert_ne!(key, BlobKey::new("logs//run.txt"));
        assert_eq!(
            key.to_relative_path().unwrap(),
            Path::new("logs").join("run.txt")
        );
        assert!(BlobKey::verbatim("x/../../y").to_relative_path().is_err());
    }

    #[test]
    fn test_dir_marker() {
        assert!(BlobKey::verbatim("ctx/").is_dir_marker());
        assert!(!BlobKey::new("ctx/file.txt").is_dir_marker());
    }

    #[test]
    fn test_from_relative_path() {
        let key = BlobKey::from_relative_path(&Path::new("a").join("b.txt")).unwrap();
        assert_eq!(key.as_str(), "a/b.txt");
        assert!(BlobKey::from_relative_path(Path::new("../x")).is_none());
    }
}
