//! Digest → local path index used to short-circuit downloads

use crate::digest::{digest_file, ContentDigest};
use crate::fsutil::walk_files;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Known-good local copies of content, keyed by digest.
///
/// Owned by the caller and only ever read by the stores. Serializable so a
/// caller can keep it between runs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocalContentIndex {
    entries: HashMap<ContentDigest, PathBuf>,
}

impl LocalContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every file under `dir` by hashing its full content.
    ///
    /// When several files share a digest, the first one visited is kept.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut index = Self::new();
        for path in walk_files(dir)? {
            let digest = digest_file(&path)?;
            index.entries.entry(digest).or_insert(path);
        }
        tracing::debug!(
            "Indexed {} distinct blobs under {}",
            index.len(),
            dir.display()
        );
        Ok(index)
    }

    /// Record a local copy, replacing any previous path for the digest
    pub fn insert(&mut self, digest: ContentDigest, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.entries.insert(digest, path.into())
    }

    pub fn get(&self, digest: &ContentDigest) -> Option<&Path> {
        self.entries.get(digest).map(PathBuf::as_path)
    }

    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ContentDigest, PathBuf)> for LocalContentIndex {
    fn from_iter<I: IntoIterator<Item = (ContentDigest, PathBuf)>>(iter: I) -> Self {
        LocalContentIndex {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_indexes_by_content() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("one.txt"), b"hello").unwrap();
        fs::write(dir.path().join("nested/two.txt"), b"world").unwrap();
        fs::write(dir.path().join("nested/dup.txt"), b"hello").unwrap();

        let index = LocalContentIndex::scan(dir.path()).unwrap();
        assert_eq!(index.len(), 2);

        let hello = index.get(&ContentDigest::of_bytes(b"hello")).unwrap();
        assert_eq!(fs::read(hello).unwrap(), b"hello");
        assert!(index.contains(&ContentDigest::of_bytes(b"world")));
        assert!(!index.contains(&ContentDigest::of_bytes(b"missing")));
    }

    #[test]
    fn test_index_json_roundtrip() {
        let index: LocalContentIndex = [(
            ContentDigest::of_bytes(b"x"),
            PathBuf::from("/tmp/x"),
        )]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&index).unwrap();
        assert!(json.contains(&ContentDigest::of_bytes(b"x").to_hex()));
        let restored: LocalContentIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(
            restored.get(&ContentDigest::of_bytes(b"x")),
            Some(Path::new("/tmp/x"))
        );
    }
}
