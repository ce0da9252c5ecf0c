//! Filesystem-backed store rooted at a directory

use crate::cas;
use crate::digest::{digest_file, ContentDigest};
use crate::fsutil::{copy_file_atomic, walk_files, write_atomic};
use crate::key::{normalize, BlobKey};
use crate::store::{destination_path, FetchOutcome, LocalContentIndex, Store};
use crate::{Error, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// A store mirroring blobs as files under `root/key`.
///
/// There is no native integrity tag, so [`Store::remote_digest`] hashes the
/// whole file. That is far more expensive than a metadata lookup.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
    label: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let label = format!("file://{}", root.display());
        LocalStore { root, label }
    }

    /// Absolute path of the file backing `key`
    pub fn path_of(&self, key: &BlobKey) -> Result<PathBuf> {
        Ok(self.root.join(key.to_relative_path()?))
    }

    fn open(&self, key: &BlobKey) -> Result<(PathBuf, File)> {
        let path = self.path_of(key)?;
        match File::open(&path) {
            Ok(file) => Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound {
                backend: self.label.clone(),
                key: key.to_string(),
            }),
            Err(e) => Err(Error::at_path(path, e)),
        }
    }
}

impl Store for LocalStore {
    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>> {
        let prefix = normalize(prefix);

        // Walk only the deepest directory the prefix pins down, then apply
        // string-prefix matching like object storage does.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        if dir_part.split('/').any(|s| s == "..") {
            return Err(Error::InvalidKey(format!(
                "prefix '{}' escapes the store root",
                prefix
            )));
        }
        let walk_root = self.root.join(dir_part);

        let mut keys = Vec::new();
        for path in walk_files(&walk_root)? {
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            match BlobKey::from_relative_path(relative) {
                Some(key) if key.has_prefix(&prefix) => keys.push(key),
                Some(_) => {}
                None => tracing::warn!("Skipping non-UTF-8 path {}", path.display()),
            }
        }
        Ok(keys)
    }

    fn remote_digest(&self, key: &BlobKey) -> Result<ContentDigest> {
        let (path, _) = self.open(key)?;
        digest_file(&path)
    }

    fn download(
        &self,
        key: &BlobKey,
        dest_dir: &Path,
        local_index: &LocalContentIndex,
    ) -> Result<FetchOutcome> {
        let dest = destination_path(dest_dir, key)?;

        if let Some(source) = cas::indexed_copy(self, key, local_index)? {
            copy_file_atomic(&source, &dest)?;
            tracing::info!(
                "Copied existing local file '{}' to '{}'",
                source.display(),
                dest.display()
            );
            return Ok(FetchOutcome::Copied { path: dest, source });
        }

        let (source, mut file) = self.open(key)?;
        write_atomic(&dest, |out| {
            io::copy(&mut file, out).map_err(|e| Error::at_path(&source, e))
        })?;
        tracing::info!(
            "Copied '{}/{}' to '{}'",
            self.label,
            key,
            dest.display()
        );

        Ok(FetchOutcome::Transferred { path: dest })
    }

    fn upload(&self, key: &BlobKey, content: &mut dyn Read) -> Result<()> {
        let dest = self.path_of(key)?;
        let written = write_atomic(&dest, |out| {
            io::copy(content, out).map_err(|source| Error::Transfer {
                backend: self.label.clone(),
                key: key.to_string(),
                source,
            })
        })?;
        tracing::info!("Stored {} bytes at '{}/{}'", written, self.label, key);
        Ok(())
    }

    fn upload_from_path(&self, key: &str, local_path: &Path) -> Result<()> {
        let mut file = File::open(local_path).map_err(|e| Error::at_path(local_path, e))?;
        self.upload(&BlobKey::new(key), &mut file)
    }
}
