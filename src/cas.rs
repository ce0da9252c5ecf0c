//! Content-addressed transfer layer
//!
//! [`ContentStore`] wraps any [`Store`] and compares digests before moving
//! bytes. A download whose content is already on disk (at the destination, or
//! anywhere in the caller's [`LocalContentIndex`]) becomes a local copy; a
//! publish whose content already sits at the key becomes a no-op.
//!
//! Digest lookups are best effort. When a backend cannot produce a digest the
//! transfer simply goes ahead, except for "not found", which is returned as is
//! since there is nothing to fetch.

use crate::digest::{digest_file, ContentDigest, DigestWriter};
use crate::fsutil::{copy_file_atomic, walk_files};
use crate::key::BlobKey;
use crate::store::{destination_path, FetchOutcome, LocalContentIndex, Store};
use crate::{Error, Result};
use serde::Serialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Look up `key`'s digest, downgrading lookup failures to `None`
fn lookup_digest<S: Store + ?Sized>(
    store: &S,
    key: &BlobKey,
) -> Result<Option<ContentDigest>> {
    match store.remote_digest(key) {
        Ok(digest) => Ok(Some(digest)),
        Err(e) if e.is_not_found() => Err(e),
        Err(e) => {
            tracing::warn!(
                "Error getting digest for '{}', proceeding without dedup: {}",
                key,
                e
            );
            Ok(None)
        }
    }
}

fn indexed_source(index: &LocalContentIndex, digest: &ContentDigest) -> Option<PathBuf> {
    let source = index.get(digest)?;
    if source.is_file() {
        Some(source.to_path_buf())
    } else {
        tracing::warn!(
            "Indexed file '{}' for {} is gone, ignoring",
            source.display(),
            digest
        );
        None
    }
}

/// Find a local file that can stand in for downloading `key`.
///
/// Skips the digest lookup entirely when the index is empty.
pub(crate) fn indexed_copy<S: Store + ?Sized>(
    store: &S,
    key: &BlobKey,
    index: &LocalContentIndex,
) -> Result<Option<PathBuf>> {
    if index.is_empty() {
        return Ok(None);
    }
    Ok(lookup_digest(store, key)?.and_then(|digest| indexed_source(index, &digest)))
}

/// Result of a publish
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Content was sent to the backend
    Uploaded { key: BlobKey },
    /// The key already held this content; nothing was sent
    Unchanged { key: BlobKey, digest: ContentDigest },
}

impl PublishOutcome {
    pub fn key(&self) -> &BlobKey {
        match self {
            PublishOutcome::Uploaded { key } | PublishOutcome::Unchanged { key, .. } => key,
        }
    }

    pub fn uploaded(&self) -> bool {
        matches!(self, PublishOutcome::Uploaded { .. })
    }
}

/// Result of a batch download
///
/// Per-key failures are collected rather than aborting the batch.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub fetched: Vec<(BlobKey, FetchOutcome)>,
    pub failed: Vec<(BlobKey, Error)>,
}

impl FetchReport {
    pub fn transferred(&self) -> usize {
        self.fetched.iter().filter(|(_, o)| o.transferred()).count()
    }

    pub fn copied(&self) -> usize {
        self.fetched
            .iter()
            .filter(|(_, o)| matches!(o, FetchOutcome::Copied { .. }))
            .count()
    }

    pub fn unchanged(&self) -> usize {
        self.fetched
            .iter()
            .filter(|(_, o)| matches!(o, FetchOutcome::Unchanged { .. }))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a directory publish
#[derive(Debug, Default)]
pub struct PublishReport {
    pub published: Vec<PublishOutcome>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl PublishReport {
    pub fn uploaded(&self) -> usize {
        self.published.iter().filter(|o| o.uploaded()).count()
    }

    pub fn unchanged(&self) -> usize {
        self.published.len() - self.uploaded()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Dedup-aware wrapper around a backend
pub struct ContentStore<S> {
    inner: S,
}

impl<S: Store> ContentStore<S> {
    pub fn new(inner: S) -> Self {
        ContentStore { inner }
    }

    /// The wrapped backend
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn list(&self, prefix: &str) -> Result<Vec<BlobKey>> {
        self.inner.list(prefix)
    }

    pub fn remote_digest(&self, key: &BlobKey) -> Result<ContentDigest> {
        self.inner.remote_digest(key)
    }

    /// Fetch `key` into `dest_dir/key`, moving as few bytes as possible.
    ///
    /// 1. With `overwrite` off, a destination already holding the blob's
    ///    digest is left alone.
    /// 2. A file in `local_index` with the blob's digest is copied over.
    /// 3. Otherwise the backend transfers the blob.
    pub fn fetch(
        &self,
        key: &BlobKey,
        dest_dir: &Path,
        local_index: &LocalContentIndex,
        overwrite: bool,
    ) -> Result<FetchOutcome> {
        let dest = destination_path(dest_dir, key)?;
        let dest_exists = dest.is_file();

        let digest = if local_index.is_empty() && (overwrite || !dest_exists) {
            None
        } else {
            lookup_digest(&self.inner, key)?
        };

        if let Some(digest) = digest {
            if !overwrite
                && dest_exists
                && matches!(digest_file(&dest), Ok(local) if local == digest)
            {
                tracing::info!(
                    "File '{}' already up to date, skipping download",
                    dest.display()
                );
                return Ok(FetchOutcome::Unchanged { path: dest });
            }

            if let Some(source) = indexed_source(local_index, &digest) {
                copy_file_atomic(&source, &dest)?;
                tracing::info!(
                    "Copied existing local file '{}' to '{}'",
                    source.display(),
                    dest.display()
                );
                return Ok(FetchOutcome::Copied { path: dest, source });
            }
        }

        // Dedup was already decided above; keep the backend from repeating it.
        self.inner.download(key, dest_dir, &LocalContentIndex::new())
    }

    /// Fetch every key under `prefix`.
    ///
    /// Only a listing failure fails the call; per-key failures are recorded
    /// in the report and the batch carries on. Directory markers (keys ending
    /// in `/`) hold no content and are skipped.
    pub fn fetch_all(
        &self,
        prefix: &str,
        dest_dir: &Path,
        local_index: &LocalContentIndex,
        overwrite: bool,
    ) -> Result<FetchReport> {
        let keys = self.inner.list(prefix)?;
        tracing::info!("Fetching {} blobs under '{}'", keys.len(), prefix);

        let mut report = FetchReport::default();
        for key in keys {
            if key.is_dir_marker() {
                tracing::debug!("Skipping directory marker '{}'", key);
                continue;
            }
            match self.fetch(&key, dest_dir, local_index, overwrite) {
                Ok(outcome) => report.fetched.push((key, outcome)),
                Err(e) => {
                    tracing::error!("Failed to fetch '{}': {}", key, e);
                    report.failed.push((key, e));
                }
            }
        }
        Ok(report)
    }

    /// Publish a stream under `key`.
    ///
    /// With `overwrite` off, the stream is spooled and hashed first and the
    /// upload is skipped when the key already holds the same digest. With
    /// `overwrite` on, the content is always sent.
    ///
    /// Only the target key is compared. The same content sitting under some
    /// other key or in a local index does not count as published here.
    pub fn publish(
        &self,
        key: &BlobKey,
        content: &mut dyn Read,
        overwrite: bool,
    ) -> Result<PublishOutcome> {
        if overwrite {
            self.inner.upload(key, content)?;
            return Ok(PublishOutcome::Uploaded { key: key.clone() });
        }

        let spool = tempfile::NamedTempFile::new()?;
        let mut writer = DigestWriter::new(spool);
        io::copy(content, &mut writer)?;
        tracing::debug!("Spooled {} bytes for '{}'", writer.written(), key);
        let (spool, digest) = writer.finish();

        if let Some(existing) = self.existing_digest(key)? {
            if existing == digest {
                tracing::info!("'{}' already holds {}, skipping upload", key, digest);
                return Ok(PublishOutcome::Unchanged {
                    key: key.clone(),
                    digest,
                });
            }
        }

        self.inner.upload_from_path(key.as_str(), spool.path())?;
        Ok(PublishOutcome::Uploaded { key: key.clone() })
    }

    /// Publish the file at `local_path` under `key` (normalized first)
    pub fn publish_from_path(
        &self,
        key: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> Result<PublishOutcome> {
        let key = BlobKey::new(key);

        if !overwrite {
            let digest = digest_file(local_path)?;
            if self.existing_digest(&key)? == Some(digest) {
                tracing::info!("'{}' already holds {}, skipping upload", key, digest);
                return Ok(PublishOutcome::Unchanged { key, digest });
            }
        }

        self.inner.upload_from_path(key.as_str(), local_path)?;
        Ok(PublishOutcome::Uploaded { key })
    }

    /// Publish every file under `dir` as `key_prefix/<relative path>`.
    ///
    /// Files are sent one at a time; failures are recorded per file.
    pub fn publish_dir(
        &self,
        dir: &Path,
        key_prefix: &str,
        overwrite: bool,
    ) -> Result<PublishReport> {
        if !dir.is_dir() {
            return Err(Error::at_path(
                dir,
                io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let mut report = PublishReport::default();
        for path in walk_files(dir)? {
            let relative = match path
                .strip_prefix(dir)
                .ok()
                .and_then(BlobKey::from_relative_path)
            {
                Some(relative) => relative,
                None => {
                    let err = Error::InvalidKey(format!("cannot name '{}'", path.display()));
                    report.failed.push((path, err));
                    continue;
                }
            };
            let key = format!("{}/{}", key_prefix.trim_end_matches(['/', '\\']), relative);

            match self.publish_from_path(&key, &path, overwrite) {
                Ok(outcome) => report.published.push(outcome),
                Err(e) => {
                    tracing::error!("Failed to publish '{}': {}", path.display(), e);
                    report.failed.push((path, e));
                }
            }
        }
        Ok(report)
    }

    // Digest currently stored at `key`, if any. Lookup failures other than
    // "not found" are logged and treated as unknown, so the upload proceeds.
    fn existing_digest(&self, key: &BlobKey) -> Result<Option<ContentDigest>> {
        match self.inner.remote_digest(key) {
            Ok(digest) => Ok(Some(digest)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => {
                tracing::warn!(
                    "Error getting digest for '{}', uploading anyway: {}",
                    key,
                    e
                );
                Ok(None)
            }
        }
    }
}
