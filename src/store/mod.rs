//! Blob stores
//!
//! [`Store`] is the capability set every backend implements: list, digest,
//! download, upload, upload from a local path. Two backends ship:
//!
//! - [`RemoteStore`]: object storage reached through an [`ObjectClient`]
//! - [`LocalStore`]: a directory tree on the local filesystem
//!
//! Backends are built once and shared by reference; they hold no per-call
//! mutable state, so calls on different keys may run concurrently. Two
//! concurrent writers to the same key race and the last rename wins.

mod index;
mod local;
pub mod remote;

pub use index::LocalContentIndex;
pub use local::LocalStore;
pub use remote::{HttpObjectClient, MockObjectClient, ObjectClient, RemoteStore};

use crate::digest::ContentDigest;
use crate::key::BlobKey;
use crate::Result;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};

/// How a download was satisfied
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Bytes were transferred from the backend
    Transferred { path: PathBuf },
    /// A local file with the same digest was copied instead
    Copied { path: PathBuf, source: PathBuf },
    /// The destination already held the same content
    Unchanged { path: PathBuf },
}

impl FetchOutcome {
    /// Destination path of the blob
    pub fn path(&self) -> &Path {
        match self {
            FetchOutcome::Transferred { path }
            | FetchOutcome::Copied { path, .. }
            | FetchOutcome::Unchanged { path } => path,
        }
    }

    /// Whether bytes crossed the backend boundary
    pub fn transferred(&self) -> bool {
        matches!(self, FetchOutcome::Transferred { .. })
    }
}

/// The storage capability set implemented by every backend
pub trait Store: Send + Sync {
    /// List every key starting with `prefix`, following pagination to the
    /// end. Order is unspecified. A failure on any page fails the whole call.
    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>>;

    /// Content digest of the blob at `key`
    fn remote_digest(&self, key: &BlobKey) -> Result<ContentDigest>;

    /// Download `key` to `dest_dir/key`.
    ///
    /// When `local_index` already holds a file with the blob's digest, that
    /// file is copied instead of transferring. The destination is written
    /// atomically and synced before this returns.
    fn download(
        &self,
        key: &BlobKey,
        dest_dir: &Path,
        local_index: &LocalContentIndex,
    ) -> Result<FetchOutcome>;

    /// Store the full content of `content` under `key`
    fn upload(&self, key: &BlobKey, content: &mut dyn Read) -> Result<()>;

    /// Store the file at `local_path` under `key` (normalized first)
    fn upload_from_path(&self, key: &str, local_path: &Path) -> Result<()>;
}

impl<T: Store + ?Sized> Store for Box<T> {
    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>> {
        (**self).list(prefix)
    }

    fn remote_digest(&self, key: &BlobKey) -> Result<ContentDigest> {
        (**self).remote_digest(key)
    }

    fn download(
        &self,
        key: &BlobKey,
        dest_dir: &Path,
        local_index: &LocalContentIndex,
    ) -> Result<FetchOutcome> {
        (**self).download(key, dest_dir, local_index)
    }

    fn upload(&self, key: &BlobKey, content: &mut dyn Read) -> Result<()> {
        (**self).upload(key, content)
    }

    fn upload_from_path(&self, key: &str, local_path: &Path) -> Result<()> {
        (**self).upload_from_path(key, local_path)
    }
}

/// Where `key` lands under `dest_dir`
pub(crate) fn destination_path(dest_dir: &Path, key: &BlobKey) -> Result<PathBuf> {
    Ok(dest_dir.join(key.to_relative_path()?))
}
