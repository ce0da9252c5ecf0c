//! Object-storage-backed store
//!
//! [`RemoteStore`] holds the listing, digest and transfer logic; the wire
//! protocol sits behind [`ObjectClient`] so it can be swapped for
//! [`MockObjectClient`] in tests.

mod http;
mod mock;

pub use http::{HttpObjectClient, DEFAULT_PAGE_SIZE};
pub use mock::MockObjectClient;

use crate::cas;
use crate::digest::{ContentDigest, DigestWriter};
use crate::fsutil::{copy_file_atomic, write_atomic};
use crate::key::{normalize, BlobKey};
use crate::store::{destination_path, FetchOutcome, LocalContentIndex, Store};
use crate::{Error, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Errors surfaced by an [`ObjectClient`]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("object not found")]
    NotFound,

    #[error("{0}")]
    Transport(String),

    /// Failure writing to the caller's sink or reading the caller's body
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// One page of a listing
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Continuation token, present only while more pages remain
    pub next: Option<String>,
}

/// Object metadata from a HEAD request
#[derive(Clone, Debug, Default)]
pub struct ObjectHead {
    pub etag: Option<String>,
}

/// Minimal object-storage operations the remote store needs
pub trait ObjectClient: Send + Sync {
    /// Bucket name, used for display only
    fn bucket(&self) -> &str;

    fn list_page(&self, prefix: &str, continuation: Option<&str>) -> ClientResult<ListPage>;

    fn head_object(&self, key: &str) -> ClientResult<ObjectHead>;

    /// Stream the object into `sink`, returning the byte count
    fn get_object(&self, key: &str, sink: &mut dyn Write) -> ClientResult<u64>;

    /// Store `len` bytes read from `body`
    fn put_object(&self, key: &str, body: File, len: u64) -> ClientResult<()>;
}

/// A [`Store`] over networked object storage
pub struct RemoteStore<C> {
    client: C,
    label: String,
}

impl<C: ObjectClient> RemoteStore<C> {
    pub fn new(client: C) -> Self {
        let label = format!("s3://{}", client.bucket());
        RemoteStore { client, label }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn client_error(&self, key: &str, err: ClientError) -> Error {
        match err {
            ClientError::NotFound => Error::NotFound {
                backend: self.label.clone(),
                key: key.to_string(),
            },
            ClientError::Transport(message) => Error::Backend {
                backend: self.label.clone(),
                key: key.to_string(),
                message,
            },
            ClientError::Io(source) => self.transfer_error(key, source),
        }
    }

    fn transfer_error(&self, key: &str, source: io::Error) -> Error {
        Error::Transfer {
            backend: self.label.clone(),
            key: key.to_string(),
            source,
        }
    }

    fn put_file(&self, key: &BlobKey, file: File, len: u64) -> Result<()> {
        self.client
            .put_object(key.as_str(), file, len)
            .map_err(|e| self.client_error(key.as_str(), e))?;
        tracing::info!("Uploaded {} bytes to '{}/{}'", len, self.label, key);
        Ok(())
    }
}

impl<C: ObjectClient> Store for RemoteStore<C> {
    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>> {
        let prefix = normalize(prefix);
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .client
                .list_page(&prefix, token.as_deref())
                .map_err(|e| match e {
                    ClientError::NotFound => Error::Backend {
                        backend: self.label.clone(),
                        key: prefix.clone(),
                        message: "bucket not found".into(),
                    },
                    other => self.client_error(&prefix, other),
                })?;
            pages += 1;
            tracing::debug!(
                "Listed page {} of '{}/{}': {} keys",
                pages,
                self.label,
                prefix,
                page.keys.len()
            );

            keys.extend(page.keys.into_iter().map(BlobKey::verbatim));

            match page.next {
                None => break,
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(Error::Backend {
                        backend: self.label.clone(),
                        key: prefix,
                        message: format!("listing repeated continuation token '{}'", next),
                    });
                }
                Some(next) => token = Some(next),
            }
        }

        Ok(keys)
    }

    fn remote_digest(&self, key: &BlobKey) -> Result<ContentDigest> {
        let head = self
            .client
            .head_object(key.as_str())
            .map_err(|e| self.client_error(key.as_str(), e))?;

        if let Some(digest) = head.etag.as_deref().and_then(ContentDigest::from_etag) {
            return Ok(digest);
        }

        // Multipart or otherwise opaque tag: hash the content instead.
        tracing::debug!(
            "ETag {:?} of '{}/{}' is not a content hash, hashing object",
            head.etag,
            self.label,
            key
        );
        let mut writer = DigestWriter::new(io::sink());
        self.client
            .get_object(key.as_str(), &mut writer)
            .map_err(|e| self.client_error(key.as_str(), e))?;
        Ok(writer.finish().1)
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

        let bytes = write_atomic(&dest, |file| {
            self.client
                .get_object(key.as_str(), file)
                .map_err(|e| match e {
                    ClientError::Io(source) => Error::at_path(&dest, source),
                    other => self.client_error(key.as_str(), other),
                })
        })?;
        tracing::info!(
            "Downloaded {} bytes from '{}/{}' to '{}'",
            bytes,
            self.label,
            key,
            dest.display()
        );

        Ok(FetchOutcome::Transferred { path: dest })
    }

    fn upload(&self, key: &BlobKey, content: &mut dyn Read) -> Result<()> {
        // PutObject needs the content length up front, so spool the stream.
        let (file, len) = spool(content).map_err(|e| self.transfer_error(key.as_str(), e))?;
        self.put_file(key, file, len)
    }

    fn upload_from_path(&self, key: &str, local_path: &Path) -> Result<()> {
        let file = File::open(local_path).map_err(|e| Error::at_path(local_path, e))?;
        let len = file
            .metadata()
            .map_err(|e| Error::at_path(local_path, e))?
            .len();
        self.put_file(&BlobKey::new(key), file, len)
    }
}

/// Copy a stream into an anonymous temp file, rewound and ready to send
fn spool(content: &mut dyn Read) -> io::Result<(File, u64)> {
    let mut file = tempfile::tempfile()?;
    let len = io::copy(content, &mut file)?;
    file.seek(SeekFrom::Start(0))?;
    Ok((file, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn store_with(
        objects: &[(&str, &[u8])],
        page_size: usize,
    ) -> RemoteStore<MockObjectClient> {
        let client = MockObjectClient::new("bucket").with_page_size(page_size);
        for (key, data) in objects {
            client.insert(key, data.to_vec());
        }
        RemoteStore::new(client)
    }

    #[test]
    fn test_list_follows_pagination() {
        let objects: Vec<(String, Vec<u8>)> = (0..23)
            .map(|i| (format!("builds/{:02}.bin", i), vec![i as u8]))
            .collect();

        for page_size in [1, 5, 10, 23, 100] {
            let client = MockObjectClient::new("bucket").with_page_size(page_size);
            for (key, data) in &objects {
                client.insert(key, data.clone());
            }
            client.insert("other/skip.bin", b"x".to_vec());
            let store = RemoteStore::new(client);

            let mut keys = store.list("builds/").unwrap();
            keys.sort();
            keys.dedup();
            assert_eq!(keys.len(), 23, "page size {}", page_size);
            assert_eq!(
                store.client().list_calls(),
                23usize.div_ceil(page_size).max(1)
            );
        }
    }

    #[test]
    fn test_list_page_failure_discards_partial_results() {
        let store = store_with(&[("a", b"1"), ("b", b"2"), ("c", b"3")], 1);
        store.client().fail_list_page(2);

        let err = store.list("").unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[test]
    fn test_remote_digest_from_etag() {
        let store = store_with(&[("a/b.txt", b"hello")], 10);
        let digest = store.remote_digest(&BlobKey::new("a/b.txt")).unwrap();

        assert_eq!(digest, ContentDigest::of_bytes(b"hello"));
        assert_eq!(store.client().get_calls(), 0);
    }

    #[test]
    fn test_remote_digest_multipart_falls_back_to_hashing() {
        let store = store_with(&[("big.bin", b"hello")], 10);
        store.client().set_multipart_etags(true);

        let digest = store.remote_digest(&BlobKey::new("big.bin")).unwrap();
        assert_eq!(digest, ContentDigest::of_bytes(b"hello"));
        assert_eq!(store.client().get_calls(), 1);
    }

    #[test]
    fn test_remote_digest_missing_is_not_found() {
        let store = store_with(&[], 10);
        let err = store.remote_digest(&BlobKey::new("nope")).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("s3://bucket"));
    }

    #[test]
    fn test_download_writes_atomically() {
        let out = tempdir().unwrap();
        let store = store_with(&[("a/b.txt", b"hello")], 10);
        let dest = out.path().join("a/b.txt");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"stale").unwrap();

        store.client().fail_key("a/b.txt");
        assert!(store
            .download(&BlobKey::new("a/b.txt"), out.path(), &LocalContentIndex::new())
            .is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"stale");
        assert_eq!(fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);

        store.client().clear_failures();
        let outcome = store
            .download(&BlobKey::new("a/b.txt"), out.path(), &LocalContentIndex::new())
            .unwrap();
        assert!(outcome.transferred());
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
    }

    #[test]
    fn test_upload_and_upload_from_path() {
        let src = tempdir().unwrap();
        let store = store_with(&[], 10);

        store
            .upload(&BlobKey::new("x/y.txt"), &mut Cursor::new(b"streamed"))
            .unwrap();
        assert_eq!(store.client().object("x/y.txt").unwrap(), b"streamed");

        let local = src.path().join("file.txt");
        fs::write(&local, b"from disk").unwrap();
        store.upload_from_path("\\z\\file.txt", &local).unwrap();
        assert_eq!(store.client().object("z/file.txt").unwrap(), b"from disk");
        assert_eq!(store.client().put_calls(), 2);
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"))
        }
    }

    #[test]
    fn test_upload_read_failure_names_key_and_bucket() {
        let store = store_with(&[], 10);

        let err = store
            .upload(&BlobKey::new("x/y.txt"), &mut BrokenReader)
            .unwrap_err();

        assert!(matches!(err, Error::Transfer { .. }));
        let message = err.to_string();
        assert!(message.contains("x/y.txt"), "{}", message);
        assert!(message.contains("s3://bucket"), "{}", message);
        assert_eq!(store.client().put_calls(), 0);
    }
}
