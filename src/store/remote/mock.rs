//! In-memory object client for testing

use super::{ClientError, ClientResult, ListPage, ObjectClient, ObjectHead};
use crate::digest::ContentDigest;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An object client that keeps objects in memory
///
/// Behaves like an S3 bucket: keys are listed in lexical order, pages hold at
/// most `page_size` keys and ETags are the quoted MD5 of the content. Every
/// call is counted so tests can assert whether a transfer happened.
pub struct MockObjectClient {
    bucket: String,
    page_size: usize,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    failing_keys: RwLock<HashSet<String>>,
    failing_list_page: AtomicUsize,
    multipart_etags: AtomicBool,
    list_calls: AtomicUsize,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MockObjectClient {
    /// Create an empty bucket with a page size of 1000
    pub fn new(bucket: impl Into<String>) -> Self {
        MockObjectClient {
            bucket: bucket.into(),
            page_size: 1000,
            objects: RwLock::new(BTreeMap::new()),
            failing_keys: RwLock::new(HashSet::new()),
            failing_list_page: AtomicUsize::new(0),
            multipart_etags: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            head_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Put an object without counting it as an upload
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.write().insert(key.to_string(), data);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(key).cloned()
    }

    /// Make head/get/put on `key` fail with a transport error
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().insert(key.to_string());
    }

    /// Make the `n`th listing call (1-based) fail
    pub fn fail_list_page(&self, n: usize) {
        self.failing_list_page.store(n, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        self.failing_keys.write().clear();
        self.failing_list_page.store(0, Ordering::SeqCst);
    }

    /// Report ETags the way multipart uploads do (`"<hex>-<parts>"`)
    pub fn set_multipart_etags(&self, enabled: bool) {
        self.multipart_etags.store(enabled, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn check_key(&self, key: &str) -> ClientResult<()> {
        if self.failing_keys.read().contains(key) {
            return Err(ClientError::Transport(format!(
                "connection reset while accessing '{}'",
                key
            )));
        }
        Ok(())
    }

    fn etag_for(&self, data: &[u8]) -> String {
        let digest = ContentDigest::of_bytes(data);
        if self.multipart_etags.load(Ordering::SeqCst) {
            // Multipart tags hash the part digests, not the content
            let over_parts = ContentDigest::of_bytes(digest.as_bytes());
            format!("\"{}-1\"", over_parts)
        } else {
            format!("\"{}\"", digest)
        }
    }
}

impl ObjectClient for MockObjectClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_page(&self, prefix: &str, continuation: Option<&str>) -> ClientResult<ListPage> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_list_page.load(Ordering::SeqCst) == call {
            return Err(ClientError::Transport(format!(
                "listing page {} timed out",
                call
            )));
        }

        let objects = self.objects.read();
        let start = match continuation {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .map(|(k, _)| k)
            .filter(|k| k.starts_with(prefix));

        let keys: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let more = matching.next().is_some();

        Ok(ListPage {
            next: if more { keys.last().cloned() } else { None },
            keys,
        })
    }

    fn head_object(&self, key: &str) -> ClientResult<ObjectHead> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.check_key(key)?;

        let objects = self.objects.read();
        let data = objects.get(key).ok_or(ClientError::NotFound)?;
        Ok(ObjectHead {
            etag: Some(self.etag_for(data)),
        })
    }

    fn get_object(&self, key: &str, sink: &mut dyn Write) -> ClientResult<u64> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let data = self.object(key).ok_or(ClientError::NotFound)?;

        if self.failing_keys.read().contains(key) {
            // Deliver half the body before the connection drops
            sink.write_all(&data[..data.len() / 2])?;
            return self.check_key(key).map(|_| 0);
        }

        sink.write_all(&data)?;
        Ok(data.len() as u64)
    }

    fn put_object(&self, key: &str, mut body: File, len: u64) -> ClientResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_key(key)?;

        let mut data = Vec::with_capacity(len as usize);
        body.read_to_end(&mut data)?;
        if data.len() as u64 != len {
            return Err(ClientError::Transport(format!(
                "body length {} does not match declared {}",
                data.len(),
                len
            )));
        }
        self.insert(key, data);
        Ok(())
    }
}
