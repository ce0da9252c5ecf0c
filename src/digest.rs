//! Content digests
//!
//! A [`ContentDigest`] is the 128-bit MD5 of a blob's full content. MD5 is what
//! S3-compatible stores report as the ETag of single-part objects, so a digest
//! read from object metadata and one computed from local bytes compare equal.
//! It is used for dedup only, never for integrity against an adversary.

use crate::{Error, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// A 16-byte content digest, displayed as 32 lower-case hex chars
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    /// Digest an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::from_hasher(Md5::new_with_prefix(data))
    }

    fn from_hasher(hasher: Md5) -> Self {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hasher.finalize());
        ContentDigest(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 16];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(ContentDigest(arr))
    }

    /// Derive a digest from a backend-native ETag.
    ///
    /// Accepts `"<32 hex>"`, optionally weak (`W/"..."`). Returns `None` for
    /// anything else, notably multipart tags of the form `"<hex>-<parts>"`,
    /// which are not a hash of the content.
    pub fn from_etag(etag: &str) -> Option<Self> {
        let tag = etag.trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        let tag = tag.trim_matches('"');
        if tag.len() != 32 || !tag.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Self::from_hex(&tag.to_ascii_lowercase()).ok()
    }
}

/// Hash a stream to its end.
///
/// Consumes `reader` exactly once; interrupted reads are retried, any other
/// read error fails the digest.
pub fn digest_of<R: Read + ?Sized>(reader: &mut R) -> Result<ContentDigest> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(ContentDigest::from_hasher(hasher))
}

/// Hash the full content of a local file
pub fn digest_file(path: &Path) -> Result<ContentDigest> {
    let mut file = File::open(path).map_err(|e| Error::at_path(path, e))?;
    digest_of(&mut file).map_err(|e| match e {
        Error::Io(source) => Error::at_path(path, source),
        other => other,
    })
}

/// A writer that hashes everything written through it
pub struct DigestWriter<W> {
    inner: W,
    hasher: Md5,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        DigestWriter {
            inner,
            hasher: Md5::new(),
            written: 0,
        }
    }

    /// Number of bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finish hashing, returning the wrapped writer and the digest
    pub fn finish(self) -> (W, ContentDigest) {
        (self.inner, ContentDigest::from_hasher(self.hasher))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", &self.to_hex()[..8])
    }
}

impl Serialize for ContentDigest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentDigest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // md5("hello")
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn test_digest_known_value() {
        let digest = digest_of(&mut Cursor::new(b"hello")).unwrap();
        assert_eq!(digest.to_hex(), HELLO_MD5);
        assert_eq!(digest, ContentDigest::of_bytes(b"hello"));
    }

    #[test]
    fn test_digest_deterministic() {
        let data = vec![7u8; BUF_SIZE * 3 + 11];
        let d1 = digest_of(&mut Cursor::new(&data)).unwrap();
        let d2 = digest_of(&mut Cursor::new(&data)).unwrap();
        assert_eq!(d1, d2);
        assert_ne!(d1, ContentDigest::of_bytes(b"other"));
    }

    #[test]
    fn test_digest_is_fixed_width_lowercase() {
        for data in [&b""[..], b"a", b"hello world"] {
            let hex = ContentDigest::of_bytes(data).to_hex();
            assert_eq!(hex.len(), 32);
            assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }

    #[test]
    fn test_from_etag() {
        let expected = ContentDigest::from_hex(HELLO_MD5).unwrap();
        assert_eq!(ContentDigest::from_etag(&format!("\"{}\"", HELLO_MD5)), Some(expected));
        assert_eq!(
            ContentDigest::from_etag(&format!("W/\"{}\"", HELLO_MD5.to_uppercase())),
            Some(expected)
        );
        assert_eq!(ContentDigest::from_etag(HELLO_MD5), Some(expected));

        // Multipart upload tag
        assert_eq!(
            ContentDigest::from_etag("\"9b2cf535f27731c974343645a3985328-3\""),
            None
        );
        assert_eq!(ContentDigest::from_etag("\"\""), None);
        assert_eq!(ContentDigest::from_etag("\"zz41402abc4b2a76b9719d911017c592\""), None);
    }

    #[test]
    fn test_digest_writer_matches_digest_of() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"hel").unwrap();
        writer.write_all(b"lo").unwrap();
        assert_eq!(writer.written(), 5);
        let (buf, digest) = writer.finish();
        assert_eq!(buf, b"hello");
        assert_eq!(digest.to_hex(), HELLO_MD5);
    }

    #[test]
    fn test_digest_file_missing() {
        let err = digest_file(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::Path { .. }));
    }
}
