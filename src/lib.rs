//! # blobsync
//!
//! Dedup-aware blob synchronization between object storage and local
//! filesystem mirrors.
//!
//! blobsync lists, fetches and publishes named byte blobs through one
//! [`Store`] interface, whether the blobs live in an S3-compatible bucket or
//! under a local directory. The [`ContentStore`] layer compares content
//! digests before moving bytes, so content already present locally under a
//! different name is copied rather than downloaded again.
//!
//! ## Core Concepts
//!
//! - **BlobKey**: normalized, forward-slash separated blob name
//! - **ContentDigest**: 128-bit content fingerprint, comparable across backends
//! - **Store**: a backend (`RemoteStore` or `LocalStore`)
//! - **LocalContentIndex**: caller-owned digest → local file map
//!
//! ## Example
//!
//! ```ignore
//! use blobsync::{BlobKey, ContentStore, LocalContentIndex, StoreConfig};
//!
//! let store = ContentStore::new(StoreConfig::local("/data").build()?);
//! let index = LocalContentIndex::scan("/var/cache/artifacts".as_ref())?;
//! store.fetch(&BlobKey::new("a/b.txt"), "/tmp/out".as_ref(), &index, false)?;
//! ```

pub mod cas;
pub mod config;
pub mod digest;
pub mod fsutil;
pub mod key;
pub mod store;

mod error;

pub use cas::{ContentStore, FetchReport, PublishOutcome, PublishReport};
pub use config::{LocalConfig, RemoteConfig, StoreConfig};
pub use digest::{digest_file, digest_of, ContentDigest};
pub use error::{Error, Result};
pub use key::{normalize, BlobKey};
pub use store::{
    FetchOutcome, HttpObjectClient, LocalContentIndex, LocalStore, MockObjectClient, ObjectClient,
    RemoteStore, Store,
};
