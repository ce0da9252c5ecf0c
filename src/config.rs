//! Backend configuration
//!
//! A config names exactly one backend. It is loaded once at startup, from a
//! JSON file or from the environment, and [`StoreConfig::build`] turns it into
//! the store instance the rest of the process shares.

use crate::store::remote::DEFAULT_PAGE_SIZE;
use crate::store::{HttpObjectClient, LocalStore, RemoteStore, Store};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Object storage settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the S3-compatible endpoint (e.g., "http://localhost:9000")
    pub endpoint: String,
    /// Bucket holding the blobs
    pub bucket: String,
    /// Keys requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Deadline for any single request, transfers included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Local mirror settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory the keys are resolved against
    pub root: PathBuf,
}

/// Which backend to use, and how to reach it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    Remote(RemoteConfig),
    Local(LocalConfig),
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl StoreConfig {
    /// Remote config with default page size and timeout
    pub fn remote(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        StoreConfig::Remote(RemoteConfig {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        StoreConfig::Local(LocalConfig { root: root.into() })
    }

    /// Load a config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| Error::at_path(path, e))?;
        Ok(())
    }

    /// Read a config from environment variables.
    ///
    /// `BLOBSYNC_LOCAL_ROOT` selects the local backend and wins over
    /// `BLOBSYNC_ENDPOINT` + `BLOBSYNC_BUCKET`. `BLOBSYNC_PAGE_SIZE` and
    /// `BLOBSYNC_TIMEOUT_SECS` tune the remote backend. Returns `None` when
    /// no backend is configured.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        if let Some(root) = lookup("BLOBSYNC_LOCAL_ROOT") {
            return Ok(Some(Self::local(root)));
        }

        let endpoint = lookup("BLOBSYNC_ENDPOINT");
        let (endpoint, bucket) = match (endpoint, lookup("BLOBSYNC_BUCKET")) {
            (Some(endpoint), Some(bucket)) => (endpoint, bucket),
            (None, None) => return Ok(None),
            _ => {
                return Err(Error::Config(
                    "BLOBSYNC_ENDPOINT and BLOBSYNC_BUCKET must be set together".into(),
                ))
            }
        };

        let parse = |name: &str, default: u64| -> Result<u64> {
            match lookup(name) {
                Some(value) => value.parse().map_err(|_| {
                    Error::Config(format!("{} must be a number, got '{}'", name, value))
                }),
                None => Ok(default),
            }
        };

        let page_size = parse("BLOBSYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE as u64)?;
        let page_size = u32::try_from(page_size).map_err(|_| {
            Error::Config(format!("BLOBSYNC_PAGE_SIZE out of range: {}", page_size))
        })?;

        Ok(Some(StoreConfig::Remote(RemoteConfig {
            endpoint,
            bucket,
            page_size,
            timeout_secs: parse("BLOBSYNC_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
        })))
    }

    /// Construct the configured backend
    pub fn build(&self) -> Result<Box<dyn Store>> {
        match self {
            StoreConfig::Remote(remote) => {
                let client = HttpObjectClient::new(
                    &remote.endpoint,
                    remote.bucket.clone(),
                    remote.page_size,
                    Duration::from_secs(remote.timeout_secs),
                )?;
                tracing::debug!("Using object storage bucket '{}'", remote.bucket);
                Ok(Box::new(RemoteStore::new(client)))
            }
            StoreConfig::Local(local) => {
                tracing::debug!("Using local root {}", local.root.display());
                Ok(Box::new(LocalStore::new(local.root.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_remote_with_defaults() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"backend": "remote", "endpoint": "http://localhost:9000", "bucket": "artifacts"}"#,
        )
        .unwrap();
        assert_eq!(config, StoreConfig::remote("http://localhost:9000", "artifacts"));
    }

    #[test]
    fn test_parse_local() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"backend": "local", "root": "/data"}"#).unwrap();
        assert_eq!(config, StoreConfig::local("/data"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blobsync.json");
        let config = StoreConfig::local(dir.path().join("root"));

        config.save(&path).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), config);
        assert!(StoreConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_from_lookup() {
        assert_eq!(StoreConfig::from_lookup(lookup(&[])).unwrap(), None);

        let local = StoreConfig::from_lookup(lookup(&[
            ("BLOBSYNC_LOCAL_ROOT", "/mirror"),
            ("BLOBSYNC_ENDPOINT", "http://ignored"),
        ]))
        .unwrap();
        assert_eq!(local, Some(StoreConfig::local("/mirror")));

        let remote = StoreConfig::from_lookup(lookup(&[
            ("BLOBSYNC_ENDPOINT", "http://s3.local"),
            ("BLOBSYNC_BUCKET", "b"),
            ("BLOBSYNC_PAGE_SIZE", "50"),
        ]))
        .unwrap()
        .unwrap();
        match remote {
            StoreConfig::Remote(r) => {
                assert_eq!(r.page_size, 50);
                assert_eq!(r.timeout_secs, DEFAULT_TIMEOUT_SECS);
            }
            other => panic!("expected remote config, got {:?}", other),
        }

        assert!(StoreConfig::from_lookup(lookup(&[("BLOBSYNC_BUCKET", "b")])).is_err());
        assert!(StoreConfig::from_lookup(lookup(&[
            ("BLOBSYNC_ENDPOINT", "http://s3.local"),
            ("BLOBSYNC_BUCKET", "b"),
            ("BLOBSYNC_TIMEOUT_SECS", "soon"),
        ]))
        .is_err());
    }

    #[test]
    fn test_build_rejects_bad_endpoint() {
        assert!(StoreConfig::remote("::", "b").build().is_err());
        assert!(StoreConfig::remote("http://localhost:9000", "b").build().is_ok());
    }
}
