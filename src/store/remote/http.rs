//! S3-compatible object client over blocking HTTP
//!
//! Speaks the path-style REST dialect: `{endpoint}/{bucket}/{key}` for
//! objects, `ListObjectsV2` on the bucket for listings. Requests are not
//! signed; the endpoint is expected to be reachable as configured.

use super::{ClientError, ClientResult, ListPage, ObjectClient, ObjectHead};
use crate::{Error, Result};
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::ETAG;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Default number of keys requested per listing page
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListEntry>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
}

/// Object client for S3-compatible endpoints
pub struct HttpObjectClient {
    client: Client,
    endpoint: Url,
    bucket: String,
    page_size: u32,
}

impl HttpObjectClient {
    /// Create a client; `timeout` bounds every request, transfers included
    pub fn new(
        endpoint: &str,
        bucket: impl Into<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Endpoint '{}' cannot carry a bucket path",
                endpoint
            )));
        }

        let bucket = bucket.into();
        if bucket.is_empty() || bucket.contains('/') {
            return Err(Error::Config(format!("Invalid bucket name '{}'", bucket)));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpObjectClient {
            client,
            endpoint,
            bucket,
            page_size: page_size.clamp(1, DEFAULT_PAGE_SIZE),
        })
    }

    fn url(&self, key: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        // Checked in `new`: the endpoint can be a base.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.bucket);
            if let Some(key) = key {
                segments.extend(key.split('/'));
            }
        }
        url
    }

    fn check_status(response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(ClientError::Transport(format!(
                "HTTP {}: {}",
                status,
                text.trim()
            )));
        }
        Ok(response)
    }
}

fn transport(err: reqwest::Error) -> ClientError {
    ClientError::Transport(err.to_string())
}

impl ObjectClient for HttpObjectClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_page(&self, prefix: &str, continuation: Option<&str>) -> ClientResult<ListPage> {
        let mut query = vec![
            ("list-type", "2".to_string()),
            ("prefix", prefix.to_string()),
            ("max-keys", self.page_size.to_string()),
        ];
        if let Some(token) = continuation {
            query.push(("continuation-token", token.to_string()));
        }

        let response = self
            .client
            .get(self.url(None))
            .query(&query)
            .send()
            .map_err(transport)?;
        let body = Self::check_status(response)?.text().map_err(transport)?;

        let result: ListBucketResult = quick_xml::de::from_str(&body)
            .map_err(|e| ClientError::Transport(format!("Malformed listing: {}", e)))?;

        let next = match (result.is_truncated, result.next_continuation_token) {
            (false, _) => None,
            (true, Some(token)) => Some(token),
            (true, None) => {
                return Err(ClientError::Transport(
                    "Truncated listing without a continuation token".into(),
                ))
            }
        };

        Ok(ListPage {
            keys: result.contents.into_iter().map(|c| c.key).collect(),
            next,
        })
    }

    fn head_object(&self, key: &str) -> ClientResult<ObjectHead> {
        let response = self
            .client
            .head(self.url(Some(key)))
            .send()
            .map_err(transport)?;
        let response = Self::check_status(response)?;

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ObjectHead { etag })
    }

    fn get_object(&self, key: &str, sink: &mut dyn Write) -> ClientResult<u64> {
        let response = self
            .client
            .get(self.url(Some(key)))
            .send()
            .map_err(transport)?;
        let mut response = Self::check_status(response)?;

        // Copy by hand so network failures and local write failures stay
        // distinguishable.
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut total = 0u64;
        loop {
            let n = match response.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ClientError::Transport(format!(
                        "Body read failed after {} bytes: {}",
                        total, e
                    )))
                }
            };
            sink.write_all(&buf[..n])?;
            total += n as u64;
        }
        sink.flush()?;

        if let Some(expected) = response.content_length() {
            if expected != total {
                return Err(ClientError::Transport(format!(
                    "Body ended after {} of {} bytes",
                    total, expected
                )));
            }
        }

        Ok(total)
    }

    fn put_object(&self, key: &str, body: File, len: u64) -> ClientResult<()> {
        let response = self
            .client
            .put(self.url(Some(key)))
            .body(Body::sized(body, len))
            .send()
            .map_err(transport)?;
        Self::check_status(response)?;
        Ok(())
    }
}
