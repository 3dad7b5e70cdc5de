//! Object stores: a directory tree on disk, or an HTTP endpoint.

use super::{is_contained, ObjectStore};
use crate::error::ExtractError;
use crate::request::SourceLocation;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Objects stored as `root/bucket/key`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `root/bucket/key`. Buckets and keys that would resolve outside the
    /// root (`..`, absolute paths, empty parts) are rejected.
    pub fn path_of(&self, location: &SourceLocation) -> Result<PathBuf, ExtractError> {
        for part in [&location.bucket, &location.key] {
            if !is_contained(part) {
                return Err(ExtractError::FetchFailed {
                    location: location.to_string(),
                    reason: format!("'{part}' is not a path inside the store root"),
                });
            }
        }
        Ok(self.root.join(&location.bucket).join(&location.key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, ExtractError> {
        let path = self.path_of(location)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            let reason = match e.kind() {
                std::io::ErrorKind::NotFound => format!("{} does not exist", path.display()),
                std::io::ErrorKind::PermissionDenied => {
                    format!("permission denied reading {}", path.display())
                }
                _ => e.to_string(),
            };
            ExtractError::FetchFailed {
                location: location.to_string(),
                reason,
            }
        })?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        Ok(bytes)
    }
}

/// Objects served at `{base_url}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    base_url: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, ExtractError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            timeout_secs,
            client,
        })
    }

    pub fn url_of(&self, location: &SourceLocation) -> String {
        format!("{}/{}/{}", self.base_url, location.bucket, location.key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, ExtractError> {
        let url = self.url_of(location);
        info!("Downloading {}", url);

        let failed = |reason: String| ExtractError::FetchFailed {
            location: location.to_string(),
            reason,
        };

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                failed(format!("timed out after {}s", self.timeout_secs))
            } else {
                failed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}
