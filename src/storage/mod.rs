//! Blob storage for uploaded media.
//!
//! [`LocalBlobStore`] writes under the data directory and is served back at
//! `/uploads`. [`MockBlobStore`] stores nothing and hands out placeholder URLs,
//! for environments without storage credentials.

mod limits;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use self::limits::{blob_path, sanitize_filename, MediaKind};

pub const MOCK_STORAGE_BASE: &str = "https://mock-storage.kyozo.invalid";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlob {
    pub url: String,
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub mock: bool,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn put(&self, path: &str, content_type: &str, data: Bytes)
        -> Result<StoredBlob, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Map a public URL handed out by this store back to its blob path.
    fn path_for_url(&self, url: &str) -> Option<String>;
}

/// Reject absolute paths and `..` so a blob can never escape the store root.
fn checked_relative(path: &str) -> Result<&Path, StorageError> {
    let candidate = Path::new(path);
    let safe = !path.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(candidate)
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

pub struct LocalBlobStore {
    root: PathBuf,
    public_base: String,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, public_base: String) -> Self {
        Self {
            root,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        path: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredBlob, StorageError> {
        let target = self.root.join(checked_relative(path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = data.len() as u64;
        tokio::fs::write(&target, &data).await?;

        tracing::info!(path, size, "Stored blob");
        Ok(StoredBlob {
            url: format!("{}/{}", self.public_base, path),
            path: path.to_string(),
            content_type: content_type.to_string(),
            size,
            mock: false,
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let target = self.root.join(checked_relative(path)?);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base)?
            .strip_prefix('/')
            .map(str::to_string)
    }
}

/// Simulates an upload: waits `latency`, keeps nothing.
pub struct MockBlobStore {
    latency: Duration,
}

impl MockBlobStore {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn put(
        &self,
        path: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredBlob, StorageError> {
        checked_relative(path)?;
        tokio::time::sleep(self.latency).await;
        Ok(StoredBlob {
            url: format!("{}/{}", MOCK_STORAGE_BASE, path),
            path: path.to_string(),
            content_type: content_type.to_string(),
            size: data.len() as u64,
            mock: true,
        })
    }

    async fn delete(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }

    fn path_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(MOCK_STORAGE_BASE)?
            .strip_prefix('/')
            .map(str::to_string)
    }
}
