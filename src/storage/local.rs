// src/storage/local.rs

//! Local filesystem document store binding.
//!
//! One JSON file per document, keyed by resource type and the SHA-256 of
//! the URL:
//!
//! ```text
//! {root}/
//! └── {type}/
//!     └── {sha256(url)}.json
//! ```
//!
//! Writes are atomic (temp file, then rename). Production deployments
//! select an external document database binding instead.

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Document;
use crate::storage::{DocumentStore, UpsertOutcome};

/// Filesystem-backed document store.
#[derive(Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn path(&self, resource_type: &str, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.root_dir
            .join(resource_type)
            .join(format!("{:x}.json", digest))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &PathBuf, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self, path: &PathBuf) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn read_document(&self, resource_type: &str, url: &str) -> Result<Option<Document>> {
        let path = self.path(resource_type, url);
        match self.read_bytes(&path).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(Document::from_value(value)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn upsert(&self, document: &Document) -> Result<UpsertOutcome> {
        let path = self.path(&document.metadata.resource_type, &document.metadata.url);
        let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);

        let bytes = serde_json::to_vec_pretty(&document.to_value()?)?;
        self.write_bytes(&path, &bytes).await?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    async fn etag(&self, resource_type: &str, url: &str) -> Result<Option<String>> {
        Ok(self
            .read_document(resource_type, url)
            .await?
            .and_then(|document| document.metadata.etag))
    }

    async fn get(&self, resource_type: &str, url: &str) -> Result<Option<Document>> {
        self.read_document(resource_type, url).await
    }
}
