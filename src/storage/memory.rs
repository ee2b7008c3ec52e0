// src/storage/memory.rs

//! In-memory document store binding.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::Document;
use crate::storage::{DocumentStore, UpsertOutcome};

/// In-process reference store, for single-process runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<(String, String), Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, document: &Document) -> Result<UpsertOutcome> {
        let key = (
            document.metadata.resource_type.clone(),
            document.metadata.url.clone(),
        );
        let mut documents = self.documents.write().await;
        match documents.insert(key, document.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Created),
        }
    }

    async fn etag(&self, resource_type: &str, url: &str) -> Result<Option<String>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&(resource_type.to_string(), url.to_string()))
            .and_then(|document| document.metadata.etag.clone()))
    }

    async fn get(&self, resource_type: &str, url: &str) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&(resource_type.to_string(), url.to_string()))
            .cloned())
    }
}
