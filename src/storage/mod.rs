// src/storage/mod.rs

//! Document store abstractions.
//!
//! Unified interface for persisting the link-annotated document graph,
//! keyed by `(type, url)`. Upserts are idempotent; the engine's delivery
//! guarantees are at-least-once on top of that.

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Document;

/// Result of an upsert, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No document existed under this key.
    Created,
    /// An existing document was replaced.
    Updated,
}

/// Trait for document store backends.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document stored under its metadata key.
    async fn upsert(&self, document: &Document) -> Result<UpsertOutcome>;

    /// The ETag recorded for a stored document, if any.
    async fn etag(&self, resource_type: &str, url: &str) -> Result<Option<String>>;

    /// Read a stored document.
    async fn get(&self, resource_type: &str, url: &str) -> Result<Option<Document>>;
}
