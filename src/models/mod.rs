// src/models/mod.rs

//! Domain models for the crawler engine.
//!
//! This module contains the data structures flowing through the pipeline:
//! requests and their broker projections, documents with their link graphs,
//! traversal policies, and engine configuration.

mod config;
mod document;
mod policy;
mod request;

// Re-export all public types
pub use config::{Config, CrawlerSettings, FetchSettings, QueueSettings, StorageSettings};
pub use document::{
    id_of, urn, wrap_elements, Document, DocumentMetadata, HeaderSummary, Link, LinkKind,
    LinkTarget,
};
pub use policy::{FetchKind, Freshness, TraversalPolicy};
pub use request::{
    collection_element_type, is_root_type, Disposition, FetchResponse, Outcome, Queuable, Request,
    RequestContext, RequestKind, RequestMeta, RelationDescriptor,
};
