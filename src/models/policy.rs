// src/models/policy.rs

//! Traversal policy attached to every request.
//!
//! A policy decides whether a request is processed, fetched, and stored.
//! It is attached when a request is created and carried across requeues
//! and derived pagination requests.

use serde::{Deserialize, Serialize};

/// When a document is considered worth re-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Freshness {
    /// Process on every crawl.
    Always,
    /// Process only when the stored document predates the processor version.
    IfNewVersion,
}

/// How the remote resource is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchKind {
    /// Conditional GET with the stored ETag.
    UseEtag,
    /// Unconditional GET, ignoring any cached version.
    Force,
    /// Serve from the document store without touching the network.
    StorageOnly,
}

/// Per-request traversal policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraversalPolicy {
    pub freshness: Freshness,
    pub fetch: FetchKind,
    pub store: bool,
}

impl Default for TraversalPolicy {
    fn default() -> Self {
        Self {
            freshness: Freshness::Always,
            fetch: FetchKind::UseEtag,
            store: true,
        }
    }
}

impl TraversalPolicy {
    /// Policy for re-processing documents missed by older processor versions.
    pub fn refresh() -> Self {
        Self {
            freshness: Freshness::IfNewVersion,
            ..Self::default()
        }
    }

    /// Whether processing should run, given the version already stored on
    /// the document (if any) and the current processor version.
    pub fn should_process(&self, existing_version: Option<u32>, processor_version: u32) -> bool {
        match self.freshness {
            Freshness::Always => true,
            Freshness::IfNewVersion => match existing_version {
                Some(version) => version < processor_version,
                None => true,
            },
        }
    }

    /// Whether the fetch stage should hit the network.
    pub fn should_fetch(&self) -> bool {
        !matches!(self.fetch, FetchKind::StorageOnly)
    }

    /// Whether the store stage should persist the document.
    pub fn should_save(&self) -> bool {
        self.store
    }

    /// Compact form for log lines, e.g. `AES`.
    pub fn short_form(&self) -> String {
        let freshness = match self.freshness {
            Freshness::Always => 'A',
            Freshness::IfNewVersion => 'V',
        };
        let fetch = match self.fetch {
            FetchKind::UseEtag => 'E',
            FetchKind::Force => 'F',
            FetchKind::StorageOnly => 'O',
        };
        let store = if self.store { 'S' } else { '-' };
        format!("{}{}{}", freshness, fetch, store)
    }
}
