// src/models/document.rs

//! Persisted document form: remote payload plus `_metadata`.
//!
//! Arrays fetched from the remote API are wrapped as `{elements: [...]}`
//! before metadata attachment, so a document is always a JSON object. Links
//! form a typed multi-graph over URNs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Stable content-addressed identifiers crossing the document graph.
pub mod urn {
    use std::fmt::Display;

    /// Qualifier of a top-level resource.
    pub const ROOT: &str = "urn:";

    /// Root URN for a resource type and remote id: `urn:<type>:<id>`.
    pub fn root(resource_type: &str, id: impl Display) -> String {
        format!("urn:{}:{}", resource_type, id)
    }

    /// Append segments under a qualifier: `<qualifier>:<seg>:<seg>…`.
    pub fn join(qualifier: &str, segments: &[&str]) -> String {
        let mut out = qualifier.trim_end_matches(':').to_string();
        if out.is_empty() {
            out.push_str("urn");
        }
        for segment in segments {
            out.push(':');
            out.push_str(segment);
        }
        out
    }
}

/// Edge kind in the link multi-graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    #[serde(rename = "self")]
    SelfRef,
    Siblings,
    Resource,
    Collection,
    Relation,
}

/// A link target: a single URN or an ordered list of URNs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkTarget {
    One(String),
    Many(Vec<String>),
}

/// A typed edge from a document to one or more URNs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "type")]
    pub kind: LinkKind,
    pub href: LinkTarget,
}

impl Link {
    pub fn self_ref(urn: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::SelfRef,
            href: LinkTarget::One(urn.into()),
        }
    }

    pub fn siblings(urn: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Siblings,
            href: LinkTarget::One(urn.into()),
        }
    }

    pub fn resource(urn: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Resource,
            href: LinkTarget::One(urn.into()),
        }
    }

    pub fn resources(urns: Vec<String>) -> Self {
        Self {
            kind: LinkKind::Resource,
            href: LinkTarget::Many(urns),
        }
    }

    pub fn collection(urn: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Collection,
            href: LinkTarget::One(urn.into()),
        }
    }

    pub fn relation(urn: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Relation,
            href: LinkTarget::One(urn.into()),
        }
    }
}

/// Response headers worth persisting alongside the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// The `_metadata` envelope attached to every stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderSummary>,
    #[serde(default)]
    pub version: u32,
}

impl DocumentMetadata {
    pub fn new(resource_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            url: url.into(),
            fetched_at: Utc::now(),
            etag: None,
            links: BTreeMap::new(),
            headers: None,
            version: 0,
        }
    }
}

/// A remote payload with its metadata envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub payload: Value,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Wrap a freshly fetched payload. Arrays become `{elements: [...]}`.
    pub fn new(payload: Value, metadata: DocumentMetadata) -> Self {
        Self {
            payload: wrap_elements(payload),
            metadata,
        }
    }

    /// Add or replace a named link.
    pub fn add_link(&mut self, name: impl Into<String>, link: Link) {
        self.metadata.links.insert(name.into(), link);
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.metadata.links.get(name)
    }

    /// Elements of a wrapped collection page, if any.
    pub fn elements(&self) -> &[Value] {
        self.payload
            .get("elements")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Storage form: payload object with `_metadata` merged in.
    pub fn to_value(&self) -> Result<Value> {
        let mut value = self.payload.clone();
        if !value.is_object() {
            value = serde_json::json!({ "elements": value });
        }
        let metadata = serde_json::to_value(&self.metadata)?;
        if let Some(object) = value.as_object_mut() {
            object.insert("_metadata".to_string(), metadata);
        }
        Ok(value)
    }

    /// Parse a stored value back into payload + metadata.
    pub fn from_value(mut value: Value) -> Result<Self> {
        let metadata = value
            .as_object_mut()
            .and_then(|object| object.remove("_metadata"))
            .ok_or_else(|| AppError::store("stored document has no _metadata"))?;
        Ok(Self {
            payload: value,
            metadata: serde_json::from_value(metadata)?,
        })
    }
}

/// Wrap top-level arrays as `{elements: [...]}` so documents are objects.
pub fn wrap_elements(payload: Value) -> Value {
    if payload.is_array() {
        serde_json::json!({ "elements": payload })
    } else {
        payload
    }
}

/// Remote ids are numbers or strings; render either as a URN segment.
pub fn id_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
