// src/models/request.rs

//! The traversal unit: one in-flight crawl request.
//!
//! A request is owned by exactly one worker loop between queue pop and
//! ack/abandon. Transient state (document, response, lease, side-effect
//! handles) lives only on the in-memory request; the serializable
//! projection sent to the broker is [`Queuable`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::document::Document;
use crate::models::policy::TraversalPolicy;
use crate::queue::DeliveryTag;
use crate::services::Lease;

/// Element type of a named collection, when the type tag is a collection.
pub fn collection_element_type(collection: &str) -> Option<&'static str> {
    match collection {
        "orgs" => Some("org"),
        "repos" => Some("repo"),
        "teams" => Some("team"),
        "issues" => Some("issue"),
        "commits" => Some("commit"),
        "issue_comments" => Some("issue_comment"),
        "commit_comments" => Some("commit_comment"),
        "users" | "members" | "collaborators" | "contributors" | "subscribers" => Some("user"),
        _ => None,
    }
}

/// Root types are addressable on their own; everything else is qualified
/// by a parent URN.
pub fn is_root_type(resource_type: &str) -> bool {
    matches!(resource_type, "org" | "user" | "repo" | "team")
}

/// Identity of a request: a real remote resource, or an internal marker.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Resource { resource_type: String, url: String },
    /// Synthesized when the queues are empty; induces a polling delay.
    Blank,
    /// Synthesized when a cycle fails before a request exists.
    ErrorTrap,
}

/// Processing control for the remainder of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Skip,
    Requeue,
}

/// Terminal outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Skipped,
    Requeued,
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Processed => "Processed",
            Outcome::Skipped => "Skipped",
            Outcome::Requeued => "Requeued",
            Outcome::Error => "Error",
        };
        write!(f, "{}", label)
    }
}

/// Typed edge descriptor carried by relation-collection requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub origin: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rel_type: String,
}

/// Parent qualifiers and traversal hints carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

/// The serializable projection of a request. This is the broker message;
/// transient fields never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queuable {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub url: String,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub policy: TraversalPolicy,
    #[serde(rename = "attemptCount", default)]
    pub attempt_count: u32,
}

impl Queuable {
    /// A top-level resource request with a fresh context.
    pub fn root(resource_type: &str, url: &str, policy: TraversalPolicy) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            url: url.to_string(),
            context: RequestContext::default(),
            policy,
            attempt_count: 0,
        }
    }

    /// A child resource nested under a parent qualifier.
    pub fn child(resource_type: &str, url: &str, qualifier: &str, policy: TraversalPolicy) -> Self {
        Self {
            context: RequestContext {
                qualifier: Some(qualifier.to_string()),
                ..RequestContext::default()
            },
            ..Self::root(resource_type, url, policy)
        }
    }

    /// A collection request fetched under a parent qualifier.
    pub fn collection(
        collection_type: &str,
        url: &str,
        qualifier: &str,
        policy: TraversalPolicy,
    ) -> Self {
        let mut queuable = Self::child(collection_type, url, qualifier, policy);
        queuable.context.sub_type =
            collection_element_type(collection_type).map(|t| t.to_string());
        queuable
    }

    /// A relation-collection request carrying its edge descriptor.
    pub fn relation(
        collection_type: &str,
        url: &str,
        qualifier: &str,
        relation: RelationDescriptor,
        policy: TraversalPolicy,
    ) -> Self {
        let mut queuable = Self::collection(collection_type, url, qualifier, policy);
        queuable.context.relation = Some(relation);
        queuable
    }
}

/// Response metadata recorded by the fetcher.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub link_header: Option<String>,
}

/// Per-stage timings and counters, logged with the outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestMeta(BTreeMap<String, Value>);

impl RequestMeta {
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RequestMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(&self.0).unwrap_or_default();
        write!(f, "{}", rendered)
    }
}

/// One in-flight crawl request.
#[derive(Debug)]
pub struct Request {
    pub kind: RequestKind,
    pub context: RequestContext,
    pub policy: TraversalPolicy,
    pub attempt_count: u32,
    pub document: Option<Document>,
    pub response: Option<FetchResponse>,
    pub disposition: Disposition,
    pub outcome: Option<Outcome>,
    pub message: Option<String>,
    pub meta: RequestMeta,
    pub promises: Vec<JoinHandle<Result<()>>>,
    pub lease: Option<Lease>,
    pub started_at: Option<DateTime<Utc>>,
    pub loop_name: String,
    pub next_request_time: Option<DateTime<Utc>>,
    pub delivery: Option<DeliveryTag>,
}

impl Request {
    fn base(kind: RequestKind) -> Self {
        Self {
            kind,
            context: RequestContext::default(),
            policy: TraversalPolicy::default(),
            attempt_count: 0,
            document: None,
            response: None,
            disposition: Disposition::Continue,
            outcome: None,
            message: None,
            meta: RequestMeta::default(),
            promises: Vec::new(),
            lease: None,
            started_at: None,
            loop_name: String::new(),
            next_request_time: None,
            delivery: None,
        }
    }

    /// Rebuild a request from its broker projection and delivery tag.
    pub fn from_queuable(queuable: Queuable, delivery: DeliveryTag) -> Self {
        let mut request = Self::base(RequestKind::Resource {
            resource_type: queuable.resource_type,
            url: queuable.url,
        });
        request.context = queuable.context;
        request.policy = queuable.policy;
        request.attempt_count = queuable.attempt_count;
        request.delivery = Some(delivery);
        request
    }

    /// Synthesized when the queues are exhausted.
    pub fn blank(polling_delay: Duration) -> Self {
        let mut request = Self::base(RequestKind::Blank);
        request.mark_skip(Outcome::Skipped, "Exhausted queue");
        request.next_request_time = Some(Utc::now() + chrono_millis(polling_delay));
        request
    }

    /// Synthesized when a cycle fails before any request exists.
    pub fn error_trap(message: impl Into<String>, polling_delay: Duration) -> Self {
        let mut request = Self::base(RequestKind::ErrorTrap);
        request.disposition = Disposition::Skip;
        request.outcome = Some(Outcome::Error);
        request.message = Some(message.into());
        request.next_request_time = Some(Utc::now() + chrono_millis(polling_delay));
        request
    }

    pub fn resource_type(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::Resource { resource_type, .. } => Some(resource_type),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::Resource { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Element type when this request names a collection.
    pub fn collection_type(&self) -> Option<&'static str> {
        self.resource_type().and_then(collection_element_type)
    }

    /// Type under which the fetched document is cached and stored.
    /// Collections are fetched and stored as `page` documents.
    pub fn storage_type(&self) -> &str {
        if self.collection_type().is_some() {
            "page"
        } else {
            self.resource_type().unwrap_or("")
        }
    }

    /// Mark the rest of the pipeline as skipped. The first marker wins.
    pub fn mark_skip(&mut self, outcome: Outcome, message: impl Into<String>) {
        if self.disposition == Disposition::Continue {
            self.disposition = Disposition::Skip;
            self.outcome = Some(outcome);
            self.message = Some(message.into());
        }
    }

    /// Mark the request for redelivery. Upgrades a skip; the first requeue
    /// reason wins.
    pub fn mark_requeue(&mut self, outcome: Outcome, message: impl Into<String>) {
        if self.disposition != Disposition::Requeue {
            self.disposition = Disposition::Requeue;
            self.outcome = Some(outcome);
            self.message = Some(message.into());
        }
    }

    pub fn should_skip(&self) -> bool {
        self.disposition != Disposition::Continue
    }

    pub fn should_requeue(&self) -> bool {
        self.disposition == Disposition::Requeue
    }

    /// Track a side-effect handle that must settle before ack.
    pub fn track_promise(&mut self, handle: JoinHandle<Result<()>>) {
        self.promises.push(handle);
    }

    /// The serializable projection. Internal marker requests have none.
    pub fn queuable(&self) -> Result<Queuable> {
        match &self.kind {
            RequestKind::Resource { resource_type, url } => Ok(Queuable {
                resource_type: resource_type.clone(),
                url: url.clone(),
                context: self.context.clone(),
                policy: self.policy.clone(),
                attempt_count: self.attempt_count,
            }),
            _ => Err(AppError::malformed("internal request has no queuable form")),
        }
    }

    /// `type@url` rendering for log lines.
    pub fn describe(&self) -> String {
        match &self.kind {
            RequestKind::Resource { resource_type, url } => {
                format!("{}@{}", resource_type, url)
            }
            RequestKind::Blank => "_blank".to_string(),
            RequestKind::ErrorTrap => "_errorTrap".to_string(),
        }
    }
}

fn chrono_millis(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueName;

    fn make_queuable() -> Queuable {
        Queuable::child(
            "issue",
            "https://api.example.com/repos/acme/widget/issues/5",
            "urn:repo:42",
            TraversalPolicy::default(),
        )
    }

    fn make_tag() -> DeliveryTag {
        DeliveryTag {
            queue: QueueName::Normal,
            receipt: 1,
        }
    }

    #[test]
    fn test_queuable_round_trip() {
        let queuable = make_queuable();
        let request = Request::from_queuable(queuable.clone(), make_tag());
        assert_eq!(request.queuable().unwrap(), queuable);
    }

    #[test]
    fn test_queuable_wire_shape() {
        let json = serde_json::to_value(make_queuable()).unwrap();
        assert_eq!(json["type"], "issue");
        assert_eq!(json["attemptCount"], 0);
        assert_eq!(json["context"]["qualifier"], "urn:repo:42");
        // Transient fields must never reach the broker.
        assert!(json.get("document").is_none());
        assert!(json.get("lock").is_none());
        assert!(json.get("promises").is_none());
    }

    #[test]
    fn test_first_skip_marker_wins() {
        let mut request = Request::from_queuable(make_queuable(), make_tag());
        request.mark_skip(Outcome::Skipped, "Filtered");
        request.mark_skip(Outcome::Skipped, "Excluded");
        assert_eq!(request.message.as_deref(), Some("Filtered"));
        assert!(request.should_skip());
        assert!(!request.should_requeue());
    }

    #[test]
    fn test_requeue_upgrades_skip_once() {
        let mut request = Request::from_queuable(make_queuable(), make_tag());
        request.mark_skip(Outcome::Skipped, "Unmodified");
        request.mark_requeue(Outcome::Error, "store failed");
        request.mark_requeue(Outcome::Requeued, "later");
        assert!(request.should_requeue());
        assert_eq!(request.outcome, Some(Outcome::Error));
        assert_eq!(request.message.as_deref(), Some("store failed"));
    }

    #[test]
    fn test_blank_request_polls() {
        let request = Request::blank(Duration::from_millis(2000));
        assert_eq!(request.kind, RequestKind::Blank);
        assert!(request.should_skip());
        assert!(request.next_request_time.is_some());
        assert!(request.queuable().is_err());
    }

    #[test]
    fn test_collection_and_storage_types() {
        let request = Request::from_queuable(
            Queuable::collection(
                "issues",
                "https://api.example.com/repos/acme/widget/issues",
                "urn:repo:42",
                TraversalPolicy::default(),
            ),
            make_tag(),
        );
        assert_eq!(request.collection_type(), Some("issue"));
        assert_eq!(request.storage_type(), "page");
        assert_eq!(request.context.sub_type.as_deref(), Some("issue"));

        let entity = Request::from_queuable(make_queuable(), make_tag());
        assert_eq!(entity.collection_type(), None);
        assert_eq!(entity.storage_type(), "issue");
    }

    #[test]
    fn test_root_types() {
        for root in ["org", "user", "repo", "team"] {
            assert!(is_root_type(root));
        }
        for child in ["commit", "issue", "issue_comment", "PushEvent"] {
            assert!(!is_root_type(child));
        }
    }
}
