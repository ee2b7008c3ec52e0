// src/services/processor.rs

//! Document processing: link annotation and work discovery.
//!
//! The processor turns a fetched document into a link-annotated document
//! plus a set of newly discovered requests. It never touches shared state:
//! handlers mutate the request's document and collect [`Discoveries`],
//! which the pipeline turns into queue pushes.
//!
//! Handlers are dispatched by URL shape first (`page=N`, collections),
//! then by type tag. Missing payload fields are best-effort no-ops.

use serde_json::Value;

use crate::models::{
    id_of, is_root_type, urn, Document, Link, Outcome, Queuable, RelationDescriptor, Request,
    TraversalPolicy,
};
use crate::queue::QueueName;
use crate::utils::link_header::parse_page_links;
use crate::utils::{page_number, trim_url_template, with_page};

/// Version stamped into `_metadata.version` of every produced document.
/// Bump when handler output changes so rolling upgrades re-process stale
/// documents under an `ifNewVersion` policy.
pub const VERSION: u32 = 14;

/// Requests discovered while processing one document, grouped by target
/// queue when handed to the broker.
#[derive(Debug, Default)]
pub struct Discoveries {
    entries: Vec<(QueueName, Queuable)>,
}

impl Discoveries {
    pub fn push(&mut self, queue: QueueName, entry: Queuable) {
        self.entries.push((queue, entry));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(QueueName, Queuable)> + '_ {
        self.entries.iter()
    }

    /// Group entries by queue, preserving discovery order.
    pub fn into_batches(self) -> Vec<(QueueName, Vec<Queuable>)> {
        let mut batches: Vec<(QueueName, Vec<Queuable>)> = Vec::new();
        for (queue, entry) in self.entries {
            match batches.iter_mut().find(|(name, _)| *name == queue) {
                Some((_, batch)) => batch.push(entry),
                None => batches.push((queue, vec![entry])),
            }
        }
        batches
    }
}

enum Dispatch {
    Page(u32),
    Collection,
    Entity(String),
    Event(String),
    Unhandled,
}

/// Pure transform from fetched documents to linked documents plus
/// discovered work.
pub struct Processor {
    pub version: u32,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    pub fn new() -> Self {
        Self { version: VERSION }
    }

    /// Process the request's document in place, returning discovered work.
    pub fn process(&self, request: &mut Request) -> Discoveries {
        let mut discoveries = Discoveries::default();
        let Some(mut document) = request.document.take() else {
            return discoveries;
        };

        let existing = (document.metadata.version > 0).then_some(document.metadata.version);
        if !request.policy.should_process(existing, self.version) {
            request.mark_skip(Outcome::Skipped, "Excluded");
            request.document = Some(document);
            return discoveries;
        }
        document.metadata.version = self.version;

        match self.resolve(request) {
            Dispatch::Page(page) => {
                self.process_page(page, request, &mut document, &mut discoveries)
            }
            Dispatch::Collection => self.process_collection(request, &mut document, &mut discoveries),
            Dispatch::Entity(entity) => {
                self.process_entity(&entity, request, &mut document, &mut discoveries)
            }
            Dispatch::Event(event) => {
                self.process_event(&event, request, &mut document, &mut discoveries)
            }
            Dispatch::Unhandled => request.mark_skip(Outcome::Skipped, "No handler"),
        }

        request.document = Some(document);
        discoveries
    }

    fn resolve(&self, request: &Request) -> Dispatch {
        let Some(resource_type) = request.resource_type() else {
            return Dispatch::Unhandled;
        };
        if let Some(page) = request.url().and_then(page_number) {
            return Dispatch::Page(page);
        }
        if request.collection_type().is_some() {
            return Dispatch::Collection;
        }
        if resource_type.ends_with("Event") {
            return Dispatch::Event(resource_type.to_string());
        }
        match resource_type {
            "org" | "user" | "repo" | "team" | "commit" | "issue" | "issue_comment"
            | "commit_comment" => Dispatch::Entity(resource_type.to_string()),
            _ => Dispatch::Unhandled,
        }
    }

    // ===== Collections and pages =====

    /// First page of a collection. Enqueues the remaining pages onto the
    /// `soon` queue, carrying the current policy and qualifier, then
    /// handles page 1 inline.
    fn process_collection(
        &self,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let link_header = request
            .response
            .as_ref()
            .and_then(|response| response.link_header.clone());
        if let (Some(header), Some(url), Some(resource_type)) =
            (link_header, request.url(), request.resource_type())
        {
            if let Some(last) = parse_page_links(&header).last {
                for page in 2..=last {
                    let Some(page_url) = with_page(url, page) else {
                        continue;
                    };
                    out.push(
                        QueueName::Soon,
                        Queuable {
                            resource_type: resource_type.to_string(),
                            url: page_url,
                            context: request.context.clone(),
                            policy: request.policy.clone(),
                            attempt_count: 0,
                        },
                    );
                }
            }
        }

        self.process_page(1, request, document, out);
    }

    /// One page of a collection: self link, relation processing, and one
    /// discovered request per element.
    fn process_page(
        &self,
        page: u32,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(resource_type) = request.resource_type() else {
            return;
        };
        let qualifier = request
            .context
            .qualifier
            .clone()
            .unwrap_or_else(|| urn::ROOT.to_string());

        let self_urn = urn::join(&qualifier, &[resource_type, "page", &page.to_string()]);
        document.add_link("self", Link::self_ref(self_urn));

        if let Some(relation) = request.context.relation.clone() {
            self.process_relation(&relation, &qualifier, document);
        }

        let Some(element_type) = request.collection_type() else {
            return;
        };
        let elements: Vec<Value> = document.elements().to_vec();
        for element in &elements {
            let Some(url) = element.get("url").and_then(Value::as_str) else {
                continue;
            };
            self.queue_collection_element(element_type, url, &qualifier, &request.policy, out);
        }
    }

    /// Annotate a relation page: origin edges, siblings, and the URN list
    /// of the related entities.
    fn process_relation(
        &self,
        relation: &RelationDescriptor,
        qualifier: &str,
        document: &mut Document,
    ) {
        let urns: Vec<String> = document
            .elements()
            .iter()
            .filter_map(|element| {
                id_of(element.get("id")).map(|id| urn::root(&relation.rel_type, id))
            })
            .collect();

        document.add_link("origin", Link::resource(qualifier));
        document.add_link(&relation.origin, Link::resource(qualifier));
        document.add_link(
            "siblings",
            Link::siblings(urn::join(qualifier, &[&relation.name, "pages"])),
        );
        document.add_link("resources", Link::resources(urns));
    }

    fn queue_collection_element(
        &self,
        element_type: &str,
        url: &str,
        qualifier: &str,
        policy: &TraversalPolicy,
        out: &mut Discoveries,
    ) {
        let queuable = if is_root_type(element_type) {
            Queuable::root(element_type, url, policy.clone())
        } else {
            Queuable::child(element_type, url, qualifier, policy.clone())
        };
        out.push(QueueName::Normal, queuable);
    }

    // ===== Entities =====

    fn process_entity(
        &self,
        entity: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        match entity {
            "org" => self.process_org(request, document, out),
            "user" => self.process_user(request, document, out),
            "repo" => self.process_repo(request, document, out),
            "team" => self.process_team(request, document, out),
            "commit" => self.process_commit(request, document, out),
            "issue" => self.process_issue(request, document, out),
            "issue_comment" => {
                self.process_comment("issue_comment", "issue_comments", request, document, out)
            }
            "commit_comment" => {
                self.process_comment("commit_comment", "commit_comments", request, document, out)
            }
            _ => {}
        }
    }

    fn process_org(&self, request: &Request, document: &mut Document, out: &mut Discoveries) {
        let Some(id) = id_of(document.payload.get("id")) else {
            return;
        };
        let self_urn = urn::root("org", &id);
        document.add_link("self", Link::self_ref(&self_urn));
        document.add_link("siblings", Link::siblings("urn:orgs"));
        self.add_collection("repos", "repos", &self_urn, request, document, out);
        self.add_relation("members", "user", "org", &self_urn, request, document, out);
    }

    fn process_user(&self, request: &Request, document: &mut Document, out: &mut Discoveries) {
        let Some(id) = id_of(document.payload.get("id")) else {
            return;
        };
        let self_urn = urn::root("user", &id);
        document.add_link("self", Link::self_ref(&self_urn));
        document.add_link("siblings", Link::siblings("urn:users"));
        self.add_collection("repos", "repos", &self_urn, request, document, out);
    }

    fn process_repo(&self, request: &Request, document: &mut Document, out: &mut Discoveries) {
        let Some(id) = id_of(document.payload.get("id")) else {
            return;
        };
        let self_urn = urn::root("repo", &id);
        document.add_link("self", Link::self_ref(&self_urn));
        if let Some(owner_id) = id_of(
            document
                .payload
                .get("owner")
                .and_then(|owner| owner.get("id")),
        ) {
            document.add_link(
                "siblings",
                Link::siblings(urn::join(&urn::root("user", owner_id), &["repos"])),
            );
        }

        self.add_root("owner", "user", request, document, out);
        self.add_root("organization", "org", request, document, out);
        self.add_relation("teams", "team", "repo", &self_urn, request, document, out);
        self.add_relation(
            "collaborators",
            "user",
            "repo",
            &self_urn,
            request,
            document,
            out,
        );
        self.add_relation(
            "contributors",
            "user",
            "repo",
            &self_urn,
            request,
            document,
            out,
        );
        self.add_collection("issues", "issues", &self_urn, request, document, out);
        self.add_collection("commits", "commits", &self_urn, request, document, out);
    }

    fn process_team(&self, request: &Request, document: &mut Document, out: &mut Discoveries) {
        let Some(id) = id_of(document.payload.get("id")) else {
            return;
        };
        let self_urn = urn::root("team", &id);
        document.add_link("self", Link::self_ref(&self_urn));
        if let Some(org_id) = id_of(
            document
                .payload
                .get("organization")
                .and_then(|org| org.get("id")),
        ) {
            document.add_link(
                "siblings",
                Link::siblings(urn::join(&urn::root("org", org_id), &["teams"])),
            );
        }

        self.add_root("organization", "org", request, document, out);
        self.add_relation("members", "user", "team", &self_urn, request, document, out);
        self.add_relation("repos", "repo", "team", &self_urn, request, document, out);
    }

    fn process_commit(&self, request: &Request, document: &mut Document, out: &mut Discoveries) {
        let Some(sha) = document
            .payload
            .get("sha")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };
        let qualifier = request
            .context
            .qualifier
            .clone()
            .unwrap_or_else(|| urn::ROOT.to_string());
        let self_urn = urn::join(&qualifier, &["commit", &sha]);
        document.add_link("self", Link::self_ref(&self_urn));
        document.add_link("siblings", Link::siblings(urn::join(&qualifier, &["commits"])));

        self.add_root("author", "user", request, document, out);
        self.add_root("committer", "user", request, document, out);
        self.add_collection(
            "comments",
            "commit_comments",
            &self_urn,
            request,
            document,
            out,
        );
    }

    fn process_issue(&self, request: &Request, document: &mut Document, out: &mut Discoveries) {
        let Some(id) = id_of(document.payload.get("id")) else {
            return;
        };
        let qualifier = request
            .context
            .qualifier
            .clone()
            .unwrap_or_else(|| urn::ROOT.to_string());
        let self_urn = urn::join(&qualifier, &["issue", &id]);
        document.add_link("self", Link::self_ref(&self_urn));
        document.add_link("siblings", Link::siblings(urn::join(&qualifier, &["issues"])));

        self.add_root("user", "user", request, document, out);
        self.add_root("assignee", "user", request, document, out);
        self.add_root("closed_by", "user", request, document, out);
        self.add_root("repository", "repo", request, document, out);
        self.add_collection(
            "comments",
            "issue_comments",
            &self_urn,
            request,
            document,
            out,
        );
    }

    fn process_comment(
        &self,
        entity: &str,
        siblings: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(id) = id_of(document.payload.get("id")) else {
            return;
        };
        let qualifier = request
            .context
            .qualifier
            .clone()
            .unwrap_or_else(|| urn::ROOT.to_string());
        document.add_link(
            "self",
            Link::self_ref(urn::join(&qualifier, &[entity, &id])),
        );
        document.add_link("siblings", Link::siblings(urn::join(&qualifier, &[siblings])));
        self.add_root("user", "user", request, document, out);
    }

    // ===== Link helpers =====

    /// Link a nested object as a root resource and enqueue it.
    pub(crate) fn add_root(
        &self,
        name: &str,
        resource_type: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let target = match document.payload.get(name) {
            Some(Value::Object(object)) => {
                let id = id_of(object.get("id"));
                let url = object
                    .get("url")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                id.zip(url)
            }
            _ => None,
        };
        let Some((id, url)) = target else {
            return;
        };
        document.add_link(name, Link::resource(urn::root(resource_type, id)));
        out.push(
            QueueName::Normal,
            Queuable::root(resource_type, &url, request.policy.clone()),
        );
    }

    /// Link a named collection and enqueue its first fetch.
    pub(crate) fn add_collection(
        &self,
        name: &str,
        collection_type: &str,
        self_urn: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(url) = document
            .payload
            .get(format!("{}_url", name))
            .and_then(Value::as_str)
            .map(trim_url_template)
        else {
            return;
        };
        document.add_link(name, Link::collection(urn::join(self_urn, &[name])));
        out.push(
            QueueName::Normal,
            Queuable::collection(collection_type, &url, self_urn, request.policy.clone()),
        );
    }

    /// Link a relation and enqueue its collection carrying the edge
    /// descriptor.
    pub(crate) fn add_relation(
        &self,
        name: &str,
        element_type: &str,
        origin: &str,
        self_urn: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(url) = document
            .payload
            .get(format!("{}_url", name))
            .and_then(Value::as_str)
            .map(trim_url_template)
        else {
            return;
        };
        document.add_link(name, Link::relation(urn::join(self_urn, &[name, "pages"])));
        out.push(
            QueueName::Normal,
            Queuable::relation(
                name,
                &url,
                self_urn,
                RelationDescriptor {
                    origin: origin.to_string(),
                    name: name.to_string(),
                    rel_type: element_type.to_string(),
                },
                request.policy.clone(),
            ),
        );
    }
}
