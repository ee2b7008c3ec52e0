// src/services/events.rs

//! Event document handlers.
//!
//! Events arrive from the activity feed with an envelope (`actor`, `repo`,
//! `org`) and a type-specific `payload`. Handlers link every referenced
//! entity into URN space and enqueue the root entities; any missing
//! payload field is a no-op so partial events still process.

use serde_json::Value;

use crate::models::{id_of, urn, Document, Link, Queuable, Request};
use crate::queue::QueueName;
use crate::services::processor::{Discoveries, Processor};

impl Processor {
    /// Common envelope handling plus per-type payload linking.
    pub(crate) fn process_event(
        &self,
        event_type: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(id) = id_of(document.payload.get("id")) else {
            return;
        };

        let base = id_of(
            document
                .payload
                .get("repo")
                .and_then(|repo| repo.get("id")),
        )
        .map(|repo_id| urn::root("repo", repo_id))
        .or_else(|| request.context.qualifier.clone())
        .unwrap_or_else(|| urn::ROOT.to_string());

        document.add_link("self", Link::self_ref(urn::join(&base, &[event_type, &id])));

        self.link_event_root("actor", "user", request, document, out);
        self.link_event_root("repo", "repo", request, document, out);
        self.link_event_root("org", "org", request, document, out);

        match event_type {
            "IssuesEvent" => {
                self.link_payload_child("issue", "issue", &base, request, document, out);
            }
            "IssueCommentEvent" => {
                self.link_payload_child("issue", "issue", &base, request, document, out);
                self.link_payload_child("comment", "issue_comment", &base, request, document, out);
            }
            "CommitCommentEvent" => {
                self.link_payload_child("comment", "commit_comment", &base, request, document, out);
            }
            "PushEvent" => self.link_push_commits(&base, request, document, out),
            "TeamEvent" => {
                self.link_payload_root("team", "team", request, document, out);
            }
            "MembershipEvent" => {
                self.link_payload_root("member", "user", request, document, out);
                self.link_payload_root("team", "team", request, document, out);
            }
            "PageBuildEvent" => self.link_page_build(&base, document),
            // CreateEvent payloads (ref, ref_type, master_branch,
            // description) carry no linkable entity ids; envelope only.
            "CreateEvent" => {}
            // Other event types carry only envelope references.
            _ => {}
        }
    }

    /// Link an envelope object (`actor`, `repo`, `org`) and enqueue it as a
    /// root when it carries a URL.
    fn link_event_root(
        &self,
        name: &str,
        resource_type: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(object) = document.payload.get(name).cloned() else {
            return;
        };
        let Some(id) = id_of(object.get("id")) else {
            return;
        };
        document.add_link(name, Link::resource(urn::root(resource_type, &id)));
        if let Some(url) = object.get("url").and_then(Value::as_str) {
            out.push(
                QueueName::Normal,
                Queuable::root(resource_type, url, request.policy.clone()),
            );
        }
    }

    /// Link a `payload.*` object and enqueue it as a root entity.
    fn link_payload_root(
        &self,
        field: &str,
        resource_type: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(object) = document
            .payload
            .get("payload")
            .and_then(|payload| payload.get(field))
            .cloned()
        else {
            return;
        };
        let Some(id) = id_of(object.get("id")) else {
            return;
        };
        document.add_link(field, Link::resource(urn::root(resource_type, &id)));
        if let Some(url) = object.get("url").and_then(Value::as_str) {
            out.push(
                QueueName::Normal,
                Queuable::root(resource_type, url, request.policy.clone()),
            );
        }
    }

    /// Link a `payload.*` object under the event's base qualifier and
    /// enqueue it as a child.
    fn link_payload_child(
        &self,
        field: &str,
        resource_type: &str,
        base: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let Some(object) = document
            .payload
            .get("payload")
            .and_then(|payload| payload.get(field))
            .cloned()
        else {
            return;
        };
        let Some(id) = id_of(object.get("id")) else {
            return;
        };
        document.add_link(
            field,
            Link::resource(urn::join(base, &[resource_type, &id])),
        );
        if let Some(url) = object.get("url").and_then(Value::as_str) {
            out.push(
                QueueName::Normal,
                Queuable::child(resource_type, url, base, request.policy.clone()),
            );
        }
    }

    /// Push events carry a commit list; link all of them and enqueue each
    /// commit under the repo qualifier.
    fn link_push_commits(
        &self,
        base: &str,
        request: &Request,
        document: &mut Document,
        out: &mut Discoveries,
    ) {
        let commits: Vec<Value> = document
            .payload
            .get("payload")
            .and_then(|payload| payload.get("commits"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if commits.is_empty() {
            return;
        }

        let urns: Vec<String> = commits
            .iter()
            .filter_map(|commit| commit.get("sha").and_then(Value::as_str))
            .map(|sha| urn::join(base, &["commit", sha]))
            .collect();
        document.add_link("commits", Link::resources(urns));

        for commit in &commits {
            if let Some(url) = commit.get("url").and_then(Value::as_str) {
                out.push(
                    QueueName::Normal,
                    Queuable::child("commit", url, base, request.policy.clone()),
                );
            }
        }
    }

    /// Page-build payloads are inconsistent across API versions; link the
    /// build when an id is present and otherwise do nothing.
    fn link_page_build(&self, base: &str, document: &mut Document) {
        let Some(id) = id_of(
            document
                .payload
                .get("payload")
                .and_then(|payload| payload.get("build"))
                .and_then(|build| build.get("id")),
        ) else {
            return;
        };
        document.add_link(
            "page_build",
            Link::resource(urn::join(base, &["page_build", &id])),
        );
    }
}
