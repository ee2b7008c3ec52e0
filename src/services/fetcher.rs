// src/services/fetcher.rs

//! Conditional HTTP fetching.
//!
//! Looks up the prior ETag for `(type, url)` in the document store and
//! issues a conditional GET. Collections are fetched (and cached) under
//! the `page` type. Rate-limit handling against the remote API lives
//! here, not in the pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH, LINK};
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{
    Document, DocumentMetadata, FetchKind, FetchResponse, FetchSettings, Outcome, Request,
};
use crate::storage::DocumentStore;

/// Conditional fetcher over the remote hypermedia API.
pub struct Fetcher {
    client: Client,
    store: Arc<dyn DocumentStore>,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(store: Arc<dyn DocumentStore>, settings: FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            store,
            settings,
        })
    }

    /// Fetch the request's resource, populating `document` and `response`.
    ///
    /// May mark the request skipped (`Unmodified`, `Empty repo`) instead of
    /// producing a document. Non-2xx statuses other than 304/409 are errors
    /// and take the requeue path upstream.
    pub async fn fetch(&self, request: &mut Request) -> Result<()> {
        let Some(url) = request.url().map(str::to_string) else {
            return Ok(());
        };
        let fetch_type = request.storage_type().to_string();

        if !request.policy.should_fetch() {
            return self.restore(request, &fetch_type, &url).await;
        }

        let etag = self.store.etag(&fetch_type, &url).await?;

        let started = Instant::now();
        let mut builder = self.client.get(&url).header(ACCEPT, "application/json");
        if let Some(token) = &self.settings.token {
            builder = builder.header(AUTHORIZATION, format!("token {}", token));
        }
        if !matches!(request.policy.fetch, FetchKind::Force) {
            if let Some(etag) = &etag {
                builder = builder.header(IF_NONE_MATCH, etag);
            }
        }

        let response = builder.send().await?;
        let status_code = response.status();
        let status = status_code.as_u16();
        request.meta.insert("status", status);

        let result = if status_code.is_success() {
            let response_etag = header_value(&response, ETAG.as_str());
            let link_header = header_value(&response, LINK.as_str());
            let payload: serde_json::Value = response.json().await?;

            request.response = Some(FetchResponse {
                status,
                etag: response_etag,
                link_header,
            });
            request.document = Some(Document::new(
                payload,
                DocumentMetadata::new(&fetch_type, &url),
            ));
            Ok(())
        } else if status == 304 {
            request.response = Some(FetchResponse {
                status,
                etag,
                link_header: None,
            });
            if request.context.force {
                self.restore(request, &fetch_type, &url).await
            } else {
                request.mark_skip(Outcome::Skipped, "Unmodified");
                Ok(())
            }
        } else if status == 409 {
            request.response = Some(FetchResponse {
                status,
                etag: None,
                link_header: None,
            });
            request.mark_skip(Outcome::Skipped, "Empty repo");
            Ok(())
        } else {
            Err(AppError::FetchStatus { status, url })
        };

        request
            .meta
            .insert("fetch", started.elapsed().as_millis() as u64);
        result
    }

    /// Rehydrate the document from the store, carrying its stored metadata
    /// (links, version) as the template for the convert stage.
    async fn restore(&self, request: &mut Request, fetch_type: &str, url: &str) -> Result<()> {
        match self.store.get(fetch_type, url).await? {
            Some(document) => {
                request.document = Some(document);
                Ok(())
            }
            None => {
                request.mark_skip(Outcome::Skipped, "Unmodified");
                Ok(())
            }
        }
    }

    /// Base URL of the remote API, for seeding.
    pub fn api_base(&self) -> &str {
        &self.settings.api_base
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Link, Queuable, TraversalPolicy};
    use crate::queue::{DeliveryTag, QueueName};
    use crate::storage::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_fetcher(store: Arc<MemoryStore>) -> Fetcher {
        Fetcher::new(store, FetchSettings::default()).unwrap()
    }

    fn make_request(url: &str) -> Request {
        Request::from_queuable(
            Queuable::root("repo", url, TraversalPolicy::default()),
            DeliveryTag {
                queue: QueueName::Normal,
                receipt: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_fetch_success_populates_document_and_meta() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .set_body_json(json!({"id": 42, "name": "widget"})),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let fetcher = make_fetcher(store);
        let url = format!("{}/repos/acme/widget", server.uri());
        let mut request = make_request(&url);

        fetcher.fetch(&mut request).await.unwrap();

        let document = request.document.unwrap();
        assert_eq!(document.payload["id"], 42);
        assert_eq!(document.metadata.resource_type, "repo");

        let response = request.response.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.etag.as_deref(), Some("\"abc\""));
        assert_eq!(request.meta.get("status"), Some(&json!(200)));
        assert!(request.meta.get("fetch").is_some());
    }

    #[tokio::test]
    async fn test_fetch_sends_stored_etag_and_skips_on_304() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .and(header("If-None-Match", "\"abc\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let url = format!("{}/repos/acme/widget", server.uri());
        let mut stored = DocumentMetadata::new("repo", &url);
        stored.etag = Some("\"abc\"".to_string());
        store
            .upsert(&Document::new(json!({"id": 42}), stored))
            .await
            .unwrap();

        let fetcher = make_fetcher(store);
        let mut request = make_request(&url);
        fetcher.fetch(&mut request).await.unwrap();

        assert!(request.should_skip());
        assert_eq!(request.message.as_deref(), Some("Unmodified"));
        assert!(request.document.is_none());
    }

    #[tokio::test]
    async fn test_fetch_304_with_force_rehydrates_from_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let url = format!("{}/repos/acme/widget", server.uri());
        let mut stored = DocumentMetadata::new("repo", &url);
        stored.etag = Some("\"abc\"".to_string());
        stored.version = 9;
        stored
            .links
            .insert("self".to_string(), Link::self_ref("urn:repo:42"));
        store
            .upsert(&Document::new(json!({"id": 42}), stored))
            .await
            .unwrap();

        let fetcher = make_fetcher(store);
        let mut request = make_request(&url);
        request.context.force = true;
        fetcher.fetch(&mut request).await.unwrap();

        assert!(!request.should_skip());
        let document = request.document.unwrap();
        assert_eq!(document.metadata.version, 9);
        assert!(document.metadata.links.contains_key("self"));
    }

    #[tokio::test]
    async fn test_fetch_409_marks_empty_repo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/empty"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let fetcher = make_fetcher(Arc::new(MemoryStore::new()));
        let url = format!("{}/repos/acme/empty", server.uri());
        let mut request = make_request(&url);
        fetcher.fetch(&mut request).await.unwrap();

        assert!(request.should_skip());
        assert_eq!(request.message.as_deref(), Some("Empty repo"));
    }

    #[tokio::test]
    async fn test_fetch_500_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = make_fetcher(Arc::new(MemoryStore::new()));
        let url = format!("{}/repos/acme/widget", server.uri());
        let mut request = make_request(&url);

        let result = fetcher.fetch(&mut request).await;
        assert!(matches!(
            result,
            Err(AppError::FetchStatus { status: 500, .. })
        ));
        assert_eq!(request.meta.get("status"), Some(&json!(500)));
    }
}
